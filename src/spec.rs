//! Spec nodes — the self-describing shape language
//!
//! A `Spec` declares the expected shape of one document value: its kind,
//! constraints, conditional overrides, and cross-reference rules. The
//! interpreter walks a document value against a spec tree, collecting
//! diagnostics. Specs for named entities (party, action, checkpoint, …)
//! live in the catalog and are referenced by name so they can recurse.
//!
//! Conditionals are first-class: an `if` trigger inspects the value being
//! validated and patches the working copy of the spec (overriding or
//! adding properties, adding constraints, even swapping in new
//! conditionals) before property validation runs.

use crate::refs::{NamedPattern, RefKind};
use serde_json::Value;

/// A spec node: a kind plus cross-cutting flags.
#[derive(Clone, Debug)]
pub struct Spec {
    pub kind: SpecKind,
    /// `null` is accepted in place of the described value
    pub nullable: bool,
    /// Diagnostic rewrites applied to errors produced at this node
    pub error_replacements: Vec<ErrorReplacement>,
}

#[derive(Clone, Debug)]
pub enum SpecKind {
    String {
        patterns: Vec<NamedPattern>,
        expected_value: Option<ExpectedValue>,
    },
    Integer,
    Decimal,
    Boolean,
    /// Any scalar or scalar list
    Scalar,
    Any,
    Enum {
        values: Vec<String>,
    },
    Array {
        values: Box<Spec>,
        constraints: Constraints,
    },
    Object(Box<ObjectSpec>),
    Ref {
        ref_kinds: Vec<RefKind>,
        expected_value: Option<ExpectedValue>,
    },
    /// Accepted iff any sub-spec accepts
    MultiType {
        types: Vec<Spec>,
    },
    /// Resolve a catalog spec by name, optionally patching properties
    Named {
        name: String,
        modifiers: Vec<PropertyOverride>,
    },
    /// Accepted iff any named catalog spec accepts
    AnyOf {
        names: Vec<String>,
    },
}

/// Replaces one property's spec when resolving a named spec.
#[derive(Clone, Debug)]
pub struct PropertyOverride {
    pub property: String,
    pub spec: Spec,
}

/// Rewrites matching diagnostics into a domain-specific message.
#[derive(Clone, Debug)]
pub struct ErrorReplacement {
    pub pattern: &'static str,
    pub replace_with: &'static str,
}

#[derive(Clone, Debug, Default)]
pub struct ObjectSpec {
    /// Declared properties, in declaration order (drives diagnostic order)
    pub properties: Vec<(String, Spec)>,
    /// Open dictionaries: a key spec and a value spec instead of properties
    pub keys: Option<Box<Spec>>,
    pub values: Option<Box<Spec>>,
    pub constraints: Constraints,
    pub conditionals: Vec<Conditional>,
    pub switch: Option<Switch>,
    /// Queries whose results populate `{$var}` tokens in nested paths
    pub resolvers: Vec<(String, Query)>,
    /// Properties validated before the rest (their results feed siblings)
    pub property_validation_priority: Vec<String>,
    /// How this entity is looked up when referenced by global ref
    pub ref_config: Option<RefConfig>,
}

#[derive(Clone, Debug, Default)]
pub struct Constraints {
    pub optional: Vec<String>,
    pub forbidden: Option<Forbidden>,
    pub mutually_exclusive: Vec<String>,
    pub unique: Vec<String>,
    pub unique_composites: Vec<Vec<String>>,
    pub unique_if_not_null: Vec<String>,
    pub min_length: Option<usize>,
    pub distinct: bool,
    pub validation_functions: Vec<ValidationFn>,
}

impl Constraints {
    /// Overlay another constraint set (conditional `add_constraints`).
    /// Populated fields of `patch` replace the corresponding fields here.
    pub fn merge(&mut self, patch: &Constraints) {
        if !patch.optional.is_empty() {
            self.optional = patch.optional.clone();
        }
        if patch.forbidden.is_some() {
            self.forbidden = patch.forbidden.clone();
        }
        if !patch.mutually_exclusive.is_empty() {
            self.mutually_exclusive = patch.mutually_exclusive.clone();
        }
        if !patch.unique.is_empty() {
            self.unique = patch.unique.clone();
        }
        if !patch.unique_composites.is_empty() {
            self.unique_composites = patch.unique_composites.clone();
        }
        if !patch.unique_if_not_null.is_empty() {
            self.unique_if_not_null = patch.unique_if_not_null.clone();
        }
        if patch.min_length.is_some() {
            self.min_length = patch.min_length;
        }
        if patch.distinct {
            self.distinct = true;
        }
        if !patch.validation_functions.is_empty() {
            self.validation_functions = patch.validation_functions.clone();
        }
    }
}

#[derive(Clone, Debug)]
pub struct Forbidden {
    pub properties: Vec<String>,
    pub reason: String,
}

/// Named validation hooks attached to specs. Dispatched by the validator;
/// an enum rather than function pointers so specs stay `Clone + Debug`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidationFn {
    ObjectPromiseFulfillment,
    ActionOperation,
    DependencyScope,
    CheckpointContext,
    CheckpointIsReferenced,
    ThreadGroupIsReferenced,
    ThreadGroup,
    Comparison,
    NoAggregatedFieldDependency,
    Pipeline,
}

/// How an entity is found when a global ref names it.
#[derive(Clone, Debug)]
pub struct RefConfig {
    /// Dotted path of the collection searched, e.g. `root.actions`
    pub collection: String,
    /// Field searched for `kind:{alias}` refs; `None` means id-only
    pub alias_field: Option<String>,
}

/// Expected-value rules for strings and refs.
#[derive(Clone, Debug)]
pub enum ExpectedValue {
    /// Value must be one of a collection's keys, values, or field values
    OneOf { from: String, extract: String },
    /// Value must equal a field extracted through a ref found at a path
    ReferencedValue { from_ref: String, extract: String },
    /// Value must be a ref resolving to the same entity as the ref at a path
    EquivalentRef { other: String },
}

/// One `if` block: trigger conditions gated AND/OR, modifiers on match
/// (and optionally on mismatch).
#[derive(Clone, Debug)]
pub struct Conditional {
    pub conditions: Vec<TriggerCondition>,
    pub gate: ConditionGate,
    pub then: Modifiers,
    pub otherwise: Option<Modifiers>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConditionGate {
    And,
    Or,
}

#[derive(Clone, Debug)]
pub struct TriggerCondition {
    /// Dotted path into the value under validation
    pub property: String,
    /// Projection applied to the property before comparison
    pub attribute: Option<ConditionAttribute>,
    pub operator: ConditionOperator,
    pub value: Value,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConditionAttribute {
    Length,
    ValueType,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConditionOperator {
    ContainsKey,
    DoesNotContainKey,
    IsSpecified,
    Equals,
    GreaterThan,
    LessThan,
    GreaterThanOrEqualTo,
    LessThanOrEqualTo,
    Contains,
    DoesNotContain,
    OneOf,
    MatchesPattern,
    DoesNotMatchPattern,
}

/// Spec patches applied when a conditional fires.
#[derive(Clone, Debug, Default)]
pub struct Modifiers {
    pub override_properties: Vec<(String, Spec)>,
    pub add_properties: Vec<(String, Spec)>,
    pub add_constraints: Option<Constraints>,
    /// Replaces the spec's conditionals, which are then re-evaluated
    pub add_conditionals: Vec<Conditional>,
}

#[derive(Clone, Debug)]
pub struct Switch {
    pub property: String,
    pub cases: Vec<SwitchCase>,
}

#[derive(Clone, Debug)]
pub struct SwitchCase {
    pub equals: Value,
    pub then: Modifiers,
    pub break_after: bool,
}

/// Resolver query: `from` a collection, optionally filtered by `where`,
/// `extract` a property of the result.
#[derive(Clone, Debug)]
pub struct Query {
    /// `root.…` or `{_this}.…`
    pub from: String,
    pub where_clause: Option<QueryCondition>,
    pub extract: String,
}

#[derive(Clone, Debug)]
pub struct QueryCondition {
    pub property: String,
    pub operator: QueryOperator,
    pub value: QueryValue,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryOperator {
    Equals,
    In,
    IsReferencedBy,
}

#[derive(Clone, Debug)]
pub enum QueryValue {
    Literal(Value),
    /// A field extracted from the object the resolver runs against
    FromThis { extract: String },
}

// ---------------------------------------------------------------------------
// Builder helpers. The catalog reads best when specs are declared tersely,
// so each kind gets a short constructor and chainable setters.
// ---------------------------------------------------------------------------

impl Spec {
    fn of(kind: SpecKind) -> Self {
        Spec {
            kind,
            nullable: false,
            error_replacements: Vec::new(),
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn replace_error(mut self, pattern: &'static str, replace_with: &'static str) -> Self {
        self.error_replacements.push(ErrorReplacement {
            pattern,
            replace_with,
        });
        self
    }

    pub fn with_expected(mut self, expected: ExpectedValue) -> Self {
        match &mut self.kind {
            SpecKind::String { expected_value, .. } | SpecKind::Ref { expected_value, .. } => {
                *expected_value = Some(expected)
            }
            _ => {}
        }
        self
    }
}

pub fn string() -> Spec {
    Spec::of(SpecKind::String {
        patterns: Vec::new(),
        expected_value: None,
    })
}

pub fn pattern_string(patterns: &[NamedPattern]) -> Spec {
    Spec::of(SpecKind::String {
        patterns: patterns.to_vec(),
        expected_value: None,
    })
}

pub fn integer() -> Spec {
    Spec::of(SpecKind::Integer)
}

pub fn decimal() -> Spec {
    Spec::of(SpecKind::Decimal)
}

pub fn boolean() -> Spec {
    Spec::of(SpecKind::Boolean)
}

pub fn scalar() -> Spec {
    Spec::of(SpecKind::Scalar)
}

pub fn any() -> Spec {
    Spec::of(SpecKind::Any)
}

pub fn enum_of<I, S>(values: I) -> Spec
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Spec::of(SpecKind::Enum {
        values: values.into_iter().map(Into::into).collect(),
    })
}

pub fn array(values: Spec) -> Spec {
    Spec::of(SpecKind::Array {
        values: Box::new(values),
        constraints: Constraints::default(),
    })
}

pub fn array_with(values: Spec, constraints: Constraints) -> Spec {
    Spec::of(SpecKind::Array {
        values: Box::new(values),
        constraints,
    })
}

pub fn object(spec: ObjectSpec) -> Spec {
    Spec::of(SpecKind::Object(Box::new(spec)))
}

pub fn reference(ref_kinds: &[RefKind]) -> Spec {
    Spec::of(SpecKind::Ref {
        ref_kinds: ref_kinds.to_vec(),
        expected_value: None,
    })
}

pub fn multi_type<I>(types: I) -> Spec
where
    I: IntoIterator<Item = Spec>,
{
    Spec::of(SpecKind::MultiType {
        types: types.into_iter().collect(),
    })
}

pub fn named(name: &str) -> Spec {
    Spec::of(SpecKind::Named {
        name: name.to_string(),
        modifiers: Vec::new(),
    })
}

pub fn named_with(name: &str, modifiers: Vec<PropertyOverride>) -> Spec {
    Spec::of(SpecKind::Named {
        name: name.to_string(),
        modifiers,
    })
}

pub fn any_of<I, S>(names: I) -> Spec
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Spec::of(SpecKind::AnyOf {
        names: names.into_iter().map(Into::into).collect(),
    })
}

impl ObjectSpec {
    pub fn with_properties(properties: Vec<(&str, Spec)>) -> Self {
        ObjectSpec {
            properties: properties
                .into_iter()
                .map(|(name, spec)| (name.to_string(), spec))
                .collect(),
            ..ObjectSpec::default()
        }
    }

    pub fn open_dict(keys: Spec, values: Spec) -> Self {
        ObjectSpec {
            keys: Some(Box::new(keys)),
            values: Some(Box::new(values)),
            ..ObjectSpec::default()
        }
    }

    pub fn optional(mut self, names: &[&str]) -> Self {
        self.constraints.optional = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn mutually_exclusive(mut self, names: &[&str]) -> Self {
        self.constraints.mutually_exclusive = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn validated_by(mut self, functions: &[ValidationFn]) -> Self {
        self.constraints.validation_functions = functions.to_vec();
        self
    }

    pub fn priority(mut self, names: &[&str]) -> Self {
        self.property_validation_priority = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn conditional(mut self, conditional: Conditional) -> Self {
        self.conditionals.push(conditional);
        self
    }

    pub fn resolver(mut self, var: &str, query: Query) -> Self {
        self.resolvers.push((var.to_string(), query));
        self
    }

    pub fn referenced_in(mut self, collection: &str, alias_field: Option<&str>) -> Self {
        self.ref_config = Some(RefConfig {
            collection: collection.to_string(),
            alias_field: alias_field.map(str::to_string),
        });
        self
    }

    pub fn property(&self, name: &str) -> Option<&Spec> {
        self.properties
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| s)
    }

    /// Insert or replace a property spec, keeping declaration order for
    /// existing names.
    pub fn set_property(&mut self, name: &str, spec: Spec) {
        if let Some(slot) = self.properties.iter_mut().find(|(n, _)| n == name) {
            slot.1 = spec;
        } else {
            self.properties.push((name.to_string(), spec));
        }
    }
}

impl Conditional {
    pub fn single(condition: TriggerCondition, then: Modifiers) -> Self {
        Conditional {
            conditions: vec![condition],
            gate: ConditionGate::And,
            then,
            otherwise: None,
        }
    }

    pub fn any(conditions: Vec<TriggerCondition>, then: Modifiers) -> Self {
        Conditional {
            conditions,
            gate: ConditionGate::Or,
            then,
            otherwise: None,
        }
    }

    pub fn or_else(mut self, otherwise: Modifiers) -> Self {
        self.otherwise = Some(otherwise);
        self
    }
}

impl TriggerCondition {
    pub fn new(property: &str, operator: ConditionOperator, value: Value) -> Self {
        TriggerCondition {
            property: property.to_string(),
            attribute: None,
            operator,
            value,
        }
    }

    pub fn on_length(property: &str, operator: ConditionOperator, value: Value) -> Self {
        TriggerCondition {
            property: property.to_string(),
            attribute: Some(ConditionAttribute::Length),
            operator,
            value,
        }
    }

    pub fn on_type(property: &str, operator: ConditionOperator, value: Value) -> Self {
        TriggerCondition {
            property: property.to_string(),
            attribute: Some(ConditionAttribute::ValueType),
            operator,
            value,
        }
    }
}

impl Modifiers {
    pub fn override_property(mut self, name: &str, spec: Spec) -> Self {
        self.override_properties.push((name.to_string(), spec));
        self
    }

    pub fn add_property(mut self, name: &str, spec: Spec) -> Self {
        self.add_properties.push((name.to_string(), spec));
        self
    }

    pub fn add_constraints(mut self, constraints: Constraints) -> Self {
        self.add_constraints = Some(constraints);
        self
    }

    pub fn forbid(self, properties: &[&str], reason: &str) -> Self {
        self.add_constraints(Constraints {
            forbidden: Some(Forbidden {
                properties: properties.iter().map(|s| s.to_string()).collect(),
                reason: reason.to_string(),
            }),
            ..Constraints::default()
        })
    }

    pub fn add_conditionals(mut self, conditionals: Vec<Conditional>) -> Self {
        self.add_conditionals = conditionals;
        self
    }
}
