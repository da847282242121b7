//! The spec catalog — declarative shapes for every workflow entity
//!
//! This is the data half of the validator: one spec per entity kind, plus
//! the root document spec. The interpreter resolves `named`/`any_of`
//! specs through the catalog so entity specs can reference each other
//! (and themselves) freely.

use crate::refs::{NamedPattern, RefKind};
use crate::spec::*;
use crate::types::{ComparisonOperator, FIELD_TYPES, GATE_TYPES, MILESTONES};
use serde_json::json;
use std::collections::BTreeMap;

/// Property names that may not appear anywhere in a document.
pub const RESERVED_KEYWORDS: [&str; 8] = [
    "root",
    "keys",
    "values",
    "_this",
    "_parent",
    "_item",
    "_corresponding_key",
    "ERROR",
];

/// Methods a pipeline `apply` may use.
pub const APPLICATION_METHODS: [&str; 11] = [
    "ADD", "SUBTRACT", "MULTIPLY", "DIVIDE", "APPEND", "PREPEND", "CONCAT", "SELECT", "SET",
    "AND", "OR",
];

/// Operators a pipeline `aggregate` may use.
pub const AGGREGATION_OPERATORS: [&str; 9] = [
    "AVERAGE", "COUNT", "MAX", "MIN", "SUM", "FIRST", "LAST", "AND", "OR",
];

/// Named specs, resolved by the interpreter on demand.
pub struct Catalog {
    specs: BTreeMap<String, Spec>,
    root: Spec,
}

impl Catalog {
    pub fn new() -> Self {
        let mut specs = BTreeMap::new();
        let mut insert = |name: &str, spec: Spec| {
            specs.insert(name.to_string(), spec);
        };

        insert("term", term());
        insert("party", party());
        insert("object_promise", object_promise());
        insert("checkpoint", checkpoint());
        insert("checkpoint_reference", checkpoint_reference());
        insert("dependency", dependency());
        insert("literal_operand", literal_operand());
        insert("referenced_operand", referenced_operand());
        insert("action", action());
        insert("thread_group", thread_group());
        insert("pipeline", pipeline());
        insert("variable", variable());
        insert("traverse", traverse());
        insert("apply", apply());
        insert("filter_comparison", filter_comparison());
        insert("nested_filter_query", nested_filter_query());
        insert("contextual_ref", contextual_ref());

        Catalog {
            specs,
            root: root_object(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Spec> {
        self.specs.get(name)
    }

    pub fn root(&self) -> &Spec {
        &self.root
    }

    /// Ref lookup configuration for a global-ref entity kind.
    pub fn ref_config(&self, kind: RefKind) -> Option<RefConfig> {
        let spec = self.get(kind.as_str())?;
        match &spec.kind {
            SpecKind::Object(obj) => obj.ref_config.clone(),
            _ => None,
        }
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

fn root_object() -> Spec {
    object(
        ObjectSpec::with_properties(vec![
            ("standard", string()),
            ("terms", array(named("term"))),
            (
                "parties",
                array_with(
                    named("party"),
                    Constraints {
                        unique: vec!["id".into(), "name".into()],
                        ..Constraints::default()
                    },
                ),
            ),
            (
                "object_types",
                object(ObjectSpec::open_dict(string(), object_type_entry())),
            ),
            (
                "object_promises",
                array_with(
                    named("object_promise"),
                    Constraints {
                        unique: vec!["id".into(), "name".into()],
                        ..Constraints::default()
                    },
                ),
            ),
            (
                "actions",
                array_with(
                    named("action"),
                    Constraints {
                        unique: vec!["id".into(), "milestones".into()],
                        ..Constraints::default()
                    },
                ),
            ),
            (
                "thread_groups",
                array_with(
                    named("thread_group"),
                    Constraints {
                        unique: vec!["id".into()],
                        ..Constraints::default()
                    },
                ),
            ),
            (
                "checkpoints",
                array_with(
                    named("checkpoint"),
                    Constraints {
                        unique: vec!["id".into(), "alias".into()],
                        unique_composites: vec![vec!["gate_type".into(), "dependencies".into()]],
                        ..Constraints::default()
                    },
                ),
            ),
        ])
        .optional(&["terms", "thread_groups"])
        .priority(&["thread_groups"]),
    )
}

fn term() -> Spec {
    object(
        ObjectSpec::with_properties(vec![
            ("name", string()),
            ("description", string()),
            ("attributes", array(string())),
        ])
        .optional(&["attributes"]),
    )
}

fn party() -> Spec {
    object(
        ObjectSpec::with_properties(vec![
            ("id", integer()),
            ("name", string()),
            ("hex_code", pattern_string(&[NamedPattern::HexCode])),
        ])
        .optional(&["hex_code"])
        .referenced_in("root.parties", Some("name")),
    )
}

/// The value side of the `object_types` dictionary: one attribute
/// definition. Edges and edge collections additionally require the target
/// object type.
fn object_type_entry() -> Spec {
    let mut field_types: Vec<String> = FIELD_TYPES.iter().map(|s| s.to_string()).collect();
    field_types.push("EDGE".into());
    field_types.push("EDGE_COLLECTION".into());

    object(
        ObjectSpec::with_properties(vec![
            ("field_type", enum_of(field_types)),
            ("description", string()),
        ])
        .optional(&["description"])
        .conditional(Conditional::single(
            TriggerCondition::new(
                "field_type",
                ConditionOperator::OneOf,
                json!(["EDGE", "EDGE_COLLECTION"]),
            ),
            Modifiers::default().add_property(
                "object_type",
                string().with_expected(ExpectedValue::OneOf {
                    from: "root.object_types".into(),
                    extract: "keys".into(),
                }),
            ),
        )),
    )
}

fn object_promise() -> Spec {
    object(
        ObjectSpec::with_properties(vec![
            ("id", integer()),
            ("name", string()),
            ("description", string()),
            (
                "object_type",
                string().with_expected(ExpectedValue::OneOf {
                    from: "root.object_types".into(),
                    extract: "keys".into(),
                }),
            ),
            ("context", reference(&[RefKind::ThreadGroup])),
        ])
        .optional(&["description", "context"])
        .validated_by(&[ValidationFn::ObjectPromiseFulfillment])
        .referenced_in("root.object_promises", Some("name")),
    )
}

fn checkpoint_reference() -> Spec {
    object(ObjectSpec::with_properties(vec![(
        "checkpoint",
        reference(&[RefKind::Checkpoint]),
    )]))
}

fn referenced_operand() -> Spec {
    object(
        ObjectSpec::with_properties(vec![
            (
                "ref",
                multi_type([
                    reference(&[RefKind::Action]),
                    pattern_string(&[NamedPattern::Variable]),
                ]),
            ),
            ("context", enum_of(["RUNTIME"])),
        ])
        .optional(&["context"]),
    )
}

fn literal_operand() -> Spec {
    object(ObjectSpec::with_properties(vec![("value", scalar())]))
}

fn dependency() -> Spec {
    object(
        ObjectSpec::with_properties(vec![
            (
                "compare",
                object(
                    ObjectSpec::with_properties(vec![
                        ("left", any_of(["literal_operand", "referenced_operand"])),
                        ("right", any_of(["literal_operand", "referenced_operand"])),
                        ("operator", enum_of(ComparisonOperator::ALL)),
                    ])
                    .validated_by(&[
                        ValidationFn::Comparison,
                        ValidationFn::NoAggregatedFieldDependency,
                    ]),
                ),
            ),
            ("description", string()),
        ])
        .optional(&["description"]),
    )
}

fn checkpoint() -> Spec {
    object(
        ObjectSpec::with_properties(vec![
            ("id", integer()),
            ("alias", pattern_string(&[NamedPattern::Alias])),
            ("description", string()),
            ("abbreviated_description", string()),
            ("supporting_info", array(string())),
            ("gate_type", enum_of(GATE_TYPES)),
            (
                "dependencies",
                array(any_of(["dependency", "checkpoint_reference"])),
            ),
            ("context", reference(&[RefKind::ThreadGroup])),
        ])
        .optional(&[
            "description",
            "abbreviated_description",
            "supporting_info",
            "context",
        ])
        .validated_by(&[
            ValidationFn::CheckpointIsReferenced,
            ValidationFn::CheckpointContext,
        ])
        .conditional(Conditional::single(
            TriggerCondition::on_length("dependencies", ConditionOperator::LessThan, json!(2)),
            Modifiers::default()
                .forbid(
                    &["gate_type"],
                    "gate_type is irrelevant when a checkpoint has fewer than 2 dependencies.",
                )
                .override_property(
                    "dependencies",
                    array_with(
                        named("dependency"),
                        Constraints {
                            min_length: Some(1),
                            ..Constraints::default()
                        },
                    ),
                ),
        ))
        .referenced_in("root.checkpoints", Some("alias")),
    )
}

fn action() -> Spec {
    object(
        ObjectSpec::with_properties(vec![
            ("id", integer()),
            ("context", reference(&[RefKind::ThreadGroup])),
            ("object_promise", reference(&[RefKind::ObjectPromise])),
            ("description", string()),
            ("party", reference(&[RefKind::Party])),
            ("depends_on", reference(&[RefKind::Checkpoint])),
            (
                "steps",
                array(object(ObjectSpec::with_properties(vec![
                    ("title", string()),
                    ("description", string()),
                ]))),
            ),
            ("operation", operation()),
            ("milestones", array(enum_of(MILESTONES))),
            ("supporting_info", array(string())),
            ("pipeline", named("pipeline")),
        ])
        .optional(&[
            "context",
            "description",
            "depends_on",
            "steps",
            "milestones",
            "supporting_info",
            "pipeline",
        ])
        .validated_by(&[ValidationFn::ActionOperation, ValidationFn::DependencyScope])
        .referenced_in("root.actions", None),
    )
}

fn operation() -> Spec {
    object(
        ObjectSpec::with_properties(vec![
            ("include", array(string()).nullable()),
            ("exclude", array(string()).nullable()),
            (
                "default_values",
                object(ObjectSpec::open_dict(string(), scalar())),
            ),
            (
                "default_edges",
                object(ObjectSpec::open_dict(
                    string(),
                    reference(&[RefKind::ObjectPromise]),
                )),
            ),
            ("appends_objects_to", reference(&[RefKind::ObjectPromise])),
        ])
        .mutually_exclusive(&["include", "exclude"])
        .optional(&["default_values", "default_edges", "appends_objects_to"]),
    )
}

fn thread_group() -> Spec {
    object(
        ObjectSpec::with_properties(vec![
            ("id", integer()),
            ("description", string()),
            ("context", reference(&[RefKind::ThreadGroup])),
            ("depends_on", reference(&[RefKind::Checkpoint])),
            (
                "spawn",
                object(ObjectSpec::with_properties(vec![
                    (
                        "foreach",
                        multi_type([
                            reference(&[RefKind::ObjectPromise]),
                            pattern_string(&[NamedPattern::Variable]),
                        ]),
                    ),
                    ("as", pattern_string(&[NamedPattern::Variable])),
                ])),
            ),
        ])
        .optional(&["description", "context", "depends_on"])
        .validated_by(&[
            ValidationFn::ThreadGroupIsReferenced,
            ValidationFn::DependencyScope,
            ValidationFn::ThreadGroup,
        ])
        .referenced_in("root.thread_groups", None),
    )
}

fn pipeline() -> Spec {
    object(
        ObjectSpec::with_properties(vec![
            (
                "object_promise",
                reference(&[RefKind::ObjectPromise]).with_expected(ExpectedValue::EquivalentRef {
                    other: "{_parent}.{_parent}.object_promise".into(),
                }),
            ),
            ("variables", array(named("variable"))),
            (
                "traverse",
                array_with(
                    named("traverse"),
                    Constraints {
                        unique: vec!["ref".into()],
                        ..Constraints::default()
                    },
                )
                .replace_error(
                    "duplicate value provided for unique field \"ref\"",
                    "sibling \"traverse\" objects cannot specify the same \"ref\"",
                ),
            ),
            ("apply", array(named("apply"))),
            (
                "output",
                array(object(ObjectSpec::with_properties(vec![
                    (
                        "from",
                        pattern_string(&[NamedPattern::Variable, NamedPattern::Dotless]),
                    ),
                    ("to", string()),
                ]))),
            ),
        ])
        .optional(&["traverse", "apply"])
        .validated_by(&[ValidationFn::Pipeline]),
    )
}

fn variable() -> Spec {
    let mut variable_types: Vec<String> = FIELD_TYPES.iter().map(|s| s.to_string()).collect();
    variable_types.push("OBJECT".into());
    variable_types.push("OBJECT_LIST".into());

    object(ObjectSpec::with_properties(vec![
        (
            "name",
            pattern_string(&[NamedPattern::Variable, NamedPattern::Dotless]),
        ),
        ("type", enum_of(variable_types)),
        ("initial", multi_type([scalar(), array(scalar())])),
    ]))
}

fn traverse() -> Spec {
    object(ObjectSpec::with_properties(vec![
        (
            "ref",
            multi_type([
                reference(&[RefKind::ObjectPromise]),
                pattern_string(&[NamedPattern::Variable]),
            ]),
        ),
        (
            "foreach",
            object(
                ObjectSpec::with_properties(vec![
                    (
                        "as",
                        pattern_string(&[NamedPattern::Variable, NamedPattern::Dotless]),
                    ),
                    ("variables", array(named("variable"))),
                    (
                        "traverse",
                        array_with(
                            named("traverse"),
                            Constraints {
                                unique: vec!["ref".into()],
                                ..Constraints::default()
                            },
                        )
                        .replace_error(
                            "duplicate value provided for unique field \"ref\"",
                            "sibling \"traverse\" objects cannot specify the same \"ref\"",
                        ),
                    ),
                    ("apply", array(named("apply"))),
                ])
                .optional(&["variables", "traverse"]),
            ),
        ),
    ]))
}

fn apply() -> Spec {
    object(
        ObjectSpec::with_properties(vec![
            (
                "from",
                multi_type([
                    pattern_string(&[NamedPattern::Variable]),
                    pattern_string(&[NamedPattern::LocalVariable]),
                    reference(&[RefKind::ObjectPromise]),
                ]),
            ),
            (
                "to",
                pattern_string(&[NamedPattern::Variable, NamedPattern::Dotless]),
            ),
            ("method", enum_of(APPLICATION_METHODS)),
            (
                "aggregate",
                object(ObjectSpec::with_properties(vec![
                    ("field", string()),
                    ("operator", enum_of(AGGREGATION_OPERATORS)),
                ])),
            ),
            (
                "filter",
                object(
                    ObjectSpec::with_properties(vec![
                        (
                            "where",
                            array_with(
                                any_of(["filter_comparison", "nested_filter_query"]),
                                Constraints {
                                    min_length: Some(1),
                                    ..Constraints::default()
                                },
                            ),
                        ),
                        ("gate_type", enum_of(GATE_TYPES)),
                    ])
                    .conditional(Conditional::single(
                        TriggerCondition::on_length("where", ConditionOperator::LessThan, json!(2)),
                        Modifiers::default().forbid(
                            &["gate_type"],
                            "gate_type is irrelevant when a query has fewer than 2 comparisons.",
                        ),
                    )),
                ),
            ),
            (
                "sort",
                array(object(ObjectSpec::with_properties(vec![
                    ("field", string()),
                    ("order", enum_of(["ASC", "DESC"])),
                ]))),
            ),
            ("select", string()),
        ])
        .mutually_exclusive(&["aggregate", "filter", "sort", "select"])
        .optional(&["aggregate", "filter", "sort", "select"])
        .priority(&["from"]),
    )
}

fn nested_filter_query() -> Spec {
    object(ObjectSpec::with_properties(vec![
        (
            "where",
            array_with(
                any_of(["filter_comparison", "nested_filter_query"]),
                Constraints {
                    min_length: Some(2),
                    ..Constraints::default()
                },
            ),
        ),
        ("gate_type", enum_of(GATE_TYPES)),
    ]))
}

/// `$_item` must appear on at least one side of every filter comparison;
/// the conditionals force the other side into a filter-ref object when one
/// side is not a filter ref.
fn filter_comparison() -> Spec {
    let operand = || {
        multi_type([
            object(ObjectSpec::with_properties(vec![(
                "ref",
                reference(&[RefKind::FilterRef]),
            )])),
            named("contextual_ref"),
            scalar(),
        ])
    };

    let forced_filter_operand = || {
        object(ObjectSpec::with_properties(vec![(
            "ref",
            reference(&[RefKind::FilterRef]),
        )]))
        .replace_error(
            "expected object, got ",
            "\"left\" and/or \"right\" must reference the filter variable (\"$_item\")",
        )
    };

    object(
        ObjectSpec::with_properties(vec![
            ("left", operand()),
            ("operator", enum_of(ComparisonOperator::ALL)),
            ("right", operand()),
        ])
        .conditional(
            Conditional::any(
                vec![
                    TriggerCondition::new(
                        "left",
                        ConditionOperator::DoesNotContainKey,
                        json!("ref"),
                    ),
                    TriggerCondition::new(
                        "left.ref",
                        ConditionOperator::DoesNotMatchPattern,
                        json!("filter_ref"),
                    ),
                ],
                Modifiers::default().override_property("right", forced_filter_operand()),
            ),
        )
        .conditional(Conditional::any(
            vec![
                TriggerCondition::new(
                    "right",
                    ConditionOperator::DoesNotContainKey,
                    json!("ref"),
                ),
                TriggerCondition::new(
                    "right.ref",
                    ConditionOperator::DoesNotMatchPattern,
                    json!("filter_ref"),
                ),
            ],
            Modifiers::default().override_property("left", forced_filter_operand()),
        )),
    )
}

fn contextual_ref() -> Spec {
    object(
        ObjectSpec::with_properties(vec![
            ("context", enum_of(["RUNTIME"])),
            (
                "ref",
                multi_type([
                    reference(&[RefKind::ObjectPromise]),
                    pattern_string(&[NamedPattern::LocalVariable]),
                    pattern_string(&[NamedPattern::Variable]),
                ]),
            ),
        ])
        .optional(&["context"]),
    )
}
