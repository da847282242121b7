//! The spec interpreter — a generic walker over document values
//!
//! Validates an untyped value against a spec node: kind checks,
//! constraints, conditional overrides, uniqueness, expected values, and
//! named-spec resolution. Every method returns a list of diagnostics;
//! validation is non-fatal and always runs to completion.

use crate::catalog::RESERVED_KEYWORDS;
use crate::refs::{is_filter_ref, is_global_ref, is_local_variable, parse_global_ref, NamedPattern, RefKind};
use crate::spec::*;
use crate::util::{canonical_string, display_value, hash_sorted_value, value_kind};
use crate::validator::{id_string, quoted_list, Validator, MAX_DEPTH};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

type SpecVars = BTreeMap<String, String>;

impl Validator {
    pub(crate) fn validate_field(
        &mut self,
        path: &str,
        field: &Value,
        spec: &Spec,
        depth: usize,
    ) -> Vec<String> {
        self.validate_field_with(path, field, spec, depth, &SpecVars::new())
    }

    pub(crate) fn validate_field_with(
        &mut self,
        path: &str,
        field: &Value,
        spec: &Spec,
        depth: usize,
        spec_vars: &SpecVars,
    ) -> Vec<String> {
        if depth > MAX_DEPTH {
            if self.depth_exceeded {
                return Vec::new();
            }
            self.depth_exceeded = true;
            return vec!["maximum document depth exceeded".to_string()];
        }

        if spec.nullable && field.is_null() {
            return Vec::new();
        }

        match &spec.kind {
            SpecKind::Any => Vec::new(),
            SpecKind::String {
                patterns,
                expected_value,
            } => self.validate_string(path, field, patterns, expected_value.as_ref(), spec_vars),
            SpecKind::Integer => self.validate_integer(path, field),
            SpecKind::Decimal => self.validate_decimal(path, field),
            SpecKind::Boolean => self.validate_boolean(path, field),
            SpecKind::Scalar => self.validate_scalar(path, field),
            SpecKind::Enum { values } => self.validate_enum(path, field, values),
            SpecKind::Array {
                values,
                constraints,
            } => self.validate_array(path, field, spec, values, constraints, depth),
            SpecKind::Ref {
                ref_kinds,
                expected_value,
            } => self.validate_ref(path, field, ref_kinds, expected_value.as_ref(), spec_vars),
            SpecKind::MultiType { types } => {
                self.validate_multi_type(path, field, types, depth, spec_vars)
            }
            SpecKind::Object(_) | SpecKind::Named { .. } | SpecKind::AnyOf { .. } => {
                self.validate_object(path, field, spec, depth)
            }
        }
    }

    fn validate_multi_type(
        &mut self,
        path: &str,
        field: &Value,
        types: &[Spec],
        depth: usize,
        spec_vars: &SpecVars,
    ) -> Vec<String> {
        for candidate in types {
            // warnings emitted by a rejected candidate must not leak
            let warning_mark = self.warnings.len();
            let errors = self.validate_field_with(path, field, candidate, depth, spec_vars);
            if errors.is_empty() {
                return Vec::new();
            }
            self.warnings.truncate(warning_mark);
        }

        let labels: Vec<String> = types.iter().map(|t| kind_label(t).to_string()).collect();
        vec![format!(
            "{}: expected one of {}, got {}",
            self.context(path),
            serde_json::to_string(&labels).unwrap_or_default(),
            serde_json::to_string(value_kind(field)).unwrap_or_default()
        )]
    }

    // -----------------------------------------------------------------
    // Objects
    // -----------------------------------------------------------------

    pub(crate) fn validate_object(
        &mut self,
        path: &str,
        field: &Value,
        spec: &Spec,
        depth: usize,
    ) -> Vec<String> {
        match &spec.kind {
            SpecKind::AnyOf { names } => {
                return self.validate_any_of(path, field, spec, names, depth)
            }
            SpecKind::Named { name, modifiers } => {
                let Some(resolved) = self.catalog.get(name).cloned() else {
                    return vec![format!(
                        "{}: unknown spec referenced: {}",
                        self.context(path),
                        name
                    )];
                };
                let patched = apply_property_overrides(resolved, modifiers);
                return self.validate_object(path, field, &patched, depth);
            }
            _ => {}
        }

        let SpecKind::Object(object_spec) = &spec.kind else {
            return vec![format!(
                "{}: expected object, got {}",
                self.context(path),
                value_kind(field)
            )];
        };

        let Some(map) = field.as_object() else {
            let message = format!("expected object, got {}", value_kind(field));
            return vec![format!(
                "{}: {}",
                self.context(path),
                apply_error_replacements(&spec.error_replacements, &message)
            )];
        };

        let (mut working, spec_vars) = self.resolve_object_spec(field, object_spec);

        let mut errors = Vec::new();

        if !working.properties.is_empty() {
            // mutual exclusivity turns unchosen properties into forbidden ones
            errors.extend(self.validate_mutually_exclusive(path, map, &mut working));

            for (key, _) in &working.properties {
                if !map.contains_key(key) && property_is_required(key, &working.constraints) {
                    errors.push(format!(
                        "{}: missing required property: {}",
                        self.context(path),
                        key
                    ));
                }
            }

            errors.extend(self.validate_constraints(path, field, &working.constraints));

            let mut validated: BTreeSet<String> = BTreeSet::new();
            for key in &working.property_validation_priority.clone() {
                if let Some(value) = map.get(key) {
                    if let Some(prop_spec) = working.property(key).cloned() {
                        errors.extend(self.validate_field_with(
                            &format!("{}.{}", path, key),
                            value,
                            &prop_spec,
                            depth + 1,
                            &spec_vars,
                        ));
                        validated.insert(key.clone());
                    }
                }
            }

            for (key, prop_spec) in &working.properties.clone() {
                if validated.contains(key) || !map.contains_key(key) {
                    continue;
                }
                errors.extend(self.validate_field_with(
                    &format!("{}.{}", path, key),
                    &map[key],
                    prop_spec,
                    depth + 1,
                    &spec_vars,
                ));
            }

            for key in map.keys() {
                if working.property(key).is_none() && RESERVED_KEYWORDS.contains(&key.as_str()) {
                    errors.push(format!(
                        "{}: cannot use reserved keyword as property name: {}",
                        self.context(path),
                        serde_json::to_string(key).unwrap_or_default()
                    ));
                }
            }
        } else if let (Some(keys_spec), Some(values_spec)) =
            (working.keys.clone(), working.values.clone())
        {
            errors.extend(self.validate_constraints(path, field, &working.constraints));

            for (key, value) in map {
                errors.extend(self.validate_field_with(
                    &format!("{}.keys", path),
                    &Value::String(key.clone()),
                    &keys_spec,
                    depth + 1,
                    &spec_vars,
                ));
                if RESERVED_KEYWORDS.contains(&key.as_str()) {
                    errors.push(format!(
                        "{}: cannot use reserved keyword as property name: {}",
                        self.context(path),
                        serde_json::to_string(key).unwrap_or_default()
                    ));
                    continue;
                }
                errors.extend(self.validate_field_with(
                    &format!("{}.{}", path, key),
                    value,
                    &values_spec,
                    depth + 1,
                    &spec_vars,
                ));
            }
        } else {
            errors.extend(self.validate_constraints(path, field, &working.constraints));
        }

        errors
    }

    fn validate_any_of(
        &mut self,
        path: &str,
        field: &Value,
        spec: &Spec,
        names: &[String],
        depth: usize,
    ) -> Vec<String> {
        if !field.is_object() {
            let message = format!("expected object, got {}", value_kind(field));
            return vec![format!(
                "{}: {}",
                self.context(path),
                apply_error_replacements(&spec.error_replacements, &message)
            )];
        }

        let mut spec_errors = Vec::new();
        for name in names {
            let warning_mark = self.warnings.len();
            let errors = self.validate_object(path, field, &named(name), depth);
            if errors.is_empty() {
                return Vec::new();
            }
            self.warnings.truncate(warning_mark);
            spec_errors.push(format!("--- begin '{}' spec errors ---", name));
            spec_errors.extend(errors);
            spec_errors.push(format!("--- end '{}' spec errors ---", name));
        }

        let mut errors = vec![format!(
            "{}: object does not conform to any of the allowed object specifications: {}",
            self.context(path),
            serde_json::to_string(names).unwrap_or_default()
        )];
        errors.extend(spec_errors);
        errors
    }

    /// Produce the working copy of an object spec: resolver variables
    /// populated, conditionals evaluated and applied.
    fn resolve_object_spec(&mut self, field: &Value, spec: &ObjectSpec) -> (ObjectSpec, SpecVars) {
        let mut working = spec.clone();
        let mut spec_vars = SpecVars::new();

        for (var, query) in &spec.resolvers {
            // a failed resolution poisons the variable with the reserved
            // keyword ERROR, letting validation continue to the root cause
            let resolved = self
                .resolve_query(field, query)
                .unwrap_or_else(|| "ERROR".to_string());
            spec_vars.insert(var.clone(), resolved);
        }

        loop {
            let conditionals = std::mem::take(&mut working.conditionals);
            let switch = working.switch.take();
            let mut added: Vec<Conditional> = Vec::new();

            for conditional in &conditionals {
                let satisfied = self.evaluate_condition_group(conditional, field);
                let modifiers = if satisfied {
                    Some(&conditional.then)
                } else {
                    conditional.otherwise.as_ref()
                };
                if let Some(modifiers) = modifiers {
                    apply_modifiers(&mut working, modifiers);
                    added.extend(modifiers.add_conditionals.iter().cloned());
                }
            }

            if let Some(switch) = &switch {
                for case in &switch.cases {
                    let value = self.get_field_at(field, &switch.property);
                    if value.as_ref() == Some(&case.equals) {
                        apply_modifiers(&mut working, &case.then);
                        added.extend(case.then.add_conditionals.iter().cloned());
                        if case.break_after {
                            break;
                        }
                    }
                }
            }

            if added.is_empty() {
                break;
            }
            // conditionals introduced by a conditional are evaluated in turn
            working.conditionals = added;
        }

        (working, spec_vars)
    }

    fn evaluate_condition_group(&self, conditional: &Conditional, field: &Value) -> bool {
        match conditional.gate {
            ConditionGate::And => conditional
                .conditions
                .iter()
                .all(|c| self.evaluate_condition(c, field)),
            ConditionGate::Or => conditional
                .conditions
                .iter()
                .any(|c| self.evaluate_condition(c, field)),
        }
    }

    fn evaluate_condition(&self, condition: &TriggerCondition, field: &Value) -> bool {
        use ConditionOperator::*;

        match condition.operator {
            ContainsKey => contains_key(field, &condition.property, &condition.value),
            DoesNotContainKey => !contains_key(field, &condition.property, &condition.value),
            IsSpecified => {
                let specified = field
                    .as_object()
                    .map(|map| map.contains_key(&condition.property))
                    .unwrap_or(false);
                specified == condition.value.as_bool().unwrap_or(true)
            }
            _ => {
                // a property path that does not resolve fails the condition
                let Some(prop) = self.get_field_at(field, &condition.property) else {
                    return false;
                };
                let prop = match condition.attribute {
                    Some(ConditionAttribute::Length) => match value_length(&prop) {
                        Some(len) => Value::from(len as u64),
                        None => return false,
                    },
                    Some(ConditionAttribute::ValueType) => {
                        Value::String(field_type_name(&prop).to_string())
                    }
                    None => prop,
                };

                match condition.operator {
                    Equals => json_eq(&prop, &condition.value),
                    GreaterThan => numeric_cmp(&prop, &condition.value, |a, b| a > b),
                    LessThan => numeric_cmp(&prop, &condition.value, |a, b| a < b),
                    GreaterThanOrEqualTo => numeric_cmp(&prop, &condition.value, |a, b| a >= b),
                    LessThanOrEqualTo => numeric_cmp(&prop, &condition.value, |a, b| a <= b),
                    Contains => value_contains(&prop, &condition.value),
                    DoesNotContain => !value_contains(&prop, &condition.value),
                    OneOf => condition
                        .value
                        .as_array()
                        .map(|items| items.iter().any(|v| json_eq(v, &prop)))
                        .unwrap_or(false),
                    MatchesPattern => match (prop.as_str(), pattern_from_value(&condition.value)) {
                        (Some(s), Some(pattern)) => pattern.is_match(s),
                        _ => false,
                    },
                    DoesNotMatchPattern => {
                        match (prop.as_str(), pattern_from_value(&condition.value)) {
                            (Some(s), Some(pattern)) => !pattern.is_match(s),
                            _ => true,
                        }
                    }
                    _ => false,
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // Constraints
    // -----------------------------------------------------------------

    fn validate_mutually_exclusive(
        &mut self,
        path: &str,
        map: &serde_json::Map<String, Value>,
        working: &mut ObjectSpec,
    ) -> Vec<String> {
        let exclusive = working.constraints.mutually_exclusive.clone();
        if exclusive.is_empty() {
            return Vec::new();
        }

        let included: Vec<String> = exclusive
            .iter()
            .filter(|p| map.contains_key(*p))
            .cloned()
            .collect();

        // unchosen properties become forbidden for this validation pass
        let excluded: Vec<String> = exclusive
            .iter()
            .filter(|p| !included.contains(p))
            .cloned()
            .collect();
        if !excluded.is_empty() {
            match &mut working.constraints.forbidden {
                Some(forbidden) => forbidden.properties.extend(excluded),
                None => {
                    working.constraints.forbidden = Some(Forbidden {
                        properties: excluded,
                        reason: format!(
                            "mutually exclusive with another specified property: {}",
                            quoted_list(&included)
                        ),
                    })
                }
            }
        }

        if included.is_empty() {
            let all_optional = exclusive
                .iter()
                .all(|p| working.constraints.optional.contains(p));
            if !all_optional {
                return vec![format!(
                    "{}: must specify one of the mutually exclusive properties: {}",
                    self.context(path),
                    quoted_list(&exclusive)
                )];
            }
        }

        if included.len() > 1 {
            return vec![format!(
                "{}: more than one mutually exclusive property specified: {}",
                self.context(path),
                quoted_list(&included)
            )];
        }

        Vec::new()
    }

    fn validate_constraints(
        &mut self,
        path: &str,
        field: &Value,
        constraints: &Constraints,
    ) -> Vec<String> {
        let mut errors = Vec::new();

        if let (Some(forbidden), Some(map)) = (&constraints.forbidden, field.as_object()) {
            for key in &forbidden.properties {
                if map.contains_key(key) {
                    errors.push(format!(
                        "{}: forbidden property specified: {}; reason: {}",
                        self.context(path),
                        key,
                        forbidden.reason
                    ));
                }
            }
        }

        if (!constraints.unique.is_empty()
            || !constraints.unique_composites.is_empty()
            || !constraints.unique_if_not_null.is_empty())
            && field.is_object()
        {
            errors.extend(self.validate_unique(path, field, constraints, &[]));
        }

        for function in &constraints.validation_functions.clone() {
            errors.extend(self.dispatch_validation_fn(*function, path, field));
        }

        errors
    }

    pub(crate) fn validate_unique(
        &mut self,
        path: &str,
        field: &Value,
        constraints: &Constraints,
        replacements: &[ErrorReplacement],
    ) -> Vec<String> {
        let items: Vec<&Value> = match field {
            Value::Array(items) => items.iter().collect(),
            Value::Object(map) => map.values().collect(),
            _ => return Vec::new(),
        };

        let mut errors = Vec::new();

        let singles = constraints
            .unique
            .iter()
            .map(|f| (f, false))
            .chain(constraints.unique_if_not_null.iter().map(|f| (f, true)));

        for (field_name, skip_null) in singles {
            let mut seen: BTreeSet<String> = BTreeSet::new();
            let mut reported: BTreeSet<String> = BTreeSet::new();

            for item in &items {
                let mut values = Vec::new();
                match item.get(field_name) {
                    Some(Value::Array(list)) => values.extend(list.iter().cloned()),
                    Some(value) => values.push(value.clone()),
                    None if field_name.contains('.') => {
                        if let Some(value) = self.get_field_at(item, field_name) {
                            values.push(value);
                        }
                    }
                    None => {}
                }

                for value in values {
                    if skip_null && value.is_null() {
                        continue;
                    }
                    let key = hash_sorted_value(&value);
                    if !seen.insert(key.clone()) && reported.insert(key) {
                        let message = format!(
                            "duplicate value provided for unique field {}: {}",
                            serde_json::to_string(field_name).unwrap_or_default(),
                            display_value(&value)
                        );
                        errors.push(format!(
                            "{}: {}",
                            self.context(path),
                            apply_error_replacements(replacements, &message)
                        ));
                    }
                }
            }
        }

        for combination in &constraints.unique_composites {
            let mut seen: BTreeSet<String> = BTreeSet::new();
            let mut reported: BTreeSet<String> = BTreeSet::new();

            for item in &items {
                let mut composite = serde_json::Map::new();
                for property in combination {
                    if let Some(value) = item.get(property) {
                        composite.insert(property.clone(), value.clone());
                    }
                }
                let composite = Value::Object(composite);
                let key = hash_sorted_value(&composite);
                if !seen.insert(key.clone()) && reported.insert(key) {
                    let label = serde_json::to_string(combination)
                        .and_then(|inner| serde_json::to_string(&inner))
                        .unwrap_or_default();
                    let message = format!(
                        "duplicate value provided for unique field combination {}: {}",
                        label,
                        display_value(&composite)
                    );
                    errors.push(format!(
                        "{}: {}",
                        self.context(path),
                        apply_error_replacements(replacements, &message)
                    ));
                }
            }
        }

        errors
    }

    // -----------------------------------------------------------------
    // Arrays
    // -----------------------------------------------------------------

    fn validate_array(
        &mut self,
        path: &str,
        field: &Value,
        spec: &Spec,
        values: &Spec,
        constraints: &Constraints,
        depth: usize,
    ) -> Vec<String> {
        let Some(items) = field.as_array() else {
            return vec![format!(
                "{}: expected array, got {}",
                self.context(path),
                value_kind(field)
            )];
        };

        let mut errors = Vec::new();

        if let Some(min_length) = constraints.min_length {
            if items.len() < min_length {
                errors.push(format!(
                    "{}: must contain at least {} item(s), got {}",
                    self.context(path),
                    min_length,
                    items.len()
                ));
            }
        }

        for (index, item) in items.iter().enumerate() {
            errors.extend(self.validate_field(
                &format!("{}[{}]", path, index),
                item,
                values,
                depth + 1,
            ));
        }

        // uniqueness only means anything once the items themselves are valid
        if errors.is_empty() {
            if constraints.distinct {
                let mut seen = BTreeSet::new();
                if items.iter().any(|item| !seen.insert(canonical_string(item))) {
                    errors.push(format!(
                        "{}: contains duplicate item(s) (values must be distinct)",
                        self.context(path)
                    ));
                }
            }

            if !constraints.unique.is_empty()
                || !constraints.unique_composites.is_empty()
                || !constraints.unique_if_not_null.is_empty()
            {
                errors.extend(self.validate_unique(
                    path,
                    field,
                    constraints,
                    &spec.error_replacements,
                ));
            }
        }

        errors
    }

    // -----------------------------------------------------------------
    // Scalars
    // -----------------------------------------------------------------

    fn validate_string(
        &mut self,
        path: &str,
        field: &Value,
        patterns: &[NamedPattern],
        expected_value: Option<&ExpectedValue>,
        spec_vars: &SpecVars,
    ) -> Vec<String> {
        let Some(s) = field.as_str() else {
            return vec![format!(
                "{}: expected string, got {}",
                self.context(path),
                value_kind(field)
            )];
        };

        for pattern in patterns {
            if !pattern.is_match(s) {
                return vec![format!(
                    "{}: string does not match {} pattern: {}",
                    self.context(path),
                    pattern.description(),
                    pattern.regex().as_str()
                )];
            }
        }

        if let Some(expected) = expected_value {
            return self.validate_expected_value(path, field, expected, spec_vars);
        }

        Vec::new()
    }

    fn validate_integer(&mut self, path: &str, field: &Value) -> Vec<String> {
        if field.is_i64() || field.is_u64() {
            return Vec::new();
        }
        vec![format!(
            "{}: expected integer, got {}",
            self.context(path),
            value_kind(field)
        )]
    }

    fn validate_decimal(&mut self, path: &str, field: &Value) -> Vec<String> {
        if field.is_number() {
            return Vec::new();
        }
        vec![format!(
            "{}: expected decimal, got {}",
            self.context(path),
            value_kind(field)
        )]
    }

    fn validate_boolean(&mut self, path: &str, field: &Value) -> Vec<String> {
        if field.is_boolean() {
            return Vec::new();
        }
        vec![format!(
            "{}: expected boolean, got {}",
            self.context(path),
            value_kind(field)
        )]
    }

    /// Scalars are strings, numbers, booleans, null, or flat lists of one
    /// scalar kind.
    fn validate_scalar(&mut self, path: &str, field: &Value) -> Vec<String> {
        let ok = match field {
            Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => true,
            Value::Array(items) => {
                items.iter().all(Value::is_string) || items.iter().all(Value::is_number)
            }
            Value::Object(_) => false,
        };
        if ok {
            return Vec::new();
        }
        vec![format!(
            "{}: expected scalar, got {}",
            self.context(path),
            value_kind(field)
        )]
    }

    fn validate_enum(&mut self, path: &str, field: &Value, values: &[String]) -> Vec<String> {
        if let Some(s) = field.as_str() {
            if values.iter().any(|v| v == s) {
                return Vec::new();
            }
        }
        vec![format!(
            "{}: invalid enum value: expected one of {}, got {}",
            self.context(path),
            serde_json::to_string(values).unwrap_or_default(),
            display_value(field)
        )]
    }

    // -----------------------------------------------------------------
    // Refs
    // -----------------------------------------------------------------

    fn validate_ref(
        &mut self,
        path: &str,
        field: &Value,
        ref_kinds: &[RefKind],
        expected_value: Option<&ExpectedValue>,
        spec_vars: &SpecVars,
    ) -> Vec<String> {
        let not_found = |v: &Value, context: String| {
            vec![format!(
                "{}: invalid ref: object not found: {}",
                context,
                display_value(v)
            )]
        };

        let value = field.as_str().unwrap_or_default();

        if ref_kinds.contains(&RefKind::LocalRef) && is_local_variable(value) {
            match self.resolve_type_from_local_ref(path, value) {
                Ok(Some(_)) => {}
                Ok(None) => return not_found(field, self.context(path)),
                Err(message) => return vec![format!("{}: {}", self.context(path), message)],
            }
        } else if ref_kinds.contains(&RefKind::FilterRef) && is_filter_ref(value) {
            if self.resolve_type_from_filter_ref(path, value).is_none() {
                return not_found(field, self.context(path));
            }
        } else {
            let Some(parsed) = parse_global_ref(value) else {
                return vec![format!(
                    "{}: expected ref, got {}",
                    self.context(path),
                    display_value(field)
                )];
            };

            if !ref_kinds.contains(&parsed.kind) {
                let allowed: Vec<String> = ref_kinds.iter().map(|k| k.as_str().to_string()).collect();
                return vec![format!(
                    "{}: invalid ref type: expected one of {}, got {} reference",
                    self.context(path),
                    serde_json::to_string(&allowed).unwrap_or_default(),
                    parsed.kind
                )];
            }

            if self.resolve_parsed_ref(&parsed).is_none() {
                return not_found(field, self.context(path));
            }
        }

        if let Some(expected) = expected_value {
            return self.validate_expected_value(path, field, expected, spec_vars);
        }

        Vec::new()
    }

    // -----------------------------------------------------------------
    // Expected values
    // -----------------------------------------------------------------

    fn validate_expected_value(
        &mut self,
        path: &str,
        field: &Value,
        expected: &ExpectedValue,
        spec_vars: &SpecVars,
    ) -> Vec<String> {
        match expected {
            ExpectedValue::OneOf { from, extract } => {
                let resolved_from = self.resolve_path_tokens(path, from, spec_vars);
                self.validate_one_of(path, field, &resolved_from, extract)
            }
            ExpectedValue::ReferencedValue { from_ref, extract } => {
                let ref_path = self.resolve_path_tokens(path, from_ref, spec_vars);
                let Some(reference) = self.get_field(&ref_path).and_then(|v| match v {
                    Value::String(s) => Some(s),
                    _ => None,
                }) else {
                    return Vec::new();
                };
                let Some(referenced) = self.resolve_global_ref(&reference) else {
                    return Vec::new();
                };
                let Some(expected_value) = self.get_field_at(&referenced, extract) else {
                    return Vec::new();
                };
                if json_eq(field, &expected_value) {
                    Vec::new()
                } else {
                    vec![format!(
                        "{}: expected {}, got {}",
                        self.context(path),
                        display_value(&expected_value),
                        display_value(field)
                    )]
                }
            }
            ExpectedValue::EquivalentRef { other } => {
                let other_path = self.resolve_path_tokens(path, other, spec_vars);
                let Some(other_ref) = self.get_field(&other_path).and_then(|v| match v {
                    Value::String(s) => Some(s),
                    _ => None,
                }) else {
                    return Vec::new();
                };
                let Some(this_ref) = field.as_str() else {
                    return Vec::new();
                };
                if !is_global_ref(&other_ref) || !is_global_ref(this_ref) {
                    return Vec::new();
                }
                if other_ref == this_ref {
                    return Vec::new();
                }

                let parsed_other = parse_global_ref(&other_ref);
                let parsed_this = parse_global_ref(this_ref);
                if let (Some(a), Some(b)) = (&parsed_other, &parsed_this) {
                    if a.kind != b.kind {
                        return vec![format!(
                            "{}: expected ref type \"{}\", got \"{}\"",
                            self.context(path),
                            a.kind,
                            b.kind
                        )];
                    }
                }

                let resolved_other = self.resolve_global_ref(&other_ref);
                let resolved_this = self.resolve_global_ref(this_ref);
                match (resolved_other, resolved_this) {
                    (Some(a), Some(b)) => match (a.get("id"), b.get("id")) {
                        (Some(a_id), Some(b_id)) if json_eq(a_id, b_id) => Vec::new(),
                        (Some(_), Some(_)) => vec![format!(
                            "{}: expected ref equivalent to {}, got {}",
                            self.context(path),
                            serde_json::to_string(&other_ref).unwrap_or_default(),
                            display_value(field)
                        )],
                        _ => Vec::new(),
                    },
                    _ => Vec::new(),
                }
            }
        }
    }

    fn validate_one_of(
        &mut self,
        path: &str,
        field: &Value,
        from: &str,
        extract: &str,
    ) -> Vec<String> {
        let Some(collection) = self.get_field(from) else {
            return vec![format!(
                "{}: reference path {} contains invalid type: null",
                self.context(path),
                from
            )];
        };

        match &collection {
            Value::Object(map) => match extract {
                "keys" => {
                    if map.keys().any(|k| *k == id_string(field)) {
                        Vec::new()
                    } else {
                        vec![format!(
                            "{}: expected any key from {}, got {}",
                            self.context(path),
                            from,
                            display_value(field)
                        )]
                    }
                }
                "values" => {
                    if map.values().any(|v| json_eq(v, field)) {
                        Vec::new()
                    } else {
                        vec![format!(
                            "{}: expected any value from {}, got {}",
                            self.context(path),
                            from,
                            display_value(field)
                        )]
                    }
                }
                property => {
                    if map
                        .values()
                        .any(|v| v.get(property).map(|p| json_eq(p, field)).unwrap_or(false))
                    {
                        Vec::new()
                    } else {
                        vec![format!(
                            "{}: expected any {} field from {}, got {}",
                            self.context(path),
                            serde_json::to_string(property).unwrap_or_default(),
                            from,
                            display_value(field)
                        )]
                    }
                }
            },
            Value::Array(items) => {
                if items
                    .iter()
                    .any(|item| {
                        self.get_field_at(item, extract)
                            .map(|v| json_eq(&v, field))
                            .unwrap_or(false)
                    })
                {
                    Vec::new()
                } else {
                    vec![format!(
                        "{}: expected any {} field from {}, got {}",
                        self.context(path),
                        serde_json::to_string(extract).unwrap_or_default(),
                        from,
                        display_value(field)
                    )]
                }
            }
            other => vec![format!(
                "{}: reference path {} contains invalid type: {}",
                self.context(path),
                from,
                value_kind(other)
            )],
        }
    }

    // -----------------------------------------------------------------
    // Resolver queries
    // -----------------------------------------------------------------

    pub(crate) fn resolve_query(&self, obj: &Value, query: &Query) -> Option<String> {
        let collection = if let Some(rest) = query.from.strip_prefix("{_this}") {
            self.get_field_at(obj, rest.trim_start_matches('.'))?
        } else {
            self.get_field(&query.from)?
        };

        let filtered: Vec<Value> = match (&collection, &query.where_clause) {
            (Value::Array(items), Some(condition)) => items
                .iter()
                .filter(|item| self.query_condition_matches(item, condition, obj))
                .cloned()
                .collect(),
            (Value::Array(items), None) => items.clone(),
            (single, None) => {
                return self
                    .get_field_at(single, &query.extract)
                    .map(|v| id_string(&v))
            }
            _ => return None,
        };

        let extracted: Vec<Value> = filtered
            .iter()
            .filter_map(|item| self.get_field_at(item, &query.extract))
            .collect();

        match extracted.as_slice() {
            [single] => Some(id_string(single)),
            _ => None,
        }
    }

    fn query_condition_matches(
        &self,
        item: &Value,
        condition: &QueryCondition,
        parent: &Value,
    ) -> bool {
        let left = self.get_field_at(item, &condition.property);
        let right = match &condition.value {
            QueryValue::Literal(value) => Some(value.clone()),
            QueryValue::FromThis { extract } => self.get_field_at(parent, extract),
        };
        let (Some(left), Some(right)) = (left, right) else {
            return false;
        };

        match condition.operator {
            QueryOperator::Equals => json_eq(&left, &right),
            QueryOperator::In => right
                .as_array()
                .map(|items| items.iter().any(|v| json_eq(v, &left)))
                .unwrap_or(false),
            QueryOperator::IsReferencedBy => right
                .as_str()
                .and_then(parse_global_ref)
                .map(|parsed| parsed.ref_id() == id_string(&left))
                .unwrap_or(false),
        }
    }
}

// ---------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------

fn property_is_required(key: &str, constraints: &Constraints) -> bool {
    if constraints.optional.iter().any(|o| o == key) {
        return false;
    }
    if let Some(forbidden) = &constraints.forbidden {
        if forbidden.properties.iter().any(|f| f == key) {
            return false;
        }
    }
    true
}

fn apply_property_overrides(mut spec: Spec, overrides: &[PropertyOverride]) -> Spec {
    if let SpecKind::Object(object_spec) = &mut spec.kind {
        for patch in overrides {
            object_spec.set_property(&patch.property, patch.spec.clone());
        }
    }
    spec
}

fn apply_modifiers(working: &mut ObjectSpec, modifiers: &Modifiers) {
    for (name, spec) in modifiers
        .override_properties
        .iter()
        .chain(modifiers.add_properties.iter())
    {
        working.set_property(name, spec.clone());
    }
    if let Some(patch) = &modifiers.add_constraints {
        working.constraints.merge(patch);
    }
}

pub(crate) fn apply_error_replacements(
    replacements: &[ErrorReplacement],
    message: &str,
) -> String {
    for replacement in replacements {
        if message.contains(replacement.pattern) {
            return replacement.replace_with.to_string();
        }
    }
    message.to_string()
}

fn kind_label(spec: &Spec) -> &str {
    match &spec.kind {
        SpecKind::String { .. } => "string",
        SpecKind::Integer => "integer",
        SpecKind::Decimal => "decimal",
        SpecKind::Boolean => "boolean",
        SpecKind::Scalar => "scalar",
        SpecKind::Any => "any",
        SpecKind::Enum { .. } => "enum",
        SpecKind::Array { .. } => "array",
        SpecKind::Object(_) | SpecKind::AnyOf { .. } => "object",
        SpecKind::Ref { .. } => "ref",
        SpecKind::MultiType { .. } => "types",
        SpecKind::Named { name, .. } => name,
    }
}

fn contains_key(field: &Value, property: &str, key: &Value) -> bool {
    field
        .get(property)
        .and_then(Value::as_object)
        .zip(key.as_str())
        .map(|(map, k)| map.contains_key(k))
        .unwrap_or(false)
}

fn value_length(value: &Value) -> Option<usize> {
    match value {
        Value::Array(items) => Some(items.len()),
        Value::String(s) => Some(s.len()),
        Value::Object(map) => Some(map.len()),
        _ => None,
    }
}

fn field_type_name(value: &Value) -> &'static str {
    match value {
        Value::Bool(_) => "BOOLEAN",
        Value::Number(_) => "NUMERIC",
        Value::String(_) => "STRING",
        Value::Array(_) => "LIST",
        Value::Object(_) => "OBJECT",
        Value::Null => "NULL",
    }
}

fn numeric_cmp(left: &Value, right: &Value, cmp: fn(f64, f64) -> bool) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

fn value_contains(container: &Value, needle: &Value) -> bool {
    match container {
        Value::Array(items) => items.iter().any(|v| json_eq(v, needle)),
        Value::String(s) => needle.as_str().map(|n| s.contains(n)).unwrap_or(false),
        _ => false,
    }
}

fn pattern_from_value(value: &Value) -> Option<NamedPattern> {
    match value.as_str()? {
        "variable" => Some(NamedPattern::Variable),
        "local_variable" => Some(NamedPattern::LocalVariable),
        "filter_ref" => Some(NamedPattern::FilterRef),
        "hex_code" => Some(NamedPattern::HexCode),
        "alias" => Some(NamedPattern::Alias),
        "dotless" => Some(NamedPattern::Dotless),
        _ => None,
    }
}

/// Equality with numeric widening: `2` and `2.0` compare equal.
pub(crate) fn json_eq(a: &Value, b: &Value) -> bool {
    if a.is_number() && b.is_number() {
        return a.as_f64() == b.as_f64();
    }
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{
        array_with, boolean, enum_of, integer, named_with, object, string, Conditional,
        ConditionOperator, Constraints, Modifiers, ObjectSpec, PropertyOverride, Query,
        QueryCondition, QueryOperator, QueryValue, Spec, SwitchCase, TriggerCondition,
    };
    use serde_json::json;

    fn validator_with(doc: Value) -> Validator {
        let mut validator = Validator::new();
        validator.validate(&doc);
        validator
    }

    fn walk(validator: &mut Validator, field: &Value, spec: &Spec) -> Vec<String> {
        validator.validate_field("root", field, spec, 0)
    }

    #[test]
    fn test_resolver_populates_path_variables() {
        // the resolver looks up the tag named by the field's own `kind`
        // property, then `{$tag}` selects the matching collection
        let mut validator = validator_with(json!({
            "catalog": {
                "jobs": {"names": {"clean": {}, "audit": {}}},
            },
        }));
        let spec = object(
            ObjectSpec::with_properties(vec![
                ("kind", string()),
                (
                    "job",
                    string().with_expected(ExpectedValue::OneOf {
                        from: "root.catalog.{$tag}.names".into(),
                        extract: "keys".into(),
                    }),
                ),
            ])
            .resolver(
                "$tag",
                Query {
                    from: "{_this}".into(),
                    where_clause: None,
                    extract: "kind".into(),
                },
            ),
        );

        let errors = walk(&mut validator, &json!({"kind": "jobs", "job": "clean"}), &spec);
        assert!(errors.is_empty(), "{:?}", errors);

        let errors = walk(&mut validator, &json!({"kind": "jobs", "job": "paint"}), &spec);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("expected any key from root.catalog.jobs.names"));
    }

    #[test]
    fn test_failed_resolver_substitutes_error_keyword() {
        let mut validator = validator_with(json!({"catalog": {}}));
        let spec = object(
            ObjectSpec::with_properties(vec![(
                "job",
                string().with_expected(ExpectedValue::OneOf {
                    from: "root.catalog.{$tag}".into(),
                    extract: "keys".into(),
                }),
            )])
            .resolver(
                "$tag",
                Query {
                    from: "{_this}".into(),
                    where_clause: None,
                    extract: "missing".into(),
                },
            ),
        );

        // validation still completes, pointing at the unresolvable path
        let errors = walk(&mut validator, &json!({"job": "x"}), &spec);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("root.catalog.ERROR"), "{:?}", errors);
    }

    #[test]
    fn test_resolver_query_with_where_clause() {
        let validator = validator_with(json!({
            "records": [
                {"id": 0, "tag": "alpha"},
                {"id": 1, "tag": "beta"},
            ],
        }));
        let query = Query {
            from: "root.records".into(),
            where_clause: Some(QueryCondition {
                property: "id".into(),
                operator: QueryOperator::Equals,
                value: QueryValue::FromThis {
                    extract: "record_id".into(),
                },
            }),
            extract: "tag".into(),
        };
        let result = validator.resolve_query(&json!({"record_id": 1}), &query);
        assert_eq!(result.as_deref(), Some("beta"));
    }

    #[test]
    fn test_referenced_value_expectation() {
        let mut validator = validator_with(json!({
            "standard": "x",
            "parties": [{"id": 0, "name": "Project"}],
            "anchor": {"party": "party:0"},
        }));
        let spec = object(ObjectSpec::with_properties(vec![(
            "party_name",
            string().with_expected(ExpectedValue::ReferencedValue {
                from_ref: "root.anchor.party".into(),
                extract: "name".into(),
            }),
        )]));

        let errors = walk(&mut validator, &json!({"party_name": "Project"}), &spec);
        assert!(errors.is_empty(), "{:?}", errors);

        let errors = walk(&mut validator, &json!({"party_name": "Auditor"}), &spec);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("expected \"Project\", got \"Auditor\""));
    }

    #[test]
    fn test_named_spec_property_modifiers() {
        let mut validator = Validator::new();
        // the catalog's `term` spec requires a string name; the override
        // swaps that property for an integer
        let patched = named_with(
            "term",
            vec![PropertyOverride {
                property: "name".into(),
                spec: integer(),
            }],
        );

        let errors = walk(
            &mut validator,
            &json!({"name": 7, "description": "d"}),
            &patched,
        );
        assert!(errors.is_empty(), "{:?}", errors);

        let errors = walk(
            &mut validator,
            &json!({"name": "text", "description": "d"}),
            &patched,
        );
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("expected integer, got string"));
    }

    #[test]
    fn test_switch_dispatch() {
        let mut validator = Validator::new();
        let mut object_spec = ObjectSpec::with_properties(vec![
            ("mode", enum_of(["A", "B"])),
            ("value", string()),
        ]);
        object_spec.switch = Some(crate::spec::Switch {
            property: "mode".into(),
            cases: vec![SwitchCase {
                equals: json!("B"),
                then: Modifiers::default().override_property("value", boolean()),
                break_after: true,
            }],
        });
        let spec = object(object_spec);

        let errors = walk(&mut validator, &json!({"mode": "A", "value": "text"}), &spec);
        assert!(errors.is_empty(), "{:?}", errors);

        let errors = walk(&mut validator, &json!({"mode": "B", "value": "text"}), &spec);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("expected boolean, got string"));
    }

    #[test]
    fn test_conditional_else_branch() {
        let mut validator = Validator::new();
        let spec = object(
            ObjectSpec::with_properties(vec![("flag", boolean()), ("value", string())])
                .conditional(
                    Conditional::single(
                        TriggerCondition::new("flag", ConditionOperator::Equals, json!(true)),
                        Modifiers::default().override_property("value", integer()),
                    )
                    .or_else(Modifiers::default().override_property("value", boolean())),
                ),
        );

        assert!(walk(&mut validator, &json!({"flag": true, "value": 3}), &spec).is_empty());
        assert!(walk(&mut validator, &json!({"flag": false, "value": true}), &spec).is_empty());
        assert!(!walk(&mut validator, &json!({"flag": false, "value": 3}), &spec).is_empty());
    }

    #[test]
    fn test_distinct_constraint() {
        let mut validator = Validator::new();
        let spec = array_with(
            string(),
            Constraints {
                distinct: true,
                ..Constraints::default()
            },
        );

        assert!(walk(&mut validator, &json!(["a", "b"]), &spec).is_empty());
        let errors = walk(&mut validator, &json!(["a", "a"]), &spec);
        assert_eq!(
            errors,
            vec!["root: contains duplicate item(s) (values must be distinct)"]
        );
    }

    #[test]
    fn test_unique_if_not_null_skips_nulls() {
        let mut validator = Validator::new();
        let spec = array_with(
            object(ObjectSpec::with_properties(vec![(
                "alias",
                string().nullable(),
            )])),
            Constraints {
                unique_if_not_null: vec!["alias".into()],
                ..Constraints::default()
            },
        );

        let errors = walk(
            &mut validator,
            &json!([{"alias": null}, {"alias": null}, {"alias": "x"}]),
            &spec,
        );
        assert!(errors.is_empty(), "{:?}", errors);

        let errors = walk(
            &mut validator,
            &json!([{"alias": "x"}, {"alias": "x"}]),
            &spec,
        );
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("duplicate value provided for unique field \"alias\""));
    }

    #[test]
    fn test_min_length_constraint() {
        let mut validator = Validator::new();
        let spec = array_with(
            string(),
            Constraints {
                min_length: Some(2),
                ..Constraints::default()
            },
        );
        let errors = walk(&mut validator, &json!(["only"]), &spec);
        assert_eq!(errors, vec!["root: must contain at least 2 item(s), got 1"]);
    }
}
