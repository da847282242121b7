//! Comparison validation
//!
//! Checkpoint dependencies compare two operands, each a literal or a ref
//! (action property path or thread variable path). Both operands resolve
//! to `TypeDetails` and the pair is checked against the comparability
//! matrix. Structural rules come first: two literals say nothing about
//! the workflow, and identical operands always compare equal.

use crate::refs::{is_global_ref, is_variable, parse_global_ref, RefKind};
use crate::types::{types_are_comparable, type_details_from_literal, ComparisonOperator, TypeDetails};
use crate::util::{display_value, values_are_identical};
use crate::validator::Validator;
use serde_json::Value;

impl Validator {
    pub(crate) fn validate_comparison(&mut self, path: &str, compare: &Value) -> Vec<String> {
        let (Some(left), Some(right), Some(operator)) = (
            compare.get("left"),
            compare.get("right"),
            compare.get("operator").and_then(Value::as_str),
        ) else {
            // spec validation reports the missing fields
            return Vec::new();
        };

        let render = |message: &str| {
            format!(
                "{}: invalid comparison: {} {} {}: {}",
                self.context(path),
                display_value(left),
                operator,
                display_value(right),
                message
            )
        };

        if is_literal_operand(left) && is_literal_operand(right) {
            return vec![render("both operands cannot be literals")];
        }
        if values_are_identical(left, right) {
            return vec![render("operands are identical")];
        }

        let left_type = match self.operand_type(path, left) {
            Ok(details) => details,
            Err(message) => return vec![format!("{}: {}", self.context(path), message)],
        };
        let right_type = match self.operand_type(path, right) {
            Ok(details) => details,
            Err(message) => return vec![format!("{}: {}", self.context(path), message)],
        };

        let (Some(left_type), Some(right_type)) = (&left_type, &right_type) else {
            // an unresolved operand path is its own diagnostic
            let unresolved = if left_type.is_none() { left } else { right };
            return vec![format!(
                "{}: could not resolve operand type: {}",
                self.context(path),
                display_value(unresolved)
            )];
        };

        let Some(parsed_operator) = ComparisonOperator::parse(operator) else {
            // enum validation reports the bad operator
            return Vec::new();
        };

        if types_are_comparable(&left_type, &right_type, parsed_operator) {
            return Vec::new();
        }

        vec![format!(
            "{}: invalid comparison: {} {} {} ({} {} {})",
            self.context(path),
            display_value(left),
            operator,
            display_value(right),
            left_type.field_type_string(),
            operator,
            right_type.field_type_string()
        )]
    }

    /// Resolve an operand to its type from the enclosing entity's point
    /// of view (a checkpoint's threaded context scopes variable lookups
    /// and promise listification).
    fn operand_type(&mut self, path: &str, operand: &Value) -> Result<Option<TypeDetails>, String> {
        if let Some(reference) = operand.get("ref").and_then(Value::as_str) {
            if is_global_ref(reference) {
                let resolution_context = self
                    .get_parent_entity(path)
                    .and_then(|entity| self.entity_ref(&entity, "context", RefKind::ThreadGroup))
                    .map(|parsed| parsed.ref_id().to_string());
                return self.resolve_type_from_global_ref(reference, resolution_context.as_deref());
            }

            if is_variable(reference) {
                let segments: Vec<String> = reference.split('.').map(str::to_string).collect();
                let scope = self.entity_thread_scope(path);
                let Some(var_type) =
                    self.find_thread_variable(&segments[0], scope.as_deref(), false)
                else {
                    return Err(format!(
                        "variable not found within thread scope: {}",
                        serde_json::to_string(&segments[0]).unwrap_or_default()
                    ));
                };
                return self.resolve_type_from_variable_path(&var_type, &segments[1..]);
            }

            return Ok(None);
        }

        if let Some(value) = operand.get("value") {
            return type_details_from_literal(value, None).map(Some);
        }

        Ok(None)
    }

    /// Checkpoint dependencies may not read fields produced by pipeline
    /// output.
    pub(crate) fn validate_no_aggregated_field_dependency(
        &mut self,
        path: &str,
        compare: &Value,
    ) -> Vec<String> {
        for side in ["left", "right"] {
            let Some(reference) = compare
                .get(side)
                .and_then(|operand| operand.get("ref"))
                .and_then(Value::as_str)
            else {
                continue;
            };
            let Some(parsed) = parse_global_ref(reference) else {
                continue;
            };
            // only `action:N.object_promise.<field>` lands on a promise
            // field directly; deeper paths point at edges, which cannot be
            // known to be aggregated
            if parsed.kind != RefKind::Action
                || parsed.path.len() != 2
                || parsed.path[0] != "object_promise"
            {
                continue;
            }

            let Some(action) = self.resolve_parsed_ref(&parsed) else {
                continue;
            };
            let Some(promise) = self
                .entity_ref(&action, "object_promise", RefKind::ObjectPromise)
                .and_then(|promise_ref| self.resolve_parsed_ref(&promise_ref))
            else {
                continue;
            };
            let Some(promise_id) = promise.get("id").map(crate::validator::id_string) else {
                continue;
            };

            let is_aggregated = self
                .aggregated_fields
                .get(&promise_id)
                .map(|fields| fields.contains(&parsed.path[1]))
                .unwrap_or(false);
            if is_aggregated {
                return vec![format!(
                    "{}: cannot depend on aggregated field: {}",
                    self.context(path),
                    serde_json::to_string(reference).unwrap_or_default()
                )];
            }
        }
        Vec::new()
    }
}

fn is_literal_operand(operand: &Value) -> bool {
    operand.get("value").is_some() && operand.get("ref").is_none()
}
