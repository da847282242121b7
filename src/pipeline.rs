//! Aggregation-pipeline analysis
//!
//! Pipelines are map-reduce programs over refs and thread variables,
//! producing field values on a promised object. Analysis is flow-typed:
//! each scope tracks its variables' types, assignment state, and
//! traversal usage, and every `apply` is checked against the
//! operand/method table. Scope paths are `"0"`, `"0.0"`, … with lookups
//! walking outward.

use crate::refs::{is_global_ref, is_local_variable, is_variable, parse_global_ref, RefKind};
use crate::types::{
    initial_matches_type, type_details_from_literal, types_are_comparable, ComparisonOperator,
    ItemType, TypeDetails,
};
use crate::util::display_value;
use crate::validator::{id_string, Validator};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// One pipeline variable's flow state.
#[derive(Clone, Debug)]
pub struct PipelineVariable {
    pub type_details: TypeDetails,
    pub initial: Value,
    pub assigned: bool,
    pub used: bool,
    pub is_loop_variable: bool,
    /// Scopes that traverse this variable; writes inside them are illegal
    pub traversal_scopes: BTreeSet<String>,
}

/// Per-pipeline analysis state.
#[derive(Clone, Debug, Default)]
pub struct PipelineState {
    pub object_promise_ref: String,
    /// Thread scope inherited from the promise's fulfillment context
    pub thread_scope: Option<String>,
    /// Scope path -> variable name -> state
    pub variables: BTreeMap<String, BTreeMap<String, PipelineVariable>>,
}

impl PipelineState {
    fn set_variable(&mut self, scope: &str, name: &str, variable: PipelineVariable) {
        self.variables
            .entry(scope.to_string())
            .or_default()
            .insert(name.to_string(), variable);
    }

    /// Find a variable visible from `scope`, walking scope suffixes
    /// outward. Returns the defining scope.
    fn find_variable(&self, name: &str, scope: &str) -> Option<(String, &PipelineVariable)> {
        let mut segments: Vec<&str> = scope.split('.').collect();
        while !segments.is_empty() {
            let candidate = segments.join(".");
            if let Some(variable) = self.variables.get(&candidate).and_then(|s| s.get(name)) {
                return Some((candidate, variable));
            }
            segments.pop();
        }
        None
    }

    pub fn thread_group_id(&self) -> Option<&str> {
        self.thread_scope.as_ref()?.split('.').next_back()
    }
}

impl Validator {
    fn pipeline(&self, pipeline_path: &str) -> Option<&PipelineState> {
        self.pipelines.get(pipeline_path)
    }

    fn find_pipeline_variable(
        &self,
        pipeline_path: &str,
        name: &str,
        scope: &str,
    ) -> Option<(String, PipelineVariable)> {
        self.pipeline(pipeline_path)?
            .find_variable(name, scope)
            .map(|(scope, variable)| (scope, variable.clone()))
    }

    fn update_pipeline_variable(
        &mut self,
        pipeline_path: &str,
        scope: &str,
        name: &str,
        update: impl FnOnce(&mut PipelineVariable),
    ) {
        if let Some(variable) = self
            .pipelines
            .get_mut(pipeline_path)
            .and_then(|p| p.variables.get_mut(scope))
            .and_then(|s| s.get_mut(name))
        {
            update(variable);
        }
    }

    pub(crate) fn validate_pipeline(&mut self, path: &str, field: &Value) -> Vec<String> {
        let Some(promise_parsed) = self.entity_ref(field, "object_promise", RefKind::ObjectPromise)
        else {
            return Vec::new();
        };
        let Some(promise) = self.resolve_parsed_ref(&promise_parsed) else {
            return vec![format!(
                "{}.object_promise: could not resolve object promise",
                self.context(path)
            )];
        };
        let Some(promise_id) = promise.get("id").map(id_string) else {
            return Vec::new();
        };

        let thread_scope = self
            .promise_contexts
            .get(&promise_id)
            .cloned()
            .unwrap_or(None)
            .as_deref()
            .and_then(parse_global_ref)
            .and_then(|parsed| self.thread_groups.get(parsed.ref_id()))
            .and_then(|info| info.scope.clone());

        self.pipelines.insert(
            path.to_string(),
            PipelineState {
                object_promise_ref: field
                    .get("object_promise")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                thread_scope,
                variables: BTreeMap::new(),
            },
        );

        let scope = "0";
        let mut errors = Vec::new();

        if let Some(variables) = field.get("variables").and_then(Value::as_array) {
            errors.extend(self.declare_pipeline_variables(path, "variables", scope, variables));
        }

        if errors.is_empty() {
            if let Some(traversals) = field.get("traverse").and_then(Value::as_array) {
                for (index, traversal) in traversals.iter().enumerate() {
                    errors.extend(self.validate_pipeline_traversal(
                        path,
                        &format!("traverse[{}]", index),
                        scope,
                        index,
                        traversal,
                    ));
                }
            }
        }

        if errors.is_empty() {
            if let Some(applications) = field.get("apply").and_then(Value::as_array) {
                for (index, apply) in applications.iter().enumerate() {
                    errors.extend(self.validate_pipeline_application(
                        path,
                        &format!("apply[{}]", index),
                        scope,
                        apply,
                    ));
                }
            }
        }

        if errors.is_empty() {
            if let Some(outputs) = field.get("output").and_then(Value::as_array) {
                for (index, output) in outputs.iter().enumerate() {
                    errors.extend(self.validate_pipeline_output(
                        path,
                        &format!("output[{}]", index),
                        &promise_id,
                        &promise,
                        output,
                    ));
                }
            }
        }

        if let Some(pipeline) = self.pipeline(path) {
            let mut unused = Vec::new();
            for variables in pipeline.variables.values() {
                for (name, variable) in variables {
                    if !variable.is_loop_variable && !variable.assigned && !variable.used {
                        unused.push(name.clone());
                    }
                }
            }
            for name in unused {
                self.warnings.push(format!(
                    "{}: variable declared but not used: {}",
                    self.context(path),
                    serde_json::to_string(&name).unwrap_or_default()
                ));
            }
        }

        errors
    }

    fn declare_pipeline_variables(
        &mut self,
        pipeline_path: &str,
        rel: &str,
        scope: &str,
        variables: &[Value],
    ) -> Vec<String> {
        let mut errors = Vec::new();

        for (index, declaration) in variables.iter().enumerate() {
            let (Some(name), Some(declared_type)) = (
                declaration.get("name").and_then(Value::as_str),
                declaration.get("type").and_then(Value::as_str),
            ) else {
                continue;
            };
            let initial = declaration.get("initial").cloned().unwrap_or(Value::Null);

            if self
                .find_pipeline_variable(pipeline_path, name, scope)
                .is_some()
            {
                errors.push(format!(
                    "{}: {}[{}].name: variable already defined: {}",
                    self.context(pipeline_path),
                    rel,
                    index,
                    serde_json::to_string(name).unwrap_or_default()
                ));
                continue;
            }
            let thread_scope = self
                .pipeline(pipeline_path)
                .and_then(|p| p.thread_scope.clone());
            if self
                .find_thread_variable(name, thread_scope.as_deref(), false)
                .is_some()
            {
                errors.push(format!(
                    "{}: {}[{}].name: variable already defined within thread scope: {}",
                    self.context(pipeline_path),
                    rel,
                    index,
                    serde_json::to_string(name).unwrap_or_default()
                ));
                continue;
            }

            let details = match type_details_from_literal(&initial, Some(declared_type)) {
                Ok(details) => details,
                Err(message) => {
                    errors.push(format!(
                        "{}: {}[{}].initial: {}",
                        self.context(pipeline_path),
                        rel,
                        index,
                        message
                    ));
                    continue;
                }
            };
            if !initial_matches_type(&details, declared_type) {
                errors.push(format!(
                    "{}: {}[{}].initial: does not match expected type {}",
                    self.context(pipeline_path),
                    rel,
                    index,
                    serde_json::to_string(declared_type).unwrap_or_default()
                ));
                continue;
            }

            // the variable's working type is the declared one; a null or
            // empty-list initial must not erase it
            let declared_details =
                type_details_from_literal(&Value::Null, Some(declared_type)).unwrap_or(details);

            if let Some(pipeline) = self.pipelines.get_mut(pipeline_path) {
                pipeline.set_variable(
                    scope,
                    name,
                    PipelineVariable {
                        type_details: declared_details,
                        initial,
                        assigned: false,
                        used: false,
                        is_loop_variable: false,
                        traversal_scopes: BTreeSet::new(),
                    },
                );
            }
        }

        errors
    }

    fn validate_pipeline_traversal(
        &mut self,
        pipeline_path: &str,
        rel: &str,
        parent_scope: &str,
        index: usize,
        traversal: &Value,
    ) -> Vec<String> {
        let (Some(ref_str), Some(foreach)) = (
            traversal.get("ref").and_then(Value::as_str),
            traversal.get("foreach").and_then(Value::as_object),
        ) else {
            return Vec::new();
        };

        let scope = format!("{}.{}", parent_scope, index);
        if scope.split('.').count() > crate::validator::MAX_DEPTH {
            // the structural walk reports the depth violation
            return Vec::new();
        }
        let mut errors = Vec::new();

        let segments: Vec<String> = ref_str.split('.').map(str::to_string).collect();
        let source_type = if is_variable(&segments[0]) {
            let var_type = match self.find_pipeline_variable(pipeline_path, &segments[0], &scope) {
                Some((defining_scope, variable)) => {
                    // a non-loop variable can still be traversed if its
                    // initial value is a list, but it may not be modified
                    // from inside this traversal
                    self.update_pipeline_variable(
                        pipeline_path,
                        &defining_scope,
                        &segments[0],
                        |v| {
                            v.used = true;
                            v.traversal_scopes.insert(scope.clone());
                        },
                    );
                    variable.type_details
                }
                None => {
                    let thread_scope = self
                        .pipeline(pipeline_path)
                        .and_then(|p| p.thread_scope.clone());
                    match self.find_thread_variable(&segments[0], thread_scope.as_deref(), false) {
                        Some(details) => details,
                        None => {
                            return vec![format!(
                                "{}: {}.ref: variable {} is not in scope",
                                self.context(pipeline_path),
                                rel,
                                serde_json::to_string(&segments[0]).unwrap_or_default()
                            )]
                        }
                    }
                }
            };
            match self.resolve_type_from_variable_path(&var_type, &segments[1..]) {
                Ok(details) => details,
                Err(message) => {
                    return vec![format!(
                        "{}: {}.ref: {}",
                        self.context(pipeline_path),
                        rel,
                        message
                    )]
                }
            }
        } else if is_global_ref(ref_str) {
            if self.is_pipeline_local_promise(pipeline_path, ref_str) {
                self.warnings.push(format!(
                    "{}: {}.ref: global ref refers to the local object -- consider using \
                     \"$_object\" instead to reference the local object",
                    self.context(pipeline_path),
                    rel
                ));
                return vec![format!(
                    "{}: {}.ref: cannot use field from local object as pipeline input",
                    self.context(pipeline_path),
                    rel
                )];
            }
            let resolution_context = self
                .pipeline(pipeline_path)
                .and_then(|p| p.thread_group_id().map(str::to_string));
            match self.resolve_type_from_global_ref(ref_str, resolution_context.as_deref()) {
                Ok(details) => details,
                Err(message) => {
                    return vec![format!(
                        "{}: {}.ref: {}",
                        self.context(pipeline_path),
                        rel,
                        message
                    )]
                }
            }
        } else if is_local_variable(ref_str) {
            return vec![format!(
                "{}: {}.ref: cannot use field from local object as pipeline input",
                self.context(pipeline_path),
                rel
            )];
        } else {
            return vec![format!(
                "{}: {}.ref: expected global reference or variable, got {}",
                self.context(pipeline_path),
                rel,
                serde_json::to_string(ref_str).unwrap_or_default()
            )];
        };

        let Some(source_type) = source_type else {
            return vec![format!(
                "{}: {}.ref: could not resolve object type",
                self.context(pipeline_path),
                rel
            )];
        };
        if !source_type.is_list {
            return vec![format!(
                "{}: {}.ref: cannot traverse non-list object",
                self.context(pipeline_path),
                rel
            )];
        }

        let Some(loop_name) = foreach.get("as").and_then(Value::as_str) else {
            return errors;
        };
        if self
            .find_pipeline_variable(pipeline_path, loop_name, &scope)
            .is_some()
        {
            return vec![format!(
                "{}: {}.foreach.as: variable already defined within pipeline scope: {}",
                self.context(pipeline_path),
                rel,
                serde_json::to_string(loop_name).unwrap_or_default()
            )];
        }
        let thread_scope = self
            .pipeline(pipeline_path)
            .and_then(|p| p.thread_scope.clone());
        if self
            .find_thread_variable(loop_name, thread_scope.as_deref(), false)
            .is_some()
        {
            return vec![format!(
                "{}: {}.foreach.as: variable already defined within thread scope: {}",
                self.context(pipeline_path),
                rel,
                serde_json::to_string(loop_name).unwrap_or_default()
            )];
        }

        if let Some(pipeline) = self.pipelines.get_mut(pipeline_path) {
            pipeline.set_variable(
                &scope,
                loop_name,
                PipelineVariable {
                    // the traversal iterates the source's items
                    type_details: source_type.delistified(),
                    initial: Value::Null,
                    assigned: true,
                    used: false,
                    is_loop_variable: true,
                    traversal_scopes: BTreeSet::new(),
                },
            );
        }

        if let Some(variables) = foreach.get("variables").and_then(Value::as_array) {
            errors.extend(self.declare_pipeline_variables(
                pipeline_path,
                &format!("{}.foreach.variables", rel),
                &scope,
                variables,
            ));
        }

        if let Some(traversals) = foreach.get("traverse").and_then(Value::as_array) {
            for (nested_index, nested) in traversals.iter().enumerate() {
                errors.extend(self.validate_pipeline_traversal(
                    pipeline_path,
                    &format!("{}.foreach.traverse[{}]", rel, nested_index),
                    &scope,
                    nested_index,
                    nested,
                ));
            }
        }

        if let Some(applications) = foreach.get("apply").and_then(Value::as_array) {
            for (apply_index, apply) in applications.iter().enumerate() {
                errors.extend(self.validate_pipeline_application(
                    pipeline_path,
                    &format!("{}.foreach.apply[{}]", rel, apply_index),
                    &scope,
                    apply,
                ));
            }
        }

        errors
    }

    fn validate_pipeline_application(
        &mut self,
        pipeline_path: &str,
        rel: &str,
        scope: &str,
        apply: &Value,
    ) -> Vec<String> {
        let (Some(from), Some(to), Some(method)) = (
            apply.get("from").and_then(Value::as_str),
            apply.get("to").and_then(Value::as_str),
            apply.get("method").and_then(Value::as_str),
        ) else {
            return Vec::new();
        };

        if is_global_ref(from) && self.is_pipeline_local_promise(pipeline_path, from) {
            self.warnings.push(format!(
                "{}.from: global ref refers to the local object -- consider using \"$_object\" \
                 instead to reference the local object",
                self.context(pipeline_path)
            ));
            return vec![format!(
                "{}.from: cannot use local object as pipeline input",
                self.context(pipeline_path)
            )];
        }

        let from_type = match self.resolve_pipeline_ref_type(pipeline_path, scope, from, true) {
            Ok(Some(details)) => details,
            Ok(None) => {
                return vec![format!(
                    "{}.from: could not resolve type",
                    self.context(pipeline_path)
                )]
            }
            Err(message) => {
                return vec![format!(
                    "{}.from: {}",
                    self.context(pipeline_path),
                    message
                )]
            }
        };

        // filter refs de-listify this type later
        self.type_details_at_path.insert(
            format!("{}.{}.from", pipeline_path, rel),
            from_type.clone(),
        );

        let Some((to_scope, to_var)) = self.find_pipeline_variable(pipeline_path, to, scope) else {
            let thread_scope = self
                .pipeline(pipeline_path)
                .and_then(|p| p.thread_scope.clone());
            if self
                .find_thread_variable(to, thread_scope.as_deref(), false)
                .is_some()
            {
                return vec![format!(
                    "{}.to: cannot assign to thread variable: {}",
                    self.context(pipeline_path),
                    serde_json::to_string(to).unwrap_or_default()
                )];
            }
            return vec![format!(
                "{}.to: variable {} is not in scope",
                self.context(pipeline_path),
                serde_json::to_string(to).unwrap_or_default()
            )];
        };

        if to_var.is_loop_variable {
            return vec![format!(
                "{}.to: cannot assign to loop variable: {}",
                self.context(pipeline_path),
                serde_json::to_string(to).unwrap_or_default()
            )];
        }
        for traversal_scope in &to_var.traversal_scopes {
            if scope == traversal_scope || scope.starts_with(&format!("{}.", traversal_scope)) {
                return vec![format!(
                    "{}.to: cannot apply to variable within a scope that traverses it: {}",
                    self.context(pipeline_path),
                    serde_json::to_string(to).unwrap_or_default()
                )];
            }
        }

        let left_is_null = !to_var.assigned && to_var.initial.is_null();

        let right_type =
            match self.determine_right_operand_type(pipeline_path, scope, apply, &from_type) {
                Ok(details) => details,
                Err(message) => {
                    return vec![format!(
                        "{}: {}: {}",
                        self.context(pipeline_path),
                        rel,
                        message
                    )]
                }
            };

        if let Err(message) =
            validate_operation(&to_var.type_details, method, &right_type, left_is_null)
        {
            return vec![format!(
                "{}: {}: {}",
                self.context(pipeline_path),
                rel,
                message
            )];
        }

        // record the assignment; object-typed variables adopt the first
        // assigned tag and must keep it
        let mut tag_conflict = None;
        if to_var.type_details.item_tag.is_none() {
            if to_var.type_details.item_type == ItemType::Object && right_type.item_tag.is_some() {
                let tag = right_type.item_tag.clone();
                self.update_pipeline_variable(pipeline_path, &to_scope, to, |v| {
                    v.assigned = true;
                    v.type_details.item_tag = tag;
                });
            } else {
                self.update_pipeline_variable(pipeline_path, &to_scope, to, |v| v.assigned = true);
            }
        } else if to_var.type_details.item_tag != right_type.item_tag {
            tag_conflict = Some(format!(
                "{}.to: cannot assign object of type {} to a variable that has object type {}",
                self.context(pipeline_path),
                serde_json::to_string(right_type.item_tag.as_deref().unwrap_or("null"))
                    .unwrap_or_default(),
                serde_json::to_string(to_var.type_details.item_tag.as_deref().unwrap_or("null"))
                    .unwrap_or_default()
            ));
        } else {
            self.update_pipeline_variable(pipeline_path, &to_scope, to, |v| v.assigned = true);
        }

        tag_conflict.into_iter().collect()
    }

    /// Resolve a pipeline ref (`$var[.path]`, `$_object[.path]`, or a
    /// global promise ref) to its type. Reading an unassigned variable
    /// warns; reading any variable marks it used.
    fn resolve_pipeline_ref_type(
        &mut self,
        pipeline_path: &str,
        scope: &str,
        reference: &str,
        mark_used: bool,
    ) -> Result<Option<TypeDetails>, String> {
        let segments: Vec<String> = reference.split('.').map(str::to_string).collect();

        if is_variable(&segments[0]) {
            let var_type =
                match self.find_pipeline_variable(pipeline_path, &segments[0], scope) {
                    Some((defining_scope, variable)) => {
                        if !variable.assigned {
                            self.warnings.push(format!(
                                "{}.from: variable used before assignment: {}",
                                self.context(pipeline_path),
                                serde_json::to_string(&segments[0]).unwrap_or_default()
                            ));
                        }
                        if mark_used {
                            self.update_pipeline_variable(
                                pipeline_path,
                                &defining_scope,
                                &segments[0],
                                |v| v.used = true,
                            );
                        }
                        variable.type_details
                    }
                    None => {
                        let thread_scope = self
                            .pipeline(pipeline_path)
                            .and_then(|p| p.thread_scope.clone());
                        match self.find_thread_variable(
                            &segments[0],
                            thread_scope.as_deref(),
                            false,
                        ) {
                            Some(details) => details,
                            None => {
                                return Err(format!(
                                    "variable {} is not in scope",
                                    serde_json::to_string(&segments[0]).unwrap_or_default()
                                ))
                            }
                        }
                    }
                };
            return self.resolve_type_from_variable_path(&var_type, &segments[1..]);
        }

        if is_local_variable(reference) {
            return self.resolve_type_from_local_ref(pipeline_path, reference);
        }

        if is_global_ref(reference) {
            let resolution_context = self
                .pipeline(pipeline_path)
                .and_then(|p| p.thread_group_id().map(str::to_string));
            return self.resolve_type_from_global_ref(reference, resolution_context.as_deref());
        }

        Ok(None)
    }

    fn determine_right_operand_type(
        &mut self,
        pipeline_path: &str,
        scope: &str,
        apply: &Value,
        from_type: &TypeDetails,
    ) -> Result<TypeDetails, String> {
        if let Some(aggregate) = apply.get("aggregate") {
            return self.aggregate_result_type(aggregate, from_type);
        }

        if apply.get("sort").is_some() {
            if !from_type.is_list {
                return Err("cannot sort non-list type".to_string());
            }
            return Ok(from_type.clone());
        }

        if let Some(filter) = apply.get("filter") {
            if !from_type.is_list {
                return Err("cannot filter non-list type".to_string());
            }
            if let Some(clauses) = filter.get("where").and_then(Value::as_array) {
                self.validate_filter_clauses(pipeline_path, scope, clauses, from_type)?;
            }
            return Ok(from_type.clone());
        }

        if let Some(select) = apply.get("select").and_then(Value::as_str) {
            let Some(tag) = from_type.item_tag.as_deref() else {
                return Err("cannot select from non-object type".to_string());
            };
            let segments: Vec<String> = select.split('.').map(str::to_string).collect();
            let Some(selected) = self.resolve_type_from_object_path(tag, &segments)? else {
                return Err(format!(
                    "field {} not found on object type {}",
                    serde_json::to_string(select).unwrap_or_default(),
                    serde_json::to_string(tag).unwrap_or_default()
                ));
            };
            if from_type.is_list {
                // selecting from each item of the collection
                if selected.is_list {
                    return Err(crate::typing::NESTED_LIST_ERROR.to_string());
                }
                return Ok(selected.listified());
            }
            return Ok(selected);
        }

        Ok(from_type.clone())
    }

    fn aggregate_result_type(
        &mut self,
        aggregate: &Value,
        from_type: &TypeDetails,
    ) -> Result<TypeDetails, String> {
        let (Some(field), Some(operator)) = (
            aggregate.get("field").and_then(Value::as_str),
            aggregate.get("operator").and_then(Value::as_str),
        ) else {
            return Ok(from_type.clone());
        };

        let aggregated = if field == "$_item" {
            from_type.clone()
        } else {
            if from_type.item_type != ItemType::Object {
                return Err(format!(
                    "invalid field specified for {}_LIST aggregation: expected \"$_item\", got {}",
                    from_type.item_type,
                    serde_json::to_string(field).unwrap_or_default()
                ));
            }
            let tag = from_type.item_tag.as_deref().unwrap_or_default();
            let segments: Vec<String> = field.split('.').map(str::to_string).collect();
            match self.resolve_type_from_object_path(tag, &segments)? {
                Some(details) => details,
                None => {
                    return Err(format!(
                        "field {} not found on object type {}",
                        serde_json::to_string(field).unwrap_or_default(),
                        serde_json::to_string(tag).unwrap_or_default()
                    ))
                }
            }
        };

        if !aggregated.is_list {
            return Err("cannot aggregate non-list type".to_string());
        }

        let allowed: &[&str] = match aggregated.item_type {
            ItemType::Boolean => &["AND", "OR", "COUNT"],
            ItemType::String => &["FIRST", "LAST", "COUNT"],
            ItemType::Numeric => &["FIRST", "LAST", "COUNT", "SUM", "AVERAGE", "MIN", "MAX"],
            ItemType::Object => &["FIRST", "LAST", "COUNT"],
            ItemType::Null => {
                return Err(format!(
                    "cannot aggregate items of type: {}",
                    serde_json::to_string(aggregated.item_type.as_str()).unwrap_or_default()
                ))
            }
        };

        if !allowed.contains(&operator) {
            let items_label = if aggregated.item_type == ItemType::Object {
                "EDGE_COLLECTION".to_string()
            } else {
                format!("{}_LIST", aggregated.item_type)
            };
            return Err(format!(
                "invalid aggregation operator for {} items: {}",
                serde_json::to_string(&items_label).unwrap_or_default(),
                serde_json::to_string(operator).unwrap_or_default()
            ));
        }

        Ok(match operator {
            "FIRST" | "LAST" => aggregated.delistified(),
            "AND" | "OR" => TypeDetails::scalar(ItemType::Boolean),
            _ => TypeDetails::scalar(ItemType::Numeric),
        })
    }

    fn validate_filter_clauses(
        &mut self,
        pipeline_path: &str,
        scope: &str,
        clauses: &[Value],
        from_type: &TypeDetails,
    ) -> Result<(), String> {
        for clause in clauses {
            // nested queries recurse; comparisons type-check
            if let Some(nested) = clause.get("where").and_then(Value::as_array) {
                self.validate_filter_clauses(pipeline_path, scope, nested, from_type)?;
                continue;
            }

            let (Some(left), Some(operator), Some(right)) = (
                clause.get("left"),
                clause.get("operator").and_then(Value::as_str),
                clause.get("right"),
            ) else {
                continue;
            };

            let left_type = self.filter_operand_type(pipeline_path, scope, left, from_type)?;
            let right_type = self.filter_operand_type(pipeline_path, scope, right, from_type)?;

            let Some(parsed_operator) = ComparisonOperator::parse(operator) else {
                continue;
            };
            if !types_are_comparable(&left_type, &right_type, parsed_operator) {
                return Err(format!(
                    "invalid comparison: {} {} {}",
                    left_type.type_string(),
                    operator,
                    right_type.type_string()
                ));
            }
        }
        Ok(())
    }

    fn filter_operand_type(
        &mut self,
        pipeline_path: &str,
        scope: &str,
        operand: &Value,
        from_type: &TypeDetails,
    ) -> Result<TypeDetails, String> {
        if let Some(reference) = operand.get("ref").and_then(Value::as_str) {
            let segments: Vec<String> = reference.split('.').map(str::to_string).collect();
            if segments[0] == "$_item" {
                if segments.len() > 1 {
                    let Some(tag) = from_type.item_tag.as_deref() else {
                        return Err("cannot resolve path from non-object type".to_string());
                    };
                    return match self.resolve_type_from_object_path(tag, &segments[1..])? {
                        Some(details) => Ok(details),
                        None => Err(format!(
                            "invalid filter operand: {}",
                            display_value(operand)
                        )),
                    };
                }
                // the filter iterates the collection's items
                return Ok(from_type.delistified());
            }

            return match self.resolve_pipeline_ref_type(pipeline_path, scope, reference, false)? {
                Some(details) => Ok(details),
                None => Err(format!(
                    "invalid filter operand: {}",
                    display_value(operand)
                )),
            };
        }

        if operand.is_object() {
            return Err(format!("invalid filter operand: {}", display_value(operand)));
        }

        type_details_from_literal(operand, None)
    }

    fn validate_pipeline_output(
        &mut self,
        pipeline_path: &str,
        rel: &str,
        promise_id: &str,
        promise: &Value,
        output: &Value,
    ) -> Vec<String> {
        let mut errors = Vec::new();

        let mut from_type = None;
        if let Some(from) = output.get("from").and_then(Value::as_str) {
            if is_variable(from) {
                match self.find_pipeline_variable(pipeline_path, from, "0") {
                    Some((defining_scope, variable)) => {
                        self.update_pipeline_variable(pipeline_path, &defining_scope, from, |v| {
                            v.used = true;
                        });
                        from_type = Some(variable.type_details);
                    }
                    None => errors.push(format!(
                        "{}: {}.from: variable not found in top-level pipeline scope: {}",
                        self.context(pipeline_path),
                        rel,
                        from
                    )),
                }
            }
        }

        let Some(to) = output.get("to").and_then(Value::as_str) else {
            return errors;
        };

        self.aggregated_fields
            .entry(promise_id.to_string())
            .or_default()
            .insert(to.to_string());

        if let Some(tag) = promise.get("object_type").and_then(Value::as_str) {
            match self.resolve_type_from_object_path(tag, &[to.to_string()]) {
                Ok(Some(field_type)) => {
                    if field_type.item_type == ItemType::Object {
                        errors.push(format!(
                            "{}: {}.to: cannot use edge field for aggregation output: {}",
                            self.context(pipeline_path),
                            rel,
                            serde_json::to_string(to).unwrap_or_default()
                        ));
                    } else if let Some(from_type) = &from_type {
                        if !field_type.matches(from_type) {
                            errors.push(format!(
                                "{}: {}: \"from\" type does not match \"to\" type ({} != {})",
                                self.context(pipeline_path),
                                rel,
                                from_type.type_string(),
                                field_type.type_string()
                            ));
                        }
                    }
                }
                Ok(None) => errors.push(format!(
                    "{}: {}.to: field {} not found on object type: {}",
                    self.context(pipeline_path),
                    rel,
                    serde_json::to_string(to).unwrap_or_default(),
                    tag
                )),
                Err(message) => errors.push(format!(
                    "{}: {}.to: {}",
                    self.context(pipeline_path),
                    rel,
                    message
                )),
            }
        }

        let settable = self
            .settable_fields
            .get(promise_id)
            .map(|fields| fields.contains(to))
            .unwrap_or(false);
        if settable {
            errors.push(format!(
                "{}: {}.to: cannot use field for aggregation output because the field is \
                 included in an action's operation",
                self.context(pipeline_path),
                rel
            ));
        }

        errors
    }

    /// Is this global ref a reference to the pipeline's own promise?
    fn is_pipeline_local_promise(&self, pipeline_path: &str, reference: &str) -> bool {
        let Some(parsed) = parse_global_ref(reference) else {
            return false;
        };
        if parsed.kind != RefKind::ObjectPromise {
            return false;
        }
        let Some(pipeline) = self.pipeline(pipeline_path) else {
            return false;
        };
        let (Some(this), Some(own)) = (
            self.resolve_parsed_ref(&parsed),
            self.resolve_global_ref(&pipeline.object_promise_ref),
        ) else {
            return false;
        };
        match (this.get("id"), own.get("id")) {
            (Some(a), Some(b)) => id_string(a) == id_string(b),
            _ => false,
        }
    }
}

/// The static operand/method validity table.
pub(crate) fn validate_operation(
    left: &TypeDetails,
    method: &str,
    right: &TypeDetails,
    left_is_null: bool,
) -> Result<(), String> {
    let left_string = left.type_string();
    let right_string = right.type_string();

    if left_is_null {
        if method != "SET" {
            return Err(
                "when a variable's initial value is null, the \"SET\" method must be used for \
                 the first operation on the variable"
                    .to_string(),
            );
        }
        if left_string != right_string {
            return Err(format!(
                "cannot set value of type {} to variable of type {}",
                serde_json::to_string(&right_string).unwrap_or_default(),
                serde_json::to_string(&left_string).unwrap_or_default()
            ));
        }
        return Ok(());
    }
    if method == "SET" {
        return Err(
            "the \"SET\" method can only be used for the first operation on a variable"
                .to_string(),
        );
    }

    let allowed: &[&str] = match (left_string.as_str(), right_string.as_str()) {
        ("STRING", "STRING") => &["CONCAT"],
        ("NUMERIC", "NUMERIC") => &["ADD", "SUBTRACT", "MULTIPLY", "DIVIDE"],
        ("BOOLEAN", "BOOLEAN") => &["AND", "OR"],
        ("NUMERIC_LIST", "NUMERIC_LIST")
        | ("STRING_LIST", "STRING_LIST")
        | ("BOOLEAN_LIST", "BOOLEAN_LIST")
        | ("OBJECT_LIST", "OBJECT_LIST") => &["CONCAT"],
        ("NUMERIC_LIST", "NUMERIC")
        | ("STRING_LIST", "STRING")
        | ("BOOLEAN_LIST", "BOOLEAN")
        | ("OBJECT_LIST", "OBJECT") => &["APPEND", "PREPEND"],
        _ => &[],
    };

    if !allowed.contains(&method) {
        return Err(format!(
            "invalid method for operand types {} and {}: {}",
            serde_json::to_string(&left_string).unwrap_or_default(),
            serde_json::to_string(&right_string).unwrap_or_default(),
            serde_json::to_string(method).unwrap_or_default()
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar(item: ItemType) -> TypeDetails {
        TypeDetails::scalar(item)
    }

    fn list(item: ItemType) -> TypeDetails {
        TypeDetails::list_of(item)
    }

    #[test]
    fn test_first_assignment_requires_set() {
        let err = validate_operation(
            &scalar(ItemType::String),
            "CONCAT",
            &scalar(ItemType::String),
            true,
        )
        .unwrap_err();
        assert!(err.contains("\"SET\" method must be used"));

        assert!(validate_operation(
            &scalar(ItemType::String),
            "SET",
            &scalar(ItemType::String),
            true
        )
        .is_ok());
    }

    #[test]
    fn test_set_type_mismatch() {
        let err = validate_operation(
            &scalar(ItemType::Numeric),
            "SET",
            &scalar(ItemType::String),
            true,
        )
        .unwrap_err();
        assert_eq!(
            err,
            "cannot set value of type \"STRING\" to variable of type \"NUMERIC\""
        );
    }

    #[test]
    fn test_set_only_first() {
        let err = validate_operation(
            &scalar(ItemType::Numeric),
            "SET",
            &scalar(ItemType::Numeric),
            false,
        )
        .unwrap_err();
        assert!(err.contains("can only be used for the first operation"));
    }

    #[test]
    fn test_method_table() {
        assert!(validate_operation(
            &scalar(ItemType::Numeric),
            "ADD",
            &scalar(ItemType::Numeric),
            false
        )
        .is_ok());
        assert!(validate_operation(
            &list(ItemType::String),
            "APPEND",
            &scalar(ItemType::String),
            false
        )
        .is_ok());
        assert!(validate_operation(
            &list(ItemType::Boolean),
            "PREPEND",
            &scalar(ItemType::Boolean),
            false
        )
        .is_ok());
        assert!(validate_operation(
            &list(ItemType::Object),
            "CONCAT",
            &list(ItemType::Object),
            false
        )
        .is_ok());

        let err = validate_operation(
            &list(ItemType::String),
            "ADD",
            &scalar(ItemType::String),
            false,
        )
        .unwrap_err();
        assert_eq!(
            err,
            "invalid method for operand types \"STRING_LIST\" and \"STRING\": \"ADD\""
        );
    }
}
