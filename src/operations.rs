//! Action operation analysis
//!
//! An action either fulfills its promise (CREATE) or edits it. CREATE
//! operations may seed default values and edges and append their objects
//! to an ancestor's edge collection; EDIT operations may do none of that
//! and must run in the fulfiller's thread context.

use crate::refs::RefKind;
use crate::types::type_details_from_literal;
use crate::util::{display_value, value_kind};
use crate::validator::{id_string, Validator};
use serde_json::Value;

impl Validator {
    pub(crate) fn validate_object_promise_fulfillment(
        &mut self,
        path: &str,
        promise: &Value,
    ) -> Vec<String> {
        let Some(promise_id) = promise.get("id").map(id_string) else {
            return Vec::new();
        };

        let mut errors = Vec::new();

        if !self.promise_fulfillment_actions.contains_key(&promise_id) {
            errors.push(format!(
                "{}: object promise is never fulfilled by an action",
                self.context(path)
            ));
        }
        if self.duplicate_promise_fulfillments.contains(&promise_id) {
            errors.push(format!(
                "{}: object promise is fulfilled by more than one action",
                self.context(path)
            ));
        }

        if let Some(fulfiller) = self.promise_fulfillment_actions.get(&promise_id) {
            let declared = promise.get("context").and_then(Value::as_str);
            let fulfiller_context = self
                .promise_contexts
                .get(&promise_id)
                .cloned()
                .unwrap_or(None);
            if declared != fulfiller_context.as_deref() {
                errors.push(format!(
                    "{}: object promise context must match the context of the action that \
                     fulfills it (action:{})",
                    self.context(path),
                    fulfiller
                ));
            }
        }

        errors
    }

    pub(crate) fn validate_action_operation(&mut self, path: &str, action: &Value) -> Vec<String> {
        let Some(action_id) = action.get("id").map(id_string) else {
            return Vec::new();
        };
        let Some(operation) = action.get("operation").and_then(Value::as_object) else {
            return Vec::new();
        };
        if operation.contains_key("include") && operation.contains_key("exclude") {
            // mutual exclusivity is reported by the spec walk
            return Vec::new();
        }
        let Some(promise) = self
            .entity_ref(action, "object_promise", RefKind::ObjectPromise)
            .and_then(|parsed| self.resolve_parsed_ref(&parsed))
        else {
            return Vec::new();
        };
        let (Some(promise_id), Some(tag)) = (
            promise.get("id").map(id_string),
            promise
                .get("object_type")
                .and_then(Value::as_str)
                .map(str::to_string),
        ) else {
            return Vec::new();
        };
        let Some(definition) = self
            .get_field(&format!("root.object_types.{}", tag))
            .and_then(|d| d.as_object().cloned())
        else {
            return Vec::new();
        };

        let mut errors = Vec::new();

        for inclusion in ["include", "exclude"] {
            let Some(value) = operation.get(inclusion) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            let Some(fields) = value.as_array() else {
                return vec![format!(
                    "{}: expected array or null, got {}",
                    self.context(&format!("{}.operation.{}", path, inclusion)),
                    serde_json::to_string(value_kind(value)).unwrap_or_default()
                )];
            };
            for field in fields.iter().filter_map(Value::as_str) {
                if !definition.contains_key(field) {
                    errors.push(format!(
                        "{}: field does not exist on object type {}: {}",
                        self.context(&format!("{}.operation.{}", path, inclusion)),
                        tag,
                        serde_json::to_string(field).unwrap_or_default()
                    ));
                }
            }
        }

        let fulfiller = self.promise_fulfillment_actions.get(&promise_id).cloned();
        match fulfiller {
            Some(fulfiller) if fulfiller == action_id => {
                errors.extend(self.validate_create_operation(
                    path,
                    action,
                    operation,
                    &definition,
                    &tag,
                    &action_id,
                ));
            }
            Some(fulfiller) => {
                errors.extend(self.validate_edit_operation(
                    path,
                    action,
                    operation,
                    &promise_id,
                    &fulfiller,
                    &action_id,
                ));
            }
            // an unfulfilled promise is reported by fulfillment validation
            None => {}
        }

        errors
    }

    fn validate_create_operation(
        &mut self,
        path: &str,
        action: &Value,
        operation: &serde_json::Map<String, Value>,
        definition: &serde_json::Map<String, Value>,
        tag: &str,
        action_id: &str,
    ) -> Vec<String> {
        let mut errors = Vec::new();

        if let Some(defaults) = operation.get("default_values") {
            let Some(defaults) = defaults.as_object() else {
                return vec![format!(
                    "{}: expected object, got {}",
                    self.context(&format!("{}.operation.default_values", path)),
                    serde_json::to_string(value_kind(defaults)).unwrap_or_default()
                )];
            };
            for (key, value) in defaults {
                let key_path = format!("{}.operation.default_values.{}", path, key);
                let Some(field_type) = definition
                    .get(key)
                    .and_then(|d| d.get("field_type"))
                    .and_then(Value::as_str)
                else {
                    if !definition.contains_key(key) {
                        errors.push(format!(
                            "{}: field does not exist on object type: {}",
                            self.context(&key_path),
                            serde_json::to_string(tag).unwrap_or_default()
                        ));
                    }
                    continue;
                };
                match field_type {
                    "EDGE" => errors.push(format!(
                        "{}: cannot specify default value for edge here; use default_edges instead",
                        self.context(&key_path)
                    )),
                    "EDGE_COLLECTION" => errors.push(format!(
                        "{}: setting default values for edge collections is not supported",
                        self.context(&key_path)
                    )),
                    expected => match type_details_from_literal(value, None) {
                        Ok(details) => {
                            let actual = details.type_string();
                            if actual != expected {
                                errors.push(format!(
                                    "{}: expected value of type {}, got {}: {}",
                                    self.context(&format!(
                                        "{}.operation.default_values",
                                        path
                                    )),
                                    expected,
                                    actual,
                                    display_value(value)
                                ));
                            }
                        }
                        Err(message) => errors.push(format!(
                            "{}: {}",
                            self.context(&key_path),
                            message
                        )),
                    },
                }
            }
        }

        if let Some(default_edges) = operation.get("default_edges") {
            let Some(default_edges) = default_edges.as_object() else {
                return vec![format!(
                    "{}: expected object, got {}",
                    self.context(&format!("{}.operation.default_edges", path)),
                    serde_json::to_string(value_kind(default_edges)).unwrap_or_default()
                )];
            };
            for (key, value) in default_edges {
                let key_path = format!("{}.operation.default_edges.{}", path, key);
                let Some(field_definition) = definition.get(key) else {
                    errors.push(format!(
                        "{}: field does not exist on object type: {}",
                        self.context(&key_path),
                        serde_json::to_string(tag).unwrap_or_default()
                    ));
                    continue;
                };
                let Some(field_type) = field_definition.get("field_type").and_then(Value::as_str)
                else {
                    continue;
                };
                if field_type == "EDGE_COLLECTION" {
                    errors.push(format!(
                        "{}: setting default values for edge collections is not supported",
                        self.context(&key_path)
                    ));
                    continue;
                }
                if field_type != "EDGE" {
                    errors.push(format!(
                        "{}: cannot specify default value for non-edge here; use default_values \
                         instead",
                        self.context(&key_path)
                    ));
                    continue;
                }

                let Some(edge_ref) = self.entity_ref(
                    &Value::Object(default_edges.clone()),
                    key,
                    RefKind::ObjectPromise,
                ) else {
                    // ref validation reports a malformed value
                    continue;
                };
                let Some(edge_promise) = self.resolve_parsed_ref(&edge_ref) else {
                    errors.push(format!(
                        "{}: could not resolve object promise reference: {}",
                        self.context(&key_path),
                        display_value(value)
                    ));
                    continue;
                };
                let (Some(edge_promise_id), Some(edge_tag)) = (
                    edge_promise.get("id").map(id_string),
                    edge_promise.get("object_type").and_then(Value::as_str),
                ) else {
                    continue;
                };

                let expected_tag = field_definition
                    .get("object_type")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if edge_tag != expected_tag {
                    errors.push(format!(
                        "{}: object type of referenced object promise does not match the object \
                         type definition: {}; expected {}, got {}",
                        self.context(&key_path),
                        display_value(value),
                        serde_json::to_string(expected_tag).unwrap_or_default(),
                        serde_json::to_string(edge_tag).unwrap_or_default()
                    ));
                    continue;
                }

                let edge_fulfiller = self.promise_fulfillment_actions.get(&edge_promise_id);
                let fulfilled_upstream = match edge_fulfiller {
                    Some(fulfiller) => {
                        fulfiller == action_id
                            || self.action_has_ancestor(action_id, fulfiller, false)
                    }
                    None => false,
                };
                if !fulfilled_upstream {
                    errors.push(format!(
                        "{}: an ancestor of the action must fulfill the referenced object \
                         promise: {}",
                        self.context(&key_path),
                        display_value(value)
                    ));
                }
            }
        }

        if let Some(appends_ref) = self.entity_ref(
            &Value::Object(operation.clone()),
            "appends_objects_to",
            RefKind::ObjectPromise,
        ) {
            let appends_path = format!("{}.operation.appends_objects_to", path);
            let target_promise = self.resolve_parsed_ref(&appends_ref);
            let target_promise_id = target_promise
                .as_ref()
                .and_then(|p| p.get("id").map(id_string));

            // the target must be fulfilled on every path through the DAG
            let guaranteed = target_promise_id
                .as_ref()
                .and_then(|id| self.promise_fulfillment_actions.get(id))
                .map(|fulfiller| self.action_has_ancestor(action_id, fulfiller, true))
                .unwrap_or(false);
            if !guaranteed {
                errors.push(format!(
                    "{}: the referenced object promise is not guaranteed to be fulfilled by an \
                     ancestor of this action",
                    self.context(&appends_path)
                ));
            }

            let resolution_context = self
                .entity_ref(action, "context", RefKind::ThreadGroup)
                .map(|parsed| parsed.ref_id().to_string());
            let collection_type = self.resolve_type_from_object_promise_ref(
                &appends_ref.head(),
                &appends_ref.path,
                resolution_context.as_deref(),
            );
            let is_matching_collection = matches!(
                &collection_type,
                Ok(Some(details))
                    if details.is_list && details.item_tag.as_deref() == Some(tag)
            );
            if !is_matching_collection {
                errors.push(format!(
                    "{}: must reference an edge collection with the same object_type as this \
                     action's object promise",
                    self.context(&appends_path)
                ));
            }

            if let (Some(target_id), Some(collection_key)) =
                (&target_promise_id, appends_ref.path.last())
            {
                let writable_elsewhere = self
                    .settable_fields
                    .get(target_id)
                    .map(|fields| fields.contains(collection_key))
                    .unwrap_or(false);
                if writable_elsewhere {
                    errors.push(format!(
                        "{}: the referenced edge collection cannot be included in any other \
                         action's operation",
                        self.context(&appends_path)
                    ));
                }
            }

            if self.dependee_action_ids.contains(action_id) {
                errors.push(format!(
                    "{}: if this property is specified, the parent action cannot be included in \
                     any checkpoint dependencies",
                    self.context(&appends_path)
                ));
            }

            // appender and appendee must share a context
            if let Some(target_id) = &target_promise_id {
                let appender_context = self
                    .entity_ref(action, "context", RefKind::ThreadGroup)
                    .map(|parsed| parsed.head());
                let appendee_context = self
                    .promise_contexts
                    .get(target_id)
                    .cloned()
                    .unwrap_or(None);
                if appender_context != appendee_context {
                    errors.push(format!(
                        "{}: the action's context must match the context of the object promise \
                         referenced by this property ({} != {})",
                        self.context(&appends_path),
                        appender_context.as_deref().unwrap_or("None"),
                        appendee_context.as_deref().unwrap_or("None")
                    ));
                }
            }
        }

        errors
    }

    fn validate_edit_operation(
        &mut self,
        path: &str,
        action: &Value,
        operation: &serde_json::Map<String, Value>,
        promise_id: &str,
        fulfiller: &str,
        action_id: &str,
    ) -> Vec<String> {
        let mut errors = Vec::new();

        if operation.contains_key("default_values") {
            errors.push(format!(
                "{}: default values are not supported for EDIT operations",
                self.context(&format!("{}.operation.default_values", path))
            ));
        }
        if operation.contains_key("default_edges") {
            errors.push(format!(
                "{}: default edges are not supported for EDIT operations",
                self.context(&format!("{}.operation.default_edges", path))
            ));
        }
        if operation.contains_key("appends_objects_to") {
            errors.push(format!(
                "{}: this property is not supported for EDIT operations.",
                self.context(&format!("{}.operation.appends_objects_to", path))
            ));
        }

        if !self.action_has_ancestor(action_id, fulfiller, false) {
            errors.push(format!(
                "{}: for EDIT operations, an ancestor of the action must fulfill the referenced \
                 object promise: {}",
                self.context(&format!("{}.operation", path)),
                display_value(action.get("object_promise").unwrap_or(&Value::Null))
            ));
        }

        let fulfillment_context = self
            .promise_contexts
            .get(promise_id)
            .cloned()
            .unwrap_or(None);
        let edit_context = self
            .entity_ref(action, "context", RefKind::ThreadGroup)
            .map(|parsed| parsed.head());
        if edit_context != fulfillment_context {
            errors.push(format!(
                "{}: cannot edit an object promise outside of the context in which the object \
                 promise is fulfilled (fulfillment context: {})",
                self.context(path),
                fulfillment_context
                    .map(|context| serde_json::to_string(&context).unwrap_or_default())
                    .unwrap_or_else(|| "null".to_string())
            ));
        }

        errors
    }
}
