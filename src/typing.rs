//! Type resolution
//!
//! Produces `TypeDetails` for refs, dotted attribute paths, variable
//! paths, local refs, and filter refs. `Ok(None)` means the path leads
//! nowhere (reported by the caller as an unresolved type); `Err` carries a
//! diagnostic such as the nested-list prohibition.

use crate::refs::{parse_global_ref, RefKind};
use crate::types::{ItemType, TypeDetails};
use crate::validator::{id_string, Validator};
use serde_json::Value;

pub(crate) const NESTED_LIST_ERROR: &str = "nested list types are not supported";

pub(crate) type TypeResult = Result<Option<TypeDetails>, String>;

impl Validator {
    /// Follow a dotted attribute path across an object type. EDGE hops to
    /// the target type; EDGE_COLLECTION additionally listifies; a second
    /// list anywhere on the path is rejected.
    pub(crate) fn resolve_type_from_object_path(&self, tag: &str, path: &[String]) -> TypeResult {
        let Some(mut definition) = self.get_field(&format!("root.object_types.{}", tag)) else {
            return Ok(None);
        };

        let mut details = TypeDetails::object(tag);

        for (index, segment) in path.iter().enumerate() {
            let Some(attribute) = definition.get(segment) else {
                return Ok(None);
            };
            let Some(field_type) = attribute.get("field_type").and_then(Value::as_str) else {
                return Ok(None);
            };

            if field_type == "EDGE" || field_type == "EDGE_COLLECTION" {
                let Some(next_tag) = attribute.get("object_type").and_then(Value::as_str) else {
                    return Ok(None);
                };
                let Some(next_definition) =
                    self.get_field(&format!("root.object_types.{}", next_tag))
                else {
                    return Ok(None);
                };

                if field_type == "EDGE_COLLECTION" {
                    if details.is_list {
                        return Err(NESTED_LIST_ERROR.to_string());
                    }
                    details = TypeDetails {
                        is_list: true,
                        item_type: ItemType::Object,
                        item_tag: Some(next_tag.to_string()),
                    };
                } else {
                    details = TypeDetails {
                        is_list: details.is_list,
                        item_type: ItemType::Object,
                        item_tag: Some(next_tag.to_string()),
                    };
                }
                definition = next_definition;
            } else {
                // scalar attribute; anything after it leads nowhere
                if index + 1 < path.len() {
                    return Ok(None);
                }
                let base = field_type.trim_end_matches("_LIST");
                let item_type = match base {
                    "BOOLEAN" => ItemType::Boolean,
                    "NUMERIC" => ItemType::Numeric,
                    "STRING" => ItemType::String,
                    _ => return Ok(None),
                };
                if field_type.ends_with("_LIST") {
                    if details.is_list {
                        return Err(NESTED_LIST_ERROR.to_string());
                    }
                    return Ok(Some(TypeDetails::list_of(item_type)));
                }
                return Ok(Some(TypeDetails {
                    is_list: details.is_list,
                    item_type,
                    item_tag: None,
                }));
            }
        }

        Ok(Some(details))
    }

    /// Resolve the type a global ref denotes, from the point of view of
    /// `resolution_context` (a thread-group id, when resolving from inside
    /// a threaded scope).
    pub(crate) fn resolve_type_from_global_ref(
        &self,
        reference: &str,
        resolution_context: Option<&str>,
    ) -> TypeResult {
        let Some(parsed) = parse_global_ref(reference) else {
            return Ok(None);
        };

        let (promise_head, path) = match parsed.kind {
            RefKind::Action => {
                // `action:N.object_promise.…` dereferences to the promise
                if parsed.path.first().map(String::as_str) != Some("object_promise") {
                    return Err(
                        "global ref resolution not implemented for action properties".to_string()
                    );
                }
                let Some(action) = self.resolve_parsed_ref(&parsed) else {
                    return Ok(None);
                };
                let Some(promise_ref) = action.get("object_promise").and_then(Value::as_str) else {
                    return Ok(None);
                };
                (promise_ref.to_string(), parsed.path[1..].to_vec())
            }
            RefKind::ObjectPromise => (parsed.head(), parsed.path.clone()),
            other => {
                return Err(format!(
                    "global ref resolution not implemented for ref type: {}",
                    other
                ))
            }
        };

        self.resolve_type_from_object_promise_ref(&promise_head, &path, resolution_context)
    }

    /// Resolve a promise ref plus attribute path. A promise fulfilled
    /// inside a thread group that the resolution context cannot see
    /// denotes the vector of per-thread instances, so the type listifies.
    pub(crate) fn resolve_type_from_object_promise_ref(
        &self,
        promise_ref: &str,
        path: &[String],
        resolution_context: Option<&str>,
    ) -> TypeResult {
        let Some(promise) = self.resolve_global_ref(promise_ref) else {
            return Ok(None);
        };
        let Some(promise_id) = promise.get("id").map(id_string) else {
            return Ok(None);
        };
        let Some(promise_context) = self.promise_contexts.get(&promise_id) else {
            // unfulfilled promise; fulfillment validation reports it
            return Ok(None);
        };

        let promise_context_id = promise_context
            .as_deref()
            .and_then(parse_global_ref)
            .map(|r| r.ref_id().to_string());

        let is_promise_list = match &promise_context_id {
            None => false,
            Some(context_id) => !resolution_context
                .and_then(|rc| self.thread_groups.get(rc))
                .map(|tg| tg.has_access_to_context(context_id))
                .unwrap_or(false),
        };

        if !path.is_empty() {
            let Some(tag) = promise.get("object_type").and_then(Value::as_str) else {
                return Ok(None);
            };
            let Some(details) = self.resolve_type_from_object_path(tag, path)? else {
                return Ok(None);
            };
            if is_promise_list {
                if details.is_list {
                    return Err(NESTED_LIST_ERROR.to_string());
                }
                return Ok(Some(details.listified()));
            }
            return Ok(Some(details));
        }

        match promise.get("object_type").and_then(Value::as_str) {
            Some(tag) if self.get_field(&format!("root.object_types.{}", tag)).is_some() => {
                Ok(Some(TypeDetails {
                    is_list: is_promise_list,
                    item_type: ItemType::Object,
                    item_tag: Some(tag.to_string()),
                }))
            }
            _ => Err(format!(
                "could not resolve object type of object promise: {}",
                promise_id
            )),
        }
    }

    /// Resolve a dotted path on top of an already-resolved variable type.
    pub(crate) fn resolve_type_from_variable_path(
        &self,
        var_type: &TypeDetails,
        path: &[String],
    ) -> TypeResult {
        if path.is_empty() {
            return Ok(Some(var_type.clone()));
        }
        match (&var_type.item_type, &var_type.item_tag) {
            (ItemType::Object, Some(tag)) => {
                let Some(details) = self.resolve_type_from_object_path(tag, path)? else {
                    return Ok(None);
                };
                if var_type.is_list {
                    if details.is_list {
                        return Err(NESTED_LIST_ERROR.to_string());
                    }
                    return Ok(Some(details.listified()));
                }
                Ok(Some(details))
            }
            _ => Err(format!(
                "cannot resolve path from non-object type: {}",
                var_type.type_string()
            )),
        }
    }

    /// `$_object[.path]` resolves against the enclosing action's promised
    /// object type.
    pub(crate) fn resolve_type_from_local_ref(&self, path: &str, local_ref: &str) -> TypeResult {
        let segments: Vec<String> = local_ref.split('.').map(str::to_string).collect();
        if segments[0] != "$_object" {
            return Err(format!("local ref type not implemented: {}", segments[0]));
        }

        let Some(action) = self.get_parent_entity(path) else {
            return Ok(None);
        };
        let Some(promise_ref) = action.get("object_promise").and_then(Value::as_str) else {
            return Ok(None);
        };
        let Some(promise) = self.resolve_global_ref(promise_ref) else {
            return Ok(None);
        };
        let Some(tag) = promise.get("object_type").and_then(Value::as_str) else {
            return Ok(None);
        };

        if segments.len() == 1 {
            return Ok(Some(TypeDetails::object(tag)));
        }
        self.resolve_type_from_object_path(tag, &segments[1..])
    }

    /// `$_item[.path]` de-listifies the enclosing `apply.from` type, which
    /// was resolved first via property validation priority.
    pub(crate) fn resolve_type_from_filter_ref(
        &self,
        path: &str,
        filter_ref: &str,
    ) -> Option<TypeDetails> {
        let mut segments: Vec<&str> = path.split('.').collect();
        while let Some(last) = segments.last() {
            if last.starts_with("apply[") && last.ends_with(']') {
                break;
            }
            segments.pop();
        }
        if segments.is_empty() {
            return None;
        }

        let from_path = format!("{}.from", segments.join("."));
        let from_type = self.type_details_at_path.get(&from_path)?;
        if !from_type.is_list {
            return None;
        }
        let item_type = from_type.delistified();

        let ref_segments: Vec<String> = filter_ref.split('.').map(str::to_string).collect();
        if ref_segments.len() > 1 {
            let tag = item_type.item_tag.as_deref()?;
            return self
                .resolve_type_from_object_path(tag, &ref_segments[1..])
                .ok()
                .flatten();
        }
        Some(item_type)
    }

    /// The object-type tag promised by an action.
    pub(crate) fn resolve_tag_from_action(&self, action: &Value) -> Option<String> {
        let promise_ref = action.get("object_promise").and_then(Value::as_str)?;
        let promise = self.resolve_global_ref(promise_ref)?;
        promise
            .get("object_type")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}
