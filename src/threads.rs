//! Thread-group analysis
//!
//! Thread groups form a tree via `context` refs; each group's dotted
//! scope is the path of ancestor ids. Spawn sources must be list-typed
//! and fulfilled by an ancestor; spawn variables must not collide with
//! any variable visible in the scope tree. Visibility: a site can see a
//! thread group's variables iff that group's id appears in the site's
//! scope path.

use crate::refs::{is_global_ref, is_variable, parse_global_ref, RefKind};
use crate::types::TypeDetails;
use crate::validator::{id_string, Validator};
use serde_json::Value;
use std::collections::BTreeMap;

/// Per-thread-group state collected and refined during validation.
#[derive(Clone, Debug, Default)]
pub struct ThreadGroupInfo {
    /// Dotted path of ancestor ids, e.g. `0.2.5`; `None` while unresolved
    pub scope: Option<String>,
    /// Spawn variables declared by this group, with de-listified types
    pub variables: BTreeMap<String, TypeDetails>,
    pub sub_thread_group_ids: Vec<String>,
    pub action_ids: Vec<String>,
}

impl ThreadGroupInfo {
    /// A site with this scope can see `thread_group_id`'s variables iff
    /// the id is on the scope path.
    pub fn has_access_to_context(&self, thread_group_id: &str) -> bool {
        match &self.scope {
            Some(scope) => scope.split('.').any(|id| id == thread_group_id),
            None => false,
        }
    }
}

impl Validator {
    /// Resolve a thread group's scope, resolving ancestors first. Context
    /// cycles leave the scope unresolved.
    pub(crate) fn resolve_thread_scope(
        &mut self,
        thread_group_id: &str,
        visiting: &mut Vec<String>,
    ) -> Option<String> {
        if let Some(info) = self.thread_groups.get(thread_group_id) {
            if let Some(scope) = &info.scope {
                return Some(scope.clone());
            }
        }
        if visiting.iter().any(|id| id == thread_group_id) {
            return None;
        }
        visiting.push(thread_group_id.to_string());

        let thread_group =
            self.resolve_global_ref(&format!("thread_group:{}", thread_group_id))?;

        let scope = match self.entity_ref(&thread_group, "context", RefKind::ThreadGroup) {
            None => thread_group_id.to_string(),
            Some(parent) => {
                let parent_id = parent.ref_id().to_string();
                if !self.thread_groups.contains_key(&parent_id) {
                    return None;
                }
                let parent_scope = self.resolve_thread_scope(&parent_id, visiting)?;
                format!("{}.{}", parent_scope, thread_group_id)
            }
        };

        if let Some(info) = self.thread_groups.get_mut(thread_group_id) {
            info.scope = Some(scope.clone());
        }
        Some(scope)
    }

    /// Find a thread variable visible from `scope`, walking the scope path
    /// innermost-out. With `check_nested_scopes`, the whole scope tree
    /// rooted at the outermost ancestor is searched too (collision
    /// forward-check).
    pub(crate) fn find_thread_variable(
        &self,
        var_name: &str,
        scope: Option<&str>,
        check_nested_scopes: bool,
    ) -> Option<TypeDetails> {
        let scope = scope?;
        let path: Vec<&str> = scope.split('.').collect();

        for thread_group_id in path.iter().rev() {
            let info = self.thread_groups.get(*thread_group_id)?;
            if let Some(details) = info.variables.get(var_name) {
                return Some(details.clone());
            }
        }

        if check_nested_scopes {
            return self.find_in_nested_scopes(path.first()?, var_name);
        }
        None
    }

    fn find_in_nested_scopes(&self, thread_group_id: &str, var_name: &str) -> Option<TypeDetails> {
        let info = self.thread_groups.get(thread_group_id)?;
        for sub_id in &info.sub_thread_group_ids {
            if let Some(sub) = self.thread_groups.get(sub_id) {
                if let Some(details) = sub.variables.get(var_name) {
                    return Some(details.clone());
                }
            }
            if let Some(details) = self.find_in_nested_scopes(sub_id, var_name) {
                return Some(details);
            }
        }
        None
    }

    /// The thread scope visible from an entity (action or checkpoint) at a
    /// document path, via its `context` ref.
    pub(crate) fn entity_thread_scope(&self, path: &str) -> Option<String> {
        let entity = self.get_parent_entity(path)?;
        let context = self.entity_ref(&entity, "context", RefKind::ThreadGroup)?;
        self.thread_groups
            .get(context.ref_id())
            .and_then(|info| info.scope.clone())
    }

    pub(crate) fn validate_thread_group(&mut self, path: &str, field: &Value) -> Vec<String> {
        let Some(spawn) = field.get("spawn").and_then(Value::as_object) else {
            return Vec::new();
        };
        let (Some(foreach), Some(as_name)) = (
            spawn.get("foreach").and_then(Value::as_str),
            spawn.get("as").and_then(Value::as_str),
        ) else {
            // spec validation reports the missing fields
            return Vec::new();
        };
        let Some(thread_group_id) = field.get("id").map(id_string) else {
            return Vec::new();
        };

        let mut visiting = Vec::new();
        let Some(scope) = self.resolve_thread_scope(&thread_group_id, &mut visiting) else {
            return vec![format!(
                "{}: could not resolve thread scope",
                self.context(path)
            )];
        };

        let mut errors = Vec::new();

        let spawn_type = if is_global_ref(foreach) {
            let parsed = parse_global_ref(foreach);
            if let Some(parsed) = &parsed {
                if parsed.kind == RefKind::ObjectPromise {
                    let fulfiller = self
                        .resolve_parsed_ref(parsed)
                        .and_then(|promise| promise.get("id").map(id_string))
                        .and_then(|promise_id| {
                            self.promise_fulfillment_actions.get(&promise_id).cloned()
                        });
                    let is_ancestor = fulfiller
                        .map(|action_id| {
                            self.thread_group_has_ancestor(&thread_group_id, &action_id)
                        })
                        .unwrap_or(false);
                    if !is_ancestor {
                        return vec![format!(
                            "{}: the value of property \"spawn.foreach\" must reference an \
                             ancestor of \"thread_group:{}\", got \"{}\"",
                            self.context(path),
                            thread_group_id,
                            foreach
                        )];
                    }
                }
            }

            let resolution_context = self
                .entity_ref(field, "context", RefKind::ThreadGroup)
                .map(|r| r.ref_id().to_string());
            match self.resolve_type_from_global_ref(foreach, resolution_context.as_deref()) {
                Ok(details) => details,
                Err(message) => {
                    return vec![format!(
                        "{}.spawn.foreach: {}",
                        self.context(path),
                        message
                    )]
                }
            }
        } else if is_variable(foreach) {
            let segments: Vec<String> = foreach.split('.').map(str::to_string).collect();
            let Some(var_type) = self.find_thread_variable(&segments[0], Some(&scope), false)
            else {
                return vec![format!(
                    "{}.spawn.foreach: variable not found within thread scope: {}",
                    self.context(path),
                    serde_json::to_string(&segments[0]).unwrap_or_default()
                )];
            };
            match self.resolve_type_from_variable_path(&var_type, &segments[1..]) {
                Ok(details) => details,
                Err(message) => {
                    return vec![format!(
                        "{}.spawn.foreach: {}",
                        self.context(path),
                        message
                    )]
                }
            }
        } else {
            return vec![format!(
                "{}.spawn.foreach: expected global ref or thread variable, got {}",
                self.context(path),
                serde_json::to_string(foreach).unwrap_or_default()
            )];
        };

        match &spawn_type {
            None => errors.push(format!(
                "{}.spawn.foreach: could not resolve variable type: {}",
                self.context(path),
                serde_json::to_string(foreach).unwrap_or_default()
            )),
            Some(details) if !details.is_list => errors.push(format!(
                "{}.spawn.foreach: cannot spawn threads from a non-list object",
                self.context(path)
            )),
            Some(_) => {}
        }

        if self
            .find_thread_variable(as_name, Some(&scope), true)
            .is_some()
        {
            errors.push(format!(
                "{}.spawn.as: variable already defined within thread scope: {}",
                self.context(path),
                serde_json::to_string(as_name).unwrap_or_default()
            ));
        } else if errors.is_empty() {
            if let Some(details) = spawn_type {
                // spawn variables are loop variables over the source list
                if let Some(info) = self.thread_groups.get_mut(&thread_group_id) {
                    info.variables
                        .insert(as_name.to_string(), details.delistified());
                }
            }
        }

        errors
    }

    /// A checkpoint with a threaded context may only gate sites that can
    /// see that context.
    pub(crate) fn validate_dependency_scope(&mut self, path: &str, field: &Value) -> Vec<String> {
        let Some(depends_on) = field.get("depends_on").and_then(Value::as_str) else {
            return Vec::new();
        };
        let Some(checkpoint) = self
            .entity_ref(field, "depends_on", RefKind::Checkpoint)
            .and_then(|parsed| self.resolve_parsed_ref(&parsed))
        else {
            return Vec::new();
        };
        let Some(checkpoint_context) = self.entity_ref(&checkpoint, "context", RefKind::ThreadGroup)
        else {
            return Vec::new();
        };

        let out_of_scope = vec![format!(
            "{}: checkpoint with threaded context referenced out of scope: {}",
            self.context(&format!("{}.depends_on", path)),
            serde_json::to_string(depends_on).unwrap_or_default()
        )];

        let Some(field_context) = self.entity_ref(field, "context", RefKind::ThreadGroup) else {
            return out_of_scope;
        };

        let accessible = self
            .thread_groups
            .get(field_context.ref_id())
            .map(|info| info.has_access_to_context(checkpoint_context.ref_id()))
            .unwrap_or(false);
        if !accessible {
            return out_of_scope;
        }
        Vec::new()
    }

    /// Dependencies inside a checkpoint must stay within the checkpoint's
    /// own threaded scope.
    pub(crate) fn validate_checkpoint_context(&mut self, path: &str, checkpoint: &Value) -> Vec<String> {
        let checkpoint_context = self
            .entity_ref(checkpoint, "context", RefKind::ThreadGroup)
            .map(|parsed| parsed.ref_id().to_string());

        let Some(dependencies) = checkpoint.get("dependencies").and_then(Value::as_array) else {
            return Vec::new();
        };

        let has_access = |context_id: &Option<String>, target: &str| -> bool {
            context_id
                .as_deref()
                .and_then(|id| self.thread_groups.get(id))
                .map(|info| info.has_access_to_context(target))
                .unwrap_or(false)
        };

        let mut errors = Vec::new();
        for dependency in dependencies {
            if let Some(reference) = dependency.get("checkpoint").and_then(Value::as_str) {
                let Some(referenced) = self.resolve_global_ref(reference) else {
                    continue;
                };
                let Some(referenced_context) =
                    self.entity_ref(&referenced, "context", RefKind::ThreadGroup)
                else {
                    continue;
                };
                if !has_access(&checkpoint_context, referenced_context.ref_id()) {
                    errors.push(format!(
                        "{}: checkpoint with threaded context referenced out of scope: {}",
                        self.context(path),
                        serde_json::to_string(reference).unwrap_or_default()
                    ));
                }
            } else if let Some(compare) = dependency.get("compare") {
                for side in ["left", "right"] {
                    let Some(operand) = compare.get(side) else {
                        continue;
                    };
                    let Some(parsed) = self.entity_ref(operand, "ref", RefKind::Action) else {
                        continue;
                    };
                    let Some(action) = self.resolve_parsed_ref(&parsed) else {
                        continue;
                    };
                    let Some(action_context) =
                        self.entity_ref(&action, "context", RefKind::ThreadGroup)
                    else {
                        continue;
                    };
                    if !has_access(&checkpoint_context, action_context.ref_id()) {
                        errors.push(format!(
                            "{}: cannot depend on threaded action: {}",
                            self.context(path),
                            serde_json::to_string(
                                operand.get("ref").and_then(Value::as_str).unwrap_or_default()
                            )
                            .unwrap_or_default()
                        ));
                    }
                }
            }
        }
        errors
    }
}
