//! Collection phase
//!
//! Before the spec walk, one pass over the document builds every index the
//! cross-cutting checks need: effective checkpoints for actions and thread
//! groups (synthesizing pseudo-checkpoints where a threaded context and an
//! explicit `depends_on` must both hold), promise fulfillment, settable
//! fields, and reachability bookkeeping. Pseudo-checkpoints live only in
//! the validator's own checkpoint map; the caller's document is never
//! mutated.

use crate::refs::{parse_global_ref, RefKind, RefTarget};
use crate::validator::{id_string, Validator};
use serde_json::{json, Value};
use std::collections::BTreeSet;

impl Validator {
    pub(crate) fn collect(&mut self) {
        let Some(actions) = self
            .doc
            .get("actions")
            .and_then(Value::as_array)
            .cloned()
        else {
            return;
        };

        self.collect_thread_groups();
        self.collect_actions(&actions);
        self.collect_checkpoints();
        self.collect_unreferenced();
        self.collect_promise_fulfillment();
    }

    fn collect_thread_groups(&mut self) {
        let Some(thread_groups) = self
            .doc
            .get("thread_groups")
            .and_then(Value::as_array)
            .cloned()
        else {
            return;
        };

        for thread_group in &thread_groups {
            let Some(id) = thread_group.get("id").map(id_string) else {
                continue;
            };
            self.thread_groups.entry(id.clone()).or_default();

            if let Some(parent_ref) = self.entity_ref(thread_group, "context", RefKind::ThreadGroup)
            {
                if self.resolve_parsed_ref(&parent_ref).is_some() {
                    let parent_id = parent_ref.ref_id().to_string();
                    self.thread_groups
                        .entry(parent_id)
                        .or_default()
                        .sub_thread_group_ids
                        .push(id.clone());
                }
            }
        }

        for thread_group in &thread_groups {
            if let Some(id) = thread_group.get("id").map(id_string) {
                let mut visiting = BTreeSet::new();
                self.effective_thread_checkpoint(&id, &mut visiting);
            }
        }

        for thread_group in &thread_groups {
            if let Some(id) = thread_group.get("id").map(id_string) {
                let mut visiting = Vec::new();
                self.resolve_thread_scope(&id, &mut visiting);
            }
        }
    }

    /// The checkpoint a thread group effectively gates on: its own
    /// `depends_on` conjoined with its parent's effective checkpoint.
    /// Layers compose transitively, so a grandchild's pseudo-checkpoint
    /// may reference its parent's pseudo-checkpoint.
    fn effective_thread_checkpoint(
        &mut self,
        thread_group_id: &str,
        visiting: &mut BTreeSet<String>,
    ) -> Option<String> {
        if let Some(alias) = self.thread_group_checkpoints.get(thread_group_id) {
            return Some(alias.clone());
        }
        if !visiting.insert(thread_group_id.to_string()) {
            // context cycle; scope resolution reports it
            return None;
        }

        let thread_group = self.resolve_global_ref(&format!("thread_group:{}", thread_group_id))?;

        let own_alias = thread_group
            .get("depends_on")
            .and_then(Value::as_str)
            .and_then(|dep| self.checkpoint_alias_of_ref(dep));

        let parent_alias = self
            .entity_ref(&thread_group, "context", RefKind::ThreadGroup)
            .map(|parent| parent.ref_id().to_string())
            .and_then(|parent_id| self.effective_thread_checkpoint(&parent_id, visiting));

        let effective = match (parent_alias, own_alias) {
            (Some(parent), Some(own)) if parent != own => {
                let alias = format!("_psuedo-thread-checkpoint-{}", thread_group_id);
                self.insert_pseudo_checkpoint(&alias, &parent, &own);
                alias
            }
            (Some(parent), None) => parent,
            (_, Some(own)) => own,
            (None, None) => return None,
        };

        self.thread_group_checkpoints
            .insert(thread_group_id.to_string(), effective.clone());
        Some(effective)
    }

    fn insert_pseudo_checkpoint(&mut self, alias: &str, left_alias: &str, right_alias: &str) {
        let checkpoint = json!({
            "alias": alias,
            "gate_type": "AND",
            "dependencies": [
                {"checkpoint": format!("checkpoint:{{{}}}", left_alias)},
                {"checkpoint": format!("checkpoint:{{{}}}", right_alias)},
            ],
        });
        self.checkpoints.insert(alias.to_string(), checkpoint);
        self.pseudo_checkpoints.insert(alias.to_string());
    }

    /// Normalize a checkpoint ref to its alias. Pseudo-checkpoint aliases
    /// pass through unchanged; id-form refs resolve through the document.
    pub(crate) fn checkpoint_alias_of_ref(&self, reference: &str) -> Option<String> {
        let parsed = parse_global_ref(reference)?;
        if parsed.kind != RefKind::Checkpoint {
            return None;
        }
        match &parsed.target {
            RefTarget::Alias(alias) => Some(alias.clone()),
            RefTarget::Id(_) => self
                .resolve_parsed_ref(&parsed)?
                .get("alias")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }

    /// Checkpoint lookup that sees pseudo-checkpoints as well as document
    /// checkpoints.
    pub(crate) fn lookup_checkpoint(&self, reference: &str) -> Option<&Value> {
        let alias = self.checkpoint_alias_of_ref(reference)?;
        self.checkpoints.get(&alias)
    }

    fn collect_actions(&mut self, actions: &[Value]) {
        for action in actions {
            let Some(action_id) = action.get("id").map(id_string) else {
                continue;
            };
            self.action_order.push(action_id.clone());

            if let Some(promise_ref) = self.entity_ref(action, "object_promise", RefKind::ObjectPromise)
            {
                if let Some(promise) = self.resolve_parsed_ref(&promise_ref) {
                    if let Some(promise_id) = promise.get("id").map(id_string) {
                        self.promise_actions
                            .entry(promise_id)
                            .or_default()
                            .push(action_id.clone());
                    }
                }
            }

            self.record_settable_fields(action);

            let own_dependency = action
                .get("depends_on")
                .and_then(Value::as_str)
                .map(str::to_string);

            let Some(context_ref) = self.entity_ref(action, "context", RefKind::ThreadGroup) else {
                let alias = own_dependency
                    .as_deref()
                    .and_then(|dep| self.checkpoint_alias_of_ref(dep));
                self.action_checkpoints.insert(action_id, alias);
                continue;
            };

            if self.resolve_parsed_ref(&context_ref).is_none() {
                // unresolved context; ref validation reports it
                continue;
            }

            let thread_group_id = context_ref.ref_id().to_string();
            self.thread_groups
                .entry(thread_group_id.clone())
                .or_default()
                .action_ids
                .push(action_id.clone());
            self.threaded_action_ids.insert(action_id.clone());

            let thread_alias = self.thread_group_checkpoints.get(&thread_group_id).cloned();
            let own_alias = own_dependency
                .as_deref()
                .and_then(|dep| self.checkpoint_alias_of_ref(dep));

            let effective = match (thread_alias, own_alias) {
                (Some(thread), Some(own)) if thread != own => {
                    // the action depends on both the thread's checkpoint and
                    // its own
                    let alias = format!("_psuedo-checkpoint-{}", action_id);
                    self.insert_pseudo_checkpoint(&alias, &thread, &own);
                    Some(alias)
                }
                (Some(thread), _) => Some(thread),
                (None, own) => own,
            };
            self.action_checkpoints.insert(action_id, effective);
        }
    }

    fn collect_checkpoints(&mut self) {
        if let Some(checkpoints) = self.doc.get("checkpoints").and_then(Value::as_array).cloned() {
            for checkpoint in checkpoints {
                if let Some(alias) = checkpoint.get("alias").and_then(Value::as_str) {
                    // alias patterns forbid the `_psuedo-` prefix; a document
                    // checkpoint never displaces a synthesized one
                    if !self.pseudo_checkpoints.contains(alias) {
                        self.checkpoints.insert(alias.to_string(), checkpoint.clone());
                    }
                }
            }
        }

        // comparison operands and nested checkpoint refs, pseudo-checkpoints
        // included
        let mut nested: BTreeSet<String> = BTreeSet::new();
        for checkpoint in self.checkpoints.values() {
            let Some(dependencies) = checkpoint.get("dependencies").and_then(Value::as_array) else {
                continue;
            };
            for dependency in dependencies {
                if let Some(compare) = dependency.get("compare") {
                    for side in ["left", "right"] {
                        if let Some(action_id) = operand_action_id(compare, side) {
                            self.dependee_action_ids.insert(action_id);
                        }
                    }
                } else if let Some(reference) =
                    dependency.get("checkpoint").and_then(Value::as_str)
                {
                    if let Some(alias) = self.checkpoint_alias_of_ref(reference) {
                        nested.insert(alias);
                    } else if let Some(parsed) = parse_global_ref(reference) {
                        nested.insert(parsed.ref_id().to_string());
                    }
                }
            }
        }
        self.nested_checkpoint_aliases = nested;
    }

    fn collect_unreferenced(&mut self) {
        for (id, thread_group) in &self.thread_groups {
            // a checkpoint referencing the thread group does not count
            if thread_group.action_ids.is_empty() && thread_group.sub_thread_group_ids.is_empty() {
                self.unreferenced_thread_groups.insert(id.clone());
            }
        }

        let referenced: BTreeSet<&String> = self
            .action_checkpoints
            .values()
            .flatten()
            .chain(self.thread_group_checkpoints.values())
            .chain(self.nested_checkpoint_aliases.iter())
            .collect();

        if let Some(checkpoints) = self.doc.get("checkpoints").and_then(Value::as_array) {
            for checkpoint in checkpoints {
                if let Some(alias) = checkpoint.get("alias").and_then(Value::as_str) {
                    if !referenced.contains(&alias.to_string()) {
                        self.unreferenced_checkpoints.insert(alias.to_string());
                    }
                }
            }
        }
    }

    /// Exactly one action must fulfill each promise: the first (by
    /// document order) with no ancestor among the promise's other actions.
    fn collect_promise_fulfillment(&mut self) {
        let promise_actions = self.promise_actions.clone();
        for (promise_id, action_ids) in &promise_actions {
            for action_id in action_ids {
                let Some(action) = self.resolve_global_ref(&format!("action:{}", action_id))
                else {
                    continue;
                };
                if action.get("operation").is_none() {
                    continue;
                }

                let others: Vec<String> = action_ids
                    .iter()
                    .filter(|id| *id != action_id)
                    .cloned()
                    .collect();
                if !others.is_empty() && self.has_any_ancestor(action_id, &others) {
                    continue;
                }

                if self.promise_fulfillment_actions.contains_key(promise_id) {
                    self.duplicate_promise_fulfillments.insert(promise_id.clone());
                } else {
                    self.promise_fulfillment_actions
                        .insert(promise_id.clone(), action_id.clone());
                    let context = self
                        .entity_ref(&action, "context", RefKind::ThreadGroup)
                        .map(|r| r.head());
                    self.promise_contexts.insert(promise_id.clone(), context);
                }
            }
        }
    }

    /// Fields writable through an action's operation, recorded per promise.
    fn record_settable_fields(&mut self, action: &Value) {
        if action.get("id").is_none() {
            return;
        }
        let Some(operation) = action.get("operation").and_then(Value::as_object) else {
            return;
        };
        let Some(promise_ref) = self.entity_ref(action, "object_promise", RefKind::ObjectPromise)
        else {
            return;
        };
        let Some(promise) = self.resolve_parsed_ref(&promise_ref) else {
            return;
        };
        let Some(promise_id) = promise.get("id").map(id_string) else {
            return;
        };
        let Some(tag) = promise.get("object_type").and_then(Value::as_str) else {
            return;
        };
        let Some(definition) = self
            .get_field(&format!("root.object_types.{}", tag))
            .and_then(|d| d.as_object().cloned())
        else {
            return;
        };

        let fields = self.settable_fields.entry(promise_id).or_default();

        match (operation.get("include"), operation.get("exclude")) {
            (Some(Value::Array(included)), _) => {
                for name in included.iter().filter_map(Value::as_str) {
                    if definition.contains_key(name) {
                        fields.insert(name.to_string());
                    }
                }
            }
            (_, Some(Value::Null)) => {
                fields.extend(definition.keys().cloned());
            }
            (_, Some(Value::Array(excluded))) => {
                let excluded: BTreeSet<&str> =
                    excluded.iter().filter_map(Value::as_str).collect();
                for name in definition.keys() {
                    if !excluded.contains(name.as_str()) {
                        fields.insert(name.clone());
                    }
                }
            }
            _ => {}
        }

        if let Some(Value::Object(defaults)) = operation.get("default_values") {
            for name in defaults.keys() {
                if definition.contains_key(name) {
                    fields.insert(name.clone());
                }
            }
        }

        if let Some(Value::Object(default_edges)) = operation.get("default_edges") {
            for name in default_edges.keys() {
                let is_edge = definition
                    .get(name)
                    .and_then(|d| d.get("field_type"))
                    .and_then(Value::as_str)
                    == Some("EDGE");
                if is_edge {
                    fields.insert(name.clone());
                }
            }
        }
    }
}

/// The action id a comparison operand refers to, when its ref is an
/// action ref.
pub(crate) fn operand_action_id(compare: &Value, side: &str) -> Option<String> {
    let reference = compare.get(side)?.get("ref")?.as_str()?;
    let parsed = parse_global_ref(reference)?;
    (parsed.kind == RefKind::Action).then(|| parsed.ref_id().to_string())
}
