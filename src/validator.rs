//! The validator instance
//!
//! Owns the document tree, the spec catalog, and every index built during
//! the collection phase. All validation state is scoped to one instance;
//! nothing escapes beyond diagnostic strings.

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::pipeline::PipelineState;
use crate::spec::ValidationFn;
use crate::threads::ThreadGroupInfo;
use crate::types::TypeDetails;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

/// Descent deeper than this is rejected with a single diagnostic instead
/// of risking the stack.
pub(crate) const MAX_DEPTH: usize = 64;

/// The outcome of validating one document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    /// One diagnostic per problem, in deterministic document order
    pub errors: Vec<String>,
    /// Unused variables, use-before-assignment, advisory notes
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for error in &self.errors {
            writeln!(f, "{}", error)?;
        }
        if !self.warnings.is_empty() {
            writeln!(f, "WARNINGS:")?;
            for warning in &self.warnings {
                writeln!(f, "{}", warning)?;
            }
        }
        Ok(())
    }
}

/// Validate a document tree with a fresh validator.
pub fn validate(document: &Value) -> ValidationReport {
    Validator::new().validate(document)
}

/// Workflow document validator. Reusable: each `validate` call resets all
/// per-document state.
pub struct Validator {
    pub(crate) catalog: Catalog,
    pub(crate) doc: Value,
    pub(crate) warnings: Vec<String>,
    pub(crate) depth_exceeded: bool,

    // --- collection-phase indices ---
    /// Action ids in document order (drives cycle-scan determinism)
    pub(crate) action_order: Vec<String>,
    /// Action id -> effective checkpoint alias
    pub(crate) action_checkpoints: BTreeMap<String, Option<String>>,
    /// Thread group id -> effective checkpoint alias
    pub(crate) thread_group_checkpoints: BTreeMap<String, String>,
    /// Alias -> checkpoint object; includes synthesized pseudo-checkpoints
    pub(crate) checkpoints: BTreeMap<String, Value>,
    pub(crate) pseudo_checkpoints: BTreeSet<String>,
    pub(crate) thread_groups: BTreeMap<String, ThreadGroupInfo>,
    pub(crate) threaded_action_ids: BTreeSet<String>,
    /// Actions referenced by any checkpoint comparison operand
    pub(crate) dependee_action_ids: BTreeSet<String>,
    /// Promise id -> fields writable through some action operation
    pub(crate) settable_fields: BTreeMap<String, BTreeSet<String>>,
    /// Promise id -> all actions referencing it, in document order
    pub(crate) promise_actions: BTreeMap<String, Vec<String>>,
    /// Promise id -> the fulfilling (CREATE) action
    pub(crate) promise_fulfillment_actions: BTreeMap<String, String>,
    pub(crate) duplicate_promise_fulfillments: BTreeSet<String>,
    /// Promise id -> thread-group context ref of its fulfiller
    pub(crate) promise_contexts: BTreeMap<String, Option<String>>,
    pub(crate) unreferenced_thread_groups: BTreeSet<String>,
    pub(crate) unreferenced_checkpoints: BTreeSet<String>,
    /// Aliases referenced from inside other checkpoints' dependencies
    pub(crate) nested_checkpoint_aliases: BTreeSet<String>,

    // --- pipeline analysis state ---
    /// Pipeline path ("root.actions[N].pipeline") -> per-pipeline state
    pub(crate) pipelines: BTreeMap<String, PipelineState>,
    /// Promise id -> fields written by pipeline output
    pub(crate) aggregated_fields: BTreeMap<String, BTreeSet<String>>,
    /// Resolved `apply.from` types, consumed by `$_item` filter refs
    pub(crate) type_details_at_path: BTreeMap<String, TypeDetails>,
}

impl Validator {
    pub fn new() -> Self {
        Validator {
            catalog: Catalog::new(),
            doc: Value::Null,
            warnings: Vec::new(),
            depth_exceeded: false,
            action_order: Vec::new(),
            action_checkpoints: BTreeMap::new(),
            thread_group_checkpoints: BTreeMap::new(),
            checkpoints: BTreeMap::new(),
            pseudo_checkpoints: BTreeSet::new(),
            thread_groups: BTreeMap::new(),
            threaded_action_ids: BTreeSet::new(),
            dependee_action_ids: BTreeSet::new(),
            settable_fields: BTreeMap::new(),
            promise_actions: BTreeMap::new(),
            promise_fulfillment_actions: BTreeMap::new(),
            duplicate_promise_fulfillments: BTreeSet::new(),
            promise_contexts: BTreeMap::new(),
            unreferenced_thread_groups: BTreeSet::new(),
            unreferenced_checkpoints: BTreeSet::new(),
            nested_checkpoint_aliases: BTreeSet::new(),
            pipelines: BTreeMap::new(),
            aggregated_fields: BTreeMap::new(),
            type_details_at_path: BTreeMap::new(),
        }
    }

    /// Validate an in-memory document tree.
    pub fn validate(&mut self, document: &Value) -> ValidationReport {
        self.reset(document.clone());
        self.collect();

        let root = self.doc.clone();
        let root_spec = self.catalog.root().clone();
        let mut errors = self.validate_field("root", &root, &root_spec, 0);
        errors.extend(self.detect_circular_dependencies());

        ValidationReport {
            errors,
            warnings: std::mem::take(&mut self.warnings),
        }
    }

    /// Validate a JSON-serialized document.
    pub fn validate_json_str(&mut self, json: &str) -> Result<ValidationReport> {
        let document: Value = serde_json::from_str(json)?;
        Ok(self.validate(&document))
    }

    /// Validate a YAML-serialized document.
    pub fn validate_yaml_str(&mut self, yaml: &str) -> Result<ValidationReport> {
        let document: Value = serde_norway::from_str(yaml)?;
        Ok(self.validate(&document))
    }

    /// Validate a document read from disk. `.yaml`/`.yml` files are parsed
    /// as YAML, anything else as JSON.
    pub fn validate_file(&mut self, path: &Path) -> Result<ValidationReport> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => self.validate_yaml_str(&content),
            _ => self.validate_json_str(&content),
        }
    }

    /// The next unclaimed action id in a valid document.
    pub fn next_action_id(&mut self, document: &Value) -> Result<i64> {
        let ids = self.action_ids(document)?;
        Ok(ids.iter().max().map_or(0, |max| max + 1))
    }

    /// All action ids declared by a valid document.
    pub fn action_ids(&mut self, document: &Value) -> Result<Vec<i64>> {
        let report = self.validate(document);
        if !report.is_valid() {
            return Err(Error::Document(report.errors.join("\n")));
        }

        let mut ids = Vec::new();
        if let Some(actions) = document.get("actions").and_then(Value::as_array) {
            for action in actions {
                if let Some(id) = action.get("id").and_then(Value::as_i64) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }

    fn reset(&mut self, document: Value) {
        self.doc = document;
        self.warnings.clear();
        self.depth_exceeded = false;
        self.action_order.clear();
        self.action_checkpoints.clear();
        self.thread_group_checkpoints.clear();
        self.checkpoints.clear();
        self.pseudo_checkpoints.clear();
        self.thread_groups.clear();
        self.threaded_action_ids.clear();
        self.dependee_action_ids.clear();
        self.settable_fields.clear();
        self.promise_actions.clear();
        self.promise_fulfillment_actions.clear();
        self.duplicate_promise_fulfillments.clear();
        self.promise_contexts.clear();
        self.unreferenced_thread_groups.clear();
        self.unreferenced_checkpoints.clear();
        self.nested_checkpoint_aliases.clear();
        self.pipelines.clear();
        self.aggregated_fields.clear();
        self.type_details_at_path.clear();
    }

    /// Diagnostic prefix: the dotted path, with the innermost containing
    /// action's id appended for paths under `root.actions`.
    pub(crate) fn context(&self, path: &str) -> String {
        match self.action_id_from_path(path) {
            Some(id) => format!("{} (action id: {})", path, id),
            None => path.to_string(),
        }
    }

    fn action_id_from_path(&self, path: &str) -> Option<String> {
        if !path.starts_with("root.actions[") {
            return None;
        }
        let end = path.find(']')?;
        let action = self.get_field(&path[..=end])?;
        let id = action.get("id")?;
        Some(id_string(id))
    }

    pub(crate) fn dispatch_validation_fn(
        &mut self,
        function: ValidationFn,
        path: &str,
        field: &Value,
    ) -> Vec<String> {
        match function {
            ValidationFn::ObjectPromiseFulfillment => {
                self.validate_object_promise_fulfillment(path, field)
            }
            ValidationFn::ActionOperation => self.validate_action_operation(path, field),
            ValidationFn::DependencyScope => self.validate_dependency_scope(path, field),
            ValidationFn::CheckpointContext => self.validate_checkpoint_context(path, field),
            ValidationFn::CheckpointIsReferenced => {
                self.validate_is_referenced(path, field, "alias", "checkpoint")
            }
            ValidationFn::ThreadGroupIsReferenced => {
                self.validate_is_referenced(path, field, "id", "thread_group")
            }
            ValidationFn::ThreadGroup => self.validate_thread_group(path, field),
            ValidationFn::Comparison => self.validate_comparison(path, field),
            ValidationFn::NoAggregatedFieldDependency => {
                self.validate_no_aggregated_field_dependency(path, field)
            }
            ValidationFn::Pipeline => self.validate_pipeline(path, field),
        }
    }

    /// Checkpoints and thread groups that nothing references are defects.
    fn validate_is_referenced(
        &mut self,
        path: &str,
        field: &Value,
        id_field: &str,
        kind: &str,
    ) -> Vec<String> {
        let Some(id) = field.get(id_field) else {
            // spec validation reports the missing field
            return Vec::new();
        };
        let id = id_string(id);

        let unreferenced = match kind {
            "checkpoint" => &self.unreferenced_checkpoints,
            _ => &self.unreferenced_thread_groups,
        };
        if unreferenced.contains(&id) {
            return vec![format!(
                "{}: {} is never referenced",
                self.context(path),
                kind
            )];
        }
        Vec::new()
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

/// Canonical string form of an id value (numbers without quotes).
pub(crate) fn id_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Single-quoted list rendering used by a couple of diagnostic families.
pub(crate) fn quoted_list(items: &[String]) -> String {
    let quoted: Vec<String> = items.iter().map(|i| format!("'{}'", i)).collect();
    format!("[{}]", quoted.join(", "))
}
