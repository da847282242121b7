//! Dependency-graph analysis over the checkpoint DAG
//!
//! Ancestry queries walk an action's (or thread group's) effective
//! checkpoint: comparison operands contribute their referenced actions as
//! direct ancestors, checkpoint references recurse. Under a guarantee
//! query, OR gates only satisfy the ancestor when every branch
//! independently reaches it. Cycle detection is a depth-first scan with a
//! path set, entered from every action in document order.

use crate::collect::operand_action_id;
use crate::validator::Validator;
use serde_json::Value;
use std::collections::BTreeSet;

const THREADED_CONTEXT_NOTE: &str = "; NOTE: actions with threaded context implicitly depend on \
     the referenced thread group's checkpoint (ThreadGroup.depends_on)";

impl Validator {
    /// Does the action's dependency graph reach `ancestor_id`? With
    /// `guarantee`, every branch of any OR gate on the way must reach it.
    pub(crate) fn action_has_ancestor(
        &self,
        action_id: &str,
        ancestor_id: &str,
        guarantee: bool,
    ) -> bool {
        let Some(Some(alias)) = self.action_checkpoints.get(action_id) else {
            return false;
        };
        let mut visited = Vec::new();
        self.checkpoint_reaches(alias, ancestor_id, guarantee, &mut visited)
    }

    pub(crate) fn thread_group_has_ancestor(
        &self,
        thread_group_id: &str,
        ancestor_id: &str,
    ) -> bool {
        let Some(alias) = self.thread_group_checkpoints.get(thread_group_id) else {
            return false;
        };
        let mut visited = Vec::new();
        self.checkpoint_reaches(alias, ancestor_id, false, &mut visited)
    }

    /// Any of `candidates` (excluding the action itself) an ancestor?
    pub(crate) fn has_any_ancestor(&self, action_id: &str, candidates: &[String]) -> bool {
        candidates
            .iter()
            .filter(|candidate| candidate.as_str() != action_id)
            .any(|candidate| self.action_has_ancestor(action_id, candidate, false))
    }

    fn checkpoint_reaches(
        &self,
        alias: &str,
        ancestor_id: &str,
        guarantee: bool,
        visited: &mut Vec<String>,
    ) -> bool {
        if visited.iter().any(|seen| seen == alias) {
            return false;
        }
        visited.push(alias.to_string());

        let Some(checkpoint) = self.checkpoints.get(alias) else {
            // broken checkpoint ref; reported elsewhere, do not cascade
            return true;
        };

        let check_all_branches = guarantee
            && checkpoint.get("gate_type").and_then(Value::as_str) == Some("OR");

        let Some(dependencies) = checkpoint.get("dependencies").and_then(Value::as_array) else {
            return true;
        };

        for dependency in dependencies {
            let branch_reaches = if let Some(compare) = dependency.get("compare") {
                ["left", "right"]
                    .iter()
                    .filter_map(|side| operand_action_id(compare, side))
                    .any(|referenced| {
                        if referenced == ancestor_id {
                            return true;
                        }
                        match self.action_checkpoints.get(&referenced) {
                            Some(Some(next_alias)) => self.checkpoint_reaches(
                                next_alias,
                                ancestor_id,
                                guarantee,
                                visited,
                            ),
                            _ => false,
                        }
                    })
            } else if let Some(reference) = dependency.get("checkpoint").and_then(Value::as_str) {
                match self.checkpoint_alias_of_ref(reference) {
                    Some(next_alias) => {
                        self.checkpoint_reaches(&next_alias, ancestor_id, guarantee, visited)
                    }
                    // broken ref; do not cascade
                    None => true,
                }
            } else {
                false
            };

            if check_all_branches {
                if !branch_reaches {
                    return false;
                }
            } else if branch_reaches {
                return true;
            }
        }

        check_all_branches
    }

    /// One diagnostic for the first dependency cycle found, if any.
    pub(crate) fn detect_circular_dependencies(&self) -> Vec<String> {
        let mut visited = BTreeSet::new();
        for action_id in &self.action_order {
            let errors = self.explore_action(action_id, &mut visited, &[]);
            if !errors.is_empty() {
                return errors;
            }
        }
        Vec::new()
    }

    fn explore_action(
        &self,
        action_id: &str,
        visited: &mut BTreeSet<String>,
        dependency_path: &[String],
    ) -> Vec<String> {
        if dependency_path.iter().any(|id| id == action_id) {
            let mut error = if dependency_path.len() > 1 {
                format!(
                    "Circular dependency detected (dependency path: [{}])",
                    dependency_path.join(", ")
                )
            } else {
                format!(
                    "An action cannot have itself as a dependency (action:{})",
                    action_id
                )
            };
            if dependency_path
                .iter()
                .any(|id| self.threaded_action_ids.contains(id))
            {
                error.push_str(THREADED_CONTEXT_NOTE);
            }
            return vec![error];
        }

        if !visited.insert(action_id.to_string()) {
            return Vec::new();
        }

        let Some(Some(alias)) = self.action_checkpoints.get(action_id) else {
            return Vec::new();
        };
        let Some(checkpoint) = self.checkpoints.get(alias) else {
            return Vec::new();
        };

        let mut path = dependency_path.to_vec();
        path.push(action_id.to_string());

        let errors = self.explore_checkpoint(checkpoint, visited, &path);
        errors.into_iter().take(1).collect()
    }

    fn explore_checkpoint(
        &self,
        checkpoint: &Value,
        visited: &mut BTreeSet<String>,
        dependency_path: &[String],
    ) -> Vec<String> {
        let Some(dependencies) = checkpoint.get("dependencies").and_then(Value::as_array) else {
            return Vec::new();
        };

        for dependency in dependencies {
            if let Some(compare) = dependency.get("compare") {
                for side in ["left", "right"] {
                    let Some(reference) = compare
                        .get(side)
                        .and_then(|operand| operand.get("ref"))
                        .and_then(Value::as_str)
                    else {
                        continue;
                    };

                    let errors = if crate::refs::is_variable(reference) {
                        // a thread variable makes the thread group's own
                        // checkpoint an implicit dependency
                        self.explore_implicit_thread_dependency(
                            checkpoint,
                            visited,
                            dependency_path,
                        )
                    } else if let Some(action_id) = operand_action_id(compare, side) {
                        self.explore_action(&action_id, visited, dependency_path)
                    } else {
                        Vec::new()
                    };

                    if !errors.is_empty() {
                        return errors;
                    }
                }
            } else if let Some(reference) = dependency.get("checkpoint").and_then(Value::as_str) {
                let Some(nested) = self.lookup_checkpoint(reference) else {
                    // broken ref; reported elsewhere
                    return Vec::new();
                };
                let errors = self.explore_checkpoint(nested, visited, dependency_path);
                if !errors.is_empty() {
                    return errors;
                }
            }
        }

        Vec::new()
    }

    fn explore_implicit_thread_dependency(
        &self,
        checkpoint: &Value,
        visited: &mut BTreeSet<String>,
        dependency_path: &[String],
    ) -> Vec<String> {
        let Some(context) = self.entity_ref(checkpoint, "context", crate::refs::RefKind::ThreadGroup)
        else {
            return Vec::new();
        };
        let Some(alias) = self.thread_group_checkpoints.get(context.ref_id()) else {
            return Vec::new();
        };
        let Some(thread_checkpoint) = self.checkpoints.get(alias) else {
            return Vec::new();
        };
        self.explore_checkpoint(thread_checkpoint, visited, dependency_path)
    }
}
