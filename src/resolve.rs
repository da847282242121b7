//! Document lookups: dotted-path traversal and global-ref resolution
//!
//! Paths are parsed into typed segments once per lookup; a leading `root`
//! segment rebases traversal at the document root. Global refs resolve
//! through each entity kind's ref config (which collection to search, and
//! which field backs `kind:{alias}` lookups).

use crate::refs::{parse_global_ref, split_path, GlobalRef, RefKind, RefTarget, Seg};
use crate::validator::{id_string, Validator};
use serde_json::Value;

impl Validator {
    /// Value at a dotted path from the document root.
    pub(crate) fn get_field(&self, path: &str) -> Option<Value> {
        self.get_field_at(&self.doc, path)
    }

    /// Value at a dotted path from `start`. A `root` segment rebases at
    /// the document root.
    pub(crate) fn get_field_at(&self, start: &Value, path: &str) -> Option<Value> {
        let mut current = start;
        for seg in split_path(path) {
            match seg {
                Seg::Name(name) if name == "root" => current = &self.doc,
                Seg::Name(name) => current = current.as_object()?.get(&name)?,
                Seg::Indexed(name, index) => {
                    let list = if name.is_empty() {
                        current
                    } else {
                        current.as_object()?.get(&name)?
                    };
                    current = list.as_array()?.get(index)?;
                }
            }
        }
        Some(current.clone())
    }

    /// The object one level up from a dotted path.
    pub(crate) fn get_parent_object(&self, path: &str) -> Option<Value> {
        let (parent, _) = path.rsplit_once('.')?;
        self.get_field(parent)
    }

    /// The entity two segments in: `root.actions[0].…` -> the action.
    pub(crate) fn get_parent_entity(&self, path: &str) -> Option<Value> {
        let segs: Vec<&str> = path.splitn(3, '.').collect();
        if segs.len() < 2 {
            return None;
        }
        self.get_field(&format!("{}.{}", segs[0], segs[1]))
    }

    /// Resolve `kind:id` / `kind:{alias}` to the referenced entity.
    pub(crate) fn resolve_global_ref(&self, reference: &str) -> Option<Value> {
        let parsed = parse_global_ref(reference)?;
        self.resolve_parsed_ref(&parsed)
    }

    pub(crate) fn resolve_parsed_ref(&self, parsed: &GlobalRef) -> Option<Value> {
        let config = self.catalog.ref_config(parsed.kind)?;
        let collection = self.get_field(&config.collection)?;
        let items = collection.as_array()?;

        let (field, wanted) = match &parsed.target {
            RefTarget::Id(id) => ("id".to_string(), id.clone()),
            RefTarget::Alias(alias) => (config.alias_field?, alias.clone()),
        };

        items
            .iter()
            .find(|item| {
                item.get(&field)
                    .map(|v| id_string(v) == wanted)
                    .unwrap_or(false)
            })
            .cloned()
    }

    /// Does `obj[key]` hold a global ref of the given kind? Returns the
    /// parsed ref when it does.
    pub(crate) fn entity_ref(&self, obj: &Value, key: &str, kind: RefKind) -> Option<GlobalRef> {
        let value = obj.get(key)?.as_str()?;
        let parsed = parse_global_ref(value)?;
        (parsed.kind == kind).then_some(parsed)
    }

    /// Resolve `{_parent}` prefixes and `{$var}` tokens in a spec path.
    /// Each leading `{_parent}` pops one segment from the current path;
    /// unresolvable variables substitute the reserved keyword `ERROR` so
    /// validation runs to completion.
    pub(crate) fn resolve_path_tokens(
        &self,
        current_path: &str,
        target: &str,
        spec_vars: &std::collections::BTreeMap<String, String>,
    ) -> String {
        let mut base: Vec<&str> = current_path.split('.').collect();
        let mut rest: Vec<String> = Vec::new();

        let mut segments = target.split('.').peekable();
        while segments.peek() == Some(&"{_parent}") {
            segments.next();
            base.pop();
        }
        let popped = target.starts_with("{_parent}");

        for segment in segments {
            if segment.starts_with("{$") && segment.ends_with('}') {
                let var = &segment[1..segment.len() - 1];
                rest.push(
                    spec_vars
                        .get(var)
                        .cloned()
                        .unwrap_or_else(|| "ERROR".to_string()),
                );
            } else {
                rest.push(segment.to_string());
            }
        }

        if popped {
            let mut joined: Vec<String> = base.iter().map(|s| s.to_string()).collect();
            joined.extend(rest);
            joined.join(".")
        } else {
            rest.join(".")
        }
    }
}
