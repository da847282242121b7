//! Reference grammar
//!
//! Five reference forms appear in workflow documents:
//!
//! | Form              | Pattern                  |
//! |-------------------|--------------------------|
//! | Global by id      | `kind:<integer>`         |
//! | Global by alias   | `kind:{<alias>}`         |
//! | Variable          | `$name[.path]`           |
//! | Local variable    | `$_name[.path]`          |
//! | Filter item       | `$_item[.path]`          |
//!
//! Global refs name one of five entity kinds and may carry a dotted path
//! that traverses attributes of the referenced entity.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

/// `kind:id` or `kind:{alias}`, optionally followed by a dotted path.
static GLOBAL_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(party|object_promise|action|checkpoint|thread_group):(?:\{([^{}]+)\}|(\d+))(?:\.(.+))?$",
    )
    .expect("global ref pattern")
});

/// Variables begin with `$`, but not the reserved `$_` or the invalid `$.`
static VARIABLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\$[^_.].*$").expect("variable pattern"));

/// `$_` prefix is reserved for local variables
static LOCAL_VARIABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\$_.+$").expect("local variable pattern"));

/// The filter loop variable inside `apply.filter`
static FILTER_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\$_item(\..+)?$").expect("filter ref pattern"));

/// Hex color code
static HEX_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#(?:[0-9a-fA-F]{3}){1,2}$").expect("hex code pattern"));

/// Aliases cannot include `_`, `{`, `}`, or `:` (avoids ref parsing issues)
static ALIAS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^_{}:]+$").expect("alias pattern"));

/// No `.` characters (variable names, output sources)
static DOTLESS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^.]*$").expect("dotless pattern"));

/// The closed set of string patterns referenced by specs. Reifying them as
/// an enum keeps specs clonable while the compiled regexes stay shared.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NamedPattern {
    Variable,
    LocalVariable,
    FilterRef,
    HexCode,
    Alias,
    Dotless,
}

impl NamedPattern {
    pub fn regex(self) -> &'static Regex {
        match self {
            NamedPattern::Variable => &VARIABLE,
            NamedPattern::LocalVariable => &LOCAL_VARIABLE,
            NamedPattern::FilterRef => &FILTER_REF,
            NamedPattern::HexCode => &HEX_CODE,
            NamedPattern::Alias => &ALIAS,
            NamedPattern::Dotless => &DOTLESS,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            NamedPattern::Variable => "variable name",
            NamedPattern::LocalVariable => "local variable name",
            NamedPattern::FilterRef => "filter ref",
            NamedPattern::HexCode => "hex color code",
            NamedPattern::Alias => "alias",
            NamedPattern::Dotless => "cannot include the . character",
        }
    }

    pub fn is_match(self, value: &str) -> bool {
        self.regex().is_match(value)
    }
}

/// The entity kinds a global ref can name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefKind {
    Party,
    ObjectPromise,
    Action,
    Checkpoint,
    ThreadGroup,
    /// `$_name` — the local object / party of the enclosing action
    LocalRef,
    /// `$_item` — the filter loop variable
    FilterRef,
}

impl RefKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RefKind::Party => "party",
            RefKind::ObjectPromise => "object_promise",
            RefKind::Action => "action",
            RefKind::Checkpoint => "checkpoint",
            RefKind::ThreadGroup => "thread_group",
            RefKind::LocalRef => "local_ref",
            RefKind::FilterRef => "filter_ref",
        }
    }

    fn from_entity_name(name: &str) -> Option<Self> {
        match name {
            "party" => Some(RefKind::Party),
            "object_promise" => Some(RefKind::ObjectPromise),
            "action" => Some(RefKind::Action),
            "checkpoint" => Some(RefKind::Checkpoint),
            "thread_group" => Some(RefKind::ThreadGroup),
            _ => None,
        }
    }
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a global ref identifies its target within the kind's collection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefTarget {
    Id(String),
    Alias(String),
}

/// A parsed `kind:id` / `kind:{alias}` reference with its trailing path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GlobalRef {
    pub kind: RefKind,
    pub target: RefTarget,
    /// Dotted path segments after the ref head, e.g. `object_promise.completed`
    pub path: Vec<String>,
}

impl GlobalRef {
    /// The id or alias, without braces.
    pub fn ref_id(&self) -> &str {
        match &self.target {
            RefTarget::Id(id) => id,
            RefTarget::Alias(alias) => alias,
        }
    }

    /// The `kind:id` / `kind:{alias}` head without the trailing path.
    pub fn head(&self) -> String {
        match &self.target {
            RefTarget::Id(id) => format!("{}:{}", self.kind, id),
            RefTarget::Alias(alias) => format!("{}:{{{}}}", self.kind, alias),
        }
    }
}

/// Parse a global reference; `None` if the string is not one.
pub fn parse_global_ref(value: &str) -> Option<GlobalRef> {
    let caps = GLOBAL_REF.captures(value)?;
    let kind = RefKind::from_entity_name(caps.get(1)?.as_str())?;
    let target = if let Some(alias) = caps.get(2) {
        RefTarget::Alias(alias.as_str().to_string())
    } else {
        RefTarget::Id(caps.get(3)?.as_str().to_string())
    };
    let path = caps
        .get(4)
        .map(|m| m.as_str().split('.').map(str::to_string).collect())
        .unwrap_or_default();
    Some(GlobalRef { kind, target, path })
}

pub fn is_global_ref(value: &str) -> bool {
    GLOBAL_REF.is_match(value)
}

pub fn is_variable(value: &str) -> bool {
    VARIABLE.is_match(value)
}

pub fn is_local_variable(value: &str) -> bool {
    LOCAL_VARIABLE.is_match(value)
}

pub fn is_filter_ref(value: &str) -> bool {
    FILTER_REF.is_match(value)
}

/// One segment of a document path: a name or a name with an index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Seg {
    Name(String),
    Indexed(String, usize),
}

static INDEXED_SEG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\w*)\[(\d+)\]$").expect("indexed segment pattern"));

/// Split a dotted document path into typed segments. `parties[0]` becomes
/// `Indexed("parties", 0)`.
pub fn split_path(path: &str) -> Vec<Seg> {
    path.split('.')
        .filter(|s| !s.is_empty())
        .map(|s| match INDEXED_SEG.captures(s) {
            Some(caps) => Seg::Indexed(caps[1].to_string(), caps[2].parse().unwrap_or(0)),
            None => Seg::Name(s.to_string()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id_ref() {
        let r = parse_global_ref("action:7.object_promise.completed").unwrap();
        assert_eq!(r.kind, RefKind::Action);
        assert_eq!(r.target, RefTarget::Id("7".into()));
        assert_eq!(r.path, vec!["object_promise", "completed"]);
        assert_eq!(r.head(), "action:7");
    }

    #[test]
    fn test_parse_alias_ref() {
        let r = parse_global_ref("checkpoint:{depends-on-0}").unwrap();
        assert_eq!(r.kind, RefKind::Checkpoint);
        assert_eq!(r.target, RefTarget::Alias("depends-on-0".into()));
        assert!(r.path.is_empty());
        assert_eq!(r.ref_id(), "depends-on-0");
    }

    #[test]
    fn test_reject_non_refs() {
        assert!(parse_global_ref("actions:0").is_none());
        assert!(parse_global_ref("action:").is_none());
        assert!(parse_global_ref("$variable").is_none());
        assert!(!is_global_ref("party"));
    }

    #[test]
    fn test_variable_patterns() {
        assert!(is_variable("$count"));
        assert!(!is_variable("$_count"));
        assert!(!is_variable("$.count"));
        assert!(is_local_variable("$_object"));
        assert!(is_local_variable("$_object.completed"));
        assert!(is_filter_ref("$_item"));
        assert!(is_filter_ref("$_item.amount"));
        assert!(!is_filter_ref("$_items"));
    }

    #[test]
    fn test_alias_pattern() {
        assert!(NamedPattern::Alias.is_match("depends-on-0"));
        assert!(!NamedPattern::Alias.is_match("has_underscore"));
        assert!(!NamedPattern::Alias.is_match("has:colon"));
    }

    #[test]
    fn test_split_path() {
        assert_eq!(
            split_path("root.actions[2].operation"),
            vec![
                Seg::Name("root".into()),
                Seg::Indexed("actions".into(), 2),
                Seg::Name("operation".into()),
            ]
        );
    }
}
