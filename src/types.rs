//! Field-type algebra
//!
//! `TypeDetails` is the resolved type of any ref, variable path, or
//! literal: whether it is a list, what the items are, and (for objects)
//! which object-type tag they carry. Nested lists are forbidden
//! throughout the system, so `is_list` is a single bit rather than a
//! nesting depth.

use crate::util::value_kind;
use serde_json::Value;
use std::fmt;

/// Boolean gate types for checkpoints and filter queries.
pub const GATE_TYPES: [&str; 5] = ["AND", "OR", "XOR", "NAND", "NOR"];

/// Scalar field types an object-type attribute can declare (edges aside).
pub const FIELD_TYPES: [&str; 6] = [
    "BOOLEAN",
    "NUMERIC",
    "STRING",
    "NUMERIC_LIST",
    "STRING_LIST",
    "BOOLEAN_LIST",
];

/// Item types permitted inside literal lists.
pub const VALID_LIST_ITEM_TYPES: [&str; 3] = ["BOOLEAN", "NUMERIC", "STRING"];

/// Milestones an action may claim. Each value may be claimed at most once
/// across the whole document.
pub const MILESTONES: [&str; 5] = [
    "REAL",
    "CLEAR_OWNERSHIP",
    "PERMANENT",
    "ADDITIONAL",
    "VERIFIABLE",
];

/// Comparison operators usable in checkpoint dependencies and pipeline
/// filters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComparisonOperator {
    Equals,
    DoesNotEqual,
    GreaterThan,
    LessThan,
    GreaterThanOrEqualTo,
    LessThanOrEqualTo,
    OneOf,
    NoneOf,
    Contains,
    DoesNotContain,
    ContainsAnyOf,
    ContainsNoneOf,
    IsSubsetOf,
    IsSupersetOf,
}

impl ComparisonOperator {
    pub const ALL: [&'static str; 14] = [
        "EQUALS",
        "DOES_NOT_EQUAL",
        "GREATER_THAN",
        "LESS_THAN",
        "GREATER_THAN_OR_EQUAL_TO",
        "LESS_THAN_OR_EQUAL_TO",
        "ONE_OF",
        "NONE_OF",
        "CONTAINS",
        "DOES_NOT_CONTAIN",
        "CONTAINS_ANY_OF",
        "CONTAINS_NONE_OF",
        "IS_SUBSET_OF",
        "IS_SUPERSET_OF",
    ];

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "EQUALS" => Self::Equals,
            "DOES_NOT_EQUAL" => Self::DoesNotEqual,
            "GREATER_THAN" => Self::GreaterThan,
            "LESS_THAN" => Self::LessThan,
            "GREATER_THAN_OR_EQUAL_TO" => Self::GreaterThanOrEqualTo,
            "LESS_THAN_OR_EQUAL_TO" => Self::LessThanOrEqualTo,
            "ONE_OF" => Self::OneOf,
            "NONE_OF" => Self::NoneOf,
            "CONTAINS" => Self::Contains,
            "DOES_NOT_CONTAIN" => Self::DoesNotContain,
            "CONTAINS_ANY_OF" => Self::ContainsAnyOf,
            "CONTAINS_NONE_OF" => Self::ContainsNoneOf,
            "IS_SUBSET_OF" => Self::IsSubsetOf,
            "IS_SUPERSET_OF" => Self::IsSupersetOf,
            _ => return None,
        })
    }
}

/// Item type of a resolved value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ItemType {
    Boolean,
    Numeric,
    String,
    Object,
    Null,
}

impl ItemType {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemType::Boolean => "BOOLEAN",
            ItemType::Numeric => "NUMERIC",
            ItemType::String => "STRING",
            ItemType::Object => "OBJECT",
            ItemType::Null => "NULL",
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The tuple (is_list, item_type, item_tag) produced by type resolution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeDetails {
    pub is_list: bool,
    pub item_type: ItemType,
    /// Object-type tag when `item_type` is `Object`
    pub item_tag: Option<String>,
}

impl TypeDetails {
    pub fn scalar(item_type: ItemType) -> Self {
        TypeDetails {
            is_list: false,
            item_type,
            item_tag: None,
        }
    }

    pub fn list_of(item_type: ItemType) -> Self {
        TypeDetails {
            is_list: true,
            item_type,
            item_tag: None,
        }
    }

    pub fn object(tag: impl Into<String>) -> Self {
        TypeDetails {
            is_list: false,
            item_type: ItemType::Object,
            item_tag: Some(tag.into()),
        }
    }

    /// A copy with `is_list` cleared; traversals and filters iterate items.
    pub fn delistified(&self) -> Self {
        TypeDetails {
            is_list: false,
            ..self.clone()
        }
    }

    /// A copy with `is_list` set.
    pub fn listified(&self) -> Self {
        TypeDetails {
            is_list: true,
            ..self.clone()
        }
    }

    pub fn matches(&self, other: &TypeDetails) -> bool {
        self.is_list == other.is_list
            && self.item_type == other.item_type
            && self.item_tag == other.item_tag
    }

    /// Display form used by pipeline diagnostics and the operand/method
    /// table: `STRING`, `NUMERIC_LIST`, `OBJECT_LIST`, bare `LIST` for a
    /// null-typed list.
    pub fn type_string(&self) -> String {
        if self.is_list {
            match self.item_type {
                ItemType::Null => "LIST".to_string(),
                other => format!("{}_LIST", other),
            }
        } else {
            self.item_type.to_string()
        }
    }

    /// Display form that names object types the way object-type
    /// definitions do: `EDGE` / `EDGE_COLLECTION`.
    pub fn field_type_string(&self) -> String {
        match (self.is_list, self.item_type) {
            (true, ItemType::Object) => "EDGE_COLLECTION".to_string(),
            (false, ItemType::Object) => "EDGE".to_string(),
            _ => self.type_string(),
        }
    }
}

impl fmt::Display for TypeDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.type_string())
    }
}

/// Infer `TypeDetails` from a literal value. `expected_type` disambiguates
/// nulls and empty lists (a null `NUMERIC_LIST` initial is still a list).
pub fn type_details_from_literal(
    value: &Value,
    expected_type: Option<&str>,
) -> Result<TypeDetails, String> {
    if value.is_null() {
        return Ok(match expected_type {
            Some(t) if t.ends_with("_LIST") => TypeDetails {
                is_list: true,
                item_type: item_type_from_name(t.trim_end_matches("_LIST")),
                item_tag: None,
            },
            Some(t) => TypeDetails {
                is_list: false,
                item_type: item_type_from_name(t),
                item_tag: None,
            },
            None => TypeDetails::scalar(ItemType::Null),
        });
    }

    let items = match value {
        Value::Array(items) => items,
        Value::Bool(_) => return Ok(TypeDetails::scalar(ItemType::Boolean)),
        Value::Number(_) => return Ok(TypeDetails::scalar(ItemType::Numeric)),
        Value::String(_) => return Ok(TypeDetails::scalar(ItemType::String)),
        other => {
            return Err(format!(
                "cannot derive field type from value of kind: {}",
                value_kind(other)
            ))
        }
    };

    let mut item_type: Option<ItemType> = None;
    for item in items {
        let this_type = match item {
            Value::Bool(_) => ItemType::Boolean,
            Value::Number(_) => ItemType::Numeric,
            Value::String(_) => ItemType::String,
            _ => {
                return Err(format!(
                    "list items must be one of the following types: {}",
                    serde_json::to_string(&VALID_LIST_ITEM_TYPES).unwrap_or_default()
                ))
            }
        };
        match item_type {
            None => item_type = Some(this_type),
            Some(t) if t != this_type => return Err("cannot mix types in list".to_string()),
            Some(_) => {}
        }
    }

    let item_type = item_type.unwrap_or_else(|| match expected_type {
        Some(t) if t.ends_with("_LIST") => item_type_from_name(t.trim_end_matches("_LIST")),
        _ => ItemType::Null,
    });

    Ok(TypeDetails {
        is_list: true,
        item_type,
        item_tag: None,
    })
}

fn item_type_from_name(name: &str) -> ItemType {
    match name {
        "BOOLEAN" => ItemType::Boolean,
        "NUMERIC" => ItemType::Numeric,
        "STRING" => ItemType::String,
        "OBJECT" | "OBJECT_LIST" | "EDGE" | "EDGE_COLLECTION" => ItemType::Object,
        _ => ItemType::Null,
    }
}

/// Does a literal initial value satisfy a declared variable type?
pub fn initial_matches_type(initial: &TypeDetails, declared: &str) -> bool {
    let type_string = initial.type_string();
    type_string == "NULL"
        || type_string == declared
        || (type_string == "LIST" && declared.ends_with("_LIST"))
}

/// The comparability matrix. Governs every comparison operand pair in
/// checkpoint dependencies and pipeline filters.
pub fn types_are_comparable(
    left: &TypeDetails,
    right: &TypeDetails,
    operator: ComparisonOperator,
) -> bool {
    use ComparisonOperator::*;

    if left.item_type == ItemType::Null || right.item_type == ItemType::Null {
        return false;
    }
    if left.item_type != right.item_type {
        return false;
    }
    if left.item_type == ItemType::Object && left.item_tag != right.item_tag {
        return false;
    }

    match (left.is_list, right.is_list) {
        (false, false) => match left.item_type {
            ItemType::Boolean => matches!(operator, Equals | DoesNotEqual),
            ItemType::Numeric => matches!(
                operator,
                Equals
                    | DoesNotEqual
                    | GreaterThan
                    | LessThan
                    | GreaterThanOrEqualTo
                    | LessThanOrEqualTo
            ),
            ItemType::String => {
                matches!(operator, Equals | DoesNotEqual | Contains | DoesNotContain)
            }
            ItemType::Object => matches!(operator, Equals | DoesNotEqual),
            ItemType::Null => false,
        },
        // scalar vs list: membership
        (false, true) => matches!(operator, OneOf | NoneOf),
        // list vs scalar: containment
        (true, false) => matches!(operator, Contains | DoesNotContain),
        (true, true) => matches!(
            operator,
            Equals
                | DoesNotEqual
                | ContainsAnyOf
                | ContainsNoneOf
                | IsSubsetOf
                | IsSupersetOf
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scalar(t: ItemType) -> TypeDetails {
        TypeDetails::scalar(t)
    }

    fn list(t: ItemType) -> TypeDetails {
        TypeDetails::list_of(t)
    }

    #[test]
    fn test_type_strings() {
        assert_eq!(scalar(ItemType::String).type_string(), "STRING");
        assert_eq!(list(ItemType::Numeric).type_string(), "NUMERIC_LIST");
        assert_eq!(list(ItemType::Null).type_string(), "LIST");
        assert_eq!(TypeDetails::object("Job").field_type_string(), "EDGE");
        assert_eq!(
            TypeDetails::object("Job").listified().field_type_string(),
            "EDGE_COLLECTION"
        );
    }

    #[test]
    fn test_literal_typing() {
        assert_eq!(
            type_details_from_literal(&json!(1.5), None).unwrap(),
            scalar(ItemType::Numeric)
        );
        assert_eq!(
            type_details_from_literal(&json!(["a", "b"]), None).unwrap(),
            list(ItemType::String)
        );
        assert_eq!(
            type_details_from_literal(&json!(null), Some("NUMERIC_LIST")).unwrap(),
            list(ItemType::Numeric)
        );
        assert!(type_details_from_literal(&json!([1, "a"]), None)
            .unwrap_err()
            .contains("cannot mix types"));
        assert!(type_details_from_literal(&json!([[1]]), None)
            .unwrap_err()
            .contains("list items must be"));
    }

    #[test]
    fn test_initial_matches() {
        let empty = type_details_from_literal(&json!([]), None).unwrap();
        assert!(initial_matches_type(&empty, "NUMERIC_LIST"));
        assert!(initial_matches_type(&empty, "STRING_LIST"));
        assert!(!initial_matches_type(&empty, "NUMERIC"));
        let null = type_details_from_literal(&json!(null), None).unwrap();
        assert!(initial_matches_type(&null, "BOOLEAN"));
    }

    #[test]
    fn test_scalar_comparability() {
        use ComparisonOperator::*;
        assert!(types_are_comparable(
            &scalar(ItemType::Boolean),
            &scalar(ItemType::Boolean),
            Equals
        ));
        assert!(!types_are_comparable(
            &scalar(ItemType::Boolean),
            &scalar(ItemType::Boolean),
            GreaterThan
        ));
        assert!(types_are_comparable(
            &scalar(ItemType::Numeric),
            &scalar(ItemType::Numeric),
            LessThanOrEqualTo
        ));
        assert!(!types_are_comparable(
            &scalar(ItemType::String),
            &scalar(ItemType::Boolean),
            Equals
        ));
    }

    #[test]
    fn test_list_comparability() {
        use ComparisonOperator::*;
        assert!(types_are_comparable(
            &scalar(ItemType::String),
            &list(ItemType::String),
            OneOf
        ));
        assert!(types_are_comparable(
            &list(ItemType::String),
            &scalar(ItemType::String),
            Contains
        ));
        assert!(types_are_comparable(
            &list(ItemType::Numeric),
            &list(ItemType::Numeric),
            IsSubsetOf
        ));
        assert!(!types_are_comparable(
            &list(ItemType::Numeric),
            &list(ItemType::String),
            IsSubsetOf
        ));
    }

    #[test]
    fn test_edge_comparability() {
        use ComparisonOperator::*;
        let edge = TypeDetails::object("Job");
        let other_edge = TypeDetails::object("Site");
        let collection = edge.listified();
        assert!(types_are_comparable(&edge, &edge, Equals));
        assert!(!types_are_comparable(&edge, &other_edge, Equals));
        assert!(types_are_comparable(&collection, &edge, Contains));
        assert!(types_are_comparable(&collection, &collection, IsSubsetOf));
        assert!(types_are_comparable(&edge, &collection, OneOf));
    }
}
