//! Shared document fixtures for integration tests
#![allow(dead_code)]

use serde_json::{json, Value};

/// A minimal valid document: one party, one object type, empty entity
/// collections.
pub fn basic_schema() -> Value {
    json!({
        "standard": "basic_test_schema",
        "parties": [{"id": 0, "name": "Project"}],
        "object_types": {
            "Placeholder": {
                "completed": {"field_type": "BOOLEAN"},
                "name": {"field_type": "STRING"},
                "number": {"field_type": "NUMERIC"},
                "numbers": {"field_type": "NUMERIC_LIST"},
                "edge": {"field_type": "EDGE", "object_type": "Placeholder"},
                "objects": {"field_type": "EDGE_COLLECTION", "object_type": "Placeholder"},
            }
        },
        "object_promises": [],
        "actions": [],
        "checkpoints": [],
    })
}

pub fn object_promise(id: u64) -> Value {
    json!({
        "id": id,
        "name": format!("promise-{}", id),
        "object_type": "Placeholder",
    })
}

pub fn action(id: u64) -> Value {
    json!({
        "id": id,
        "object_promise": format!("object_promise:{}", id),
        "party": "party:{Project}",
        "operation": {"include": ["completed"]},
    })
}

/// `basic_schema` plus `count` promises and the actions fulfilling them.
pub fn basic_schema_with_actions(count: u64) -> Value {
    let mut schema = basic_schema();
    for id in 0..count {
        schema["object_promises"]
            .as_array_mut()
            .unwrap()
            .push(object_promise(id));
        schema["actions"].as_array_mut().unwrap().push(action(id));
    }
    schema
}

/// A dependency comparing `action:<id>`'s promised `completed` field to
/// `true`.
pub fn dependency(action_id: u64) -> Value {
    json!({
        "compare": {
            "left": {"ref": format!("action:{}.object_promise.completed", action_id)},
            "operator": "EQUALS",
            "right": {"value": true},
        },
    })
}

pub fn checkpoint(id: u64, alias: &str, num_dependencies: u64) -> Value {
    let dependencies: Vec<Value> = (0..num_dependencies).map(dependency).collect();
    let mut value = json!({
        "id": id,
        "alias": alias,
        "dependencies": dependencies,
    });
    if num_dependencies >= 2 {
        value["gate_type"] = json!("AND");
    }
    value
}

/// A thread group spawning over `object_promise:0.numbers`.
pub fn thread_group(id: u64, depends_on: Option<&str>) -> Value {
    let mut value = json!({
        "id": id,
        "spawn": {
            "foreach": "object_promise:0.numbers",
            "as": "$number",
        },
    });
    if let Some(alias) = depends_on {
        value["depends_on"] = json!(format!("checkpoint:{{{}}}", alias));
    }
    value
}

pub fn push(schema: &mut Value, key: &str, item: Value) {
    schema[key].as_array_mut().unwrap().push(item);
}

pub fn validate(schema: &Value) -> flowspec::ValidationReport {
    flowspec::validate(schema)
}

pub fn errors(schema: &Value) -> Vec<String> {
    validate(schema).errors
}
