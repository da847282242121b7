//! Smoke test — entry points, determinism, and a fully featured document

mod common;

use common::*;
use flowspec::Validator;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::io::Write;

/// A document exercising every entity kind at once.
fn full_document() -> serde_json::Value {
    let mut schema = basic_schema_with_actions(3);
    schema["terms"] = json!([
        {"name": "promise", "description": "a typed placeholder for a future object"},
    ]);
    push(&mut schema, "parties", json!({"id": 1, "name": "Auditor", "hex_code": "#0366d6"}));
    push(&mut schema, "checkpoints", checkpoint(0, "depends-on-0", 1));
    schema["thread_groups"] = json!([{
        "id": 0,
        "description": "one thread per tracked number",
        "depends_on": "checkpoint:{depends-on-0}",
        "spawn": {"foreach": "object_promise:0.numbers", "as": "$number"},
    }]);
    schema["actions"][1]["context"] = json!("thread_group:0");
    schema["object_promises"][1]["context"] = json!("thread_group:0");
    schema["actions"][1]["party"] = json!("party:{Auditor}");
    schema["actions"][1]["milestones"] = json!(["REAL"]);
    schema["actions"][2]["depends_on"] = json!("checkpoint:{depends-on-0}");
    schema["actions"][2]["steps"] = json!([
        {"title": "Review", "description": "check the numbers"},
    ]);
    schema["actions"][2]["pipeline"] = json!({
        "object_promise": "object_promise:2",
        "variables": [
            {"name": "$total", "type": "NUMERIC", "initial": 0},
        ],
        "traverse": [{
            "ref": "object_promise:0.objects",
            "foreach": {
                "as": "$obj",
                "apply": [
                    {"from": "$obj.number", "method": "ADD", "to": "$total"},
                ],
            },
        }],
        "output": [
            {"from": "$total", "to": "number"},
        ],
    });
    schema
}

#[test]
fn smoke_test_full_document_is_valid() {
    let report = validate(&full_document());
    assert!(report.is_valid(), "{:?}", report.errors);
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
}

#[test]
fn smoke_test_determinism() {
    let mut schema = full_document();
    // introduce a handful of unrelated defects
    schema["actions"][0]["party"] = json!("party:{Nobody}");
    schema["object_promises"][1]["object_type"] = json!("Unknown");
    push(&mut schema, "checkpoints", checkpoint(1, "unreferenced", 1));

    let first = validate(&schema);
    let second = validate(&schema);
    assert_eq!(first.errors, second.errors);
    assert_eq!(first.warnings, second.warnings);
    assert!(!first.errors.is_empty());
}

#[test]
fn smoke_test_json_and_yaml_agree() {
    let document = full_document();
    let json_text = serde_json::to_string(&document).unwrap();
    let yaml_text = serde_norway::to_string(&document).unwrap();

    let mut validator = Validator::new();
    let from_json = validator.validate_json_str(&json_text).unwrap();
    let from_yaml = validator.validate_yaml_str(&yaml_text).unwrap();
    assert_eq!(from_json.errors, from_yaml.errors);
    assert_eq!(from_json.warnings, from_yaml.warnings);
}

#[test]
fn smoke_test_file_entry_point() {
    let document = full_document();

    let mut json_file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    json_file
        .write_all(serde_json::to_string(&document).unwrap().as_bytes())
        .unwrap();
    let mut yaml_file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    yaml_file
        .write_all(serde_norway::to_string(&document).unwrap().as_bytes())
        .unwrap();

    let mut validator = Validator::new();
    assert!(validator.validate_file(json_file.path()).unwrap().is_valid());
    assert!(validator.validate_file(yaml_file.path()).unwrap().is_valid());
}

#[test]
fn smoke_test_invalid_json_is_a_carrier_error() {
    let mut validator = Validator::new();
    assert!(validator.validate_json_str("{not json").is_err());
}

#[test]
fn smoke_test_next_action_id() {
    let mut validator = Validator::new();
    let mut schema = basic_schema_with_actions(3);
    assert_eq!(validator.next_action_id(&schema).unwrap(), 3);
    assert_eq!(validator.action_ids(&schema).unwrap(), vec![0, 1, 2]);

    // skipped ids are not reused
    schema["actions"][2]["id"] = json!(7);
    schema["object_promises"][2]["id"] = json!(7);
    schema["actions"][2]["object_promise"] = json!("object_promise:7");
    assert_eq!(validator.next_action_id(&schema).unwrap(), 8);

    // an invalid document refuses to answer
    schema["actions"][2]["party"] = json!("party:{Nobody}");
    assert!(matches!(
        validator.next_action_id(&schema),
        Err(flowspec::Error::Document(_))
    ));
}

#[test]
fn smoke_test_report_display() {
    let mut schema = basic_schema_with_actions(1);
    schema["actions"][0]["pipeline"] = json!({
        "object_promise": "object_promise:0",
        "variables": [
            {"name": "$unused", "type": "NUMERIC", "initial": 0},
        ],
        "output": [],
    });
    let report = validate(&schema);
    assert!(report.is_valid());

    let rendered = report.to_string();
    assert!(rendered.contains("WARNINGS:"));
    assert!(rendered.contains("variable declared but not used"));
}
