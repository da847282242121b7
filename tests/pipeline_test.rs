//! Pipeline tests — variable scoping, assignment flow, traversal,
//! aggregation, filtering, and output typing

mod common;

use common::*;
use rstest::rstest;
use serde_json::{json, Value};

/// A schema whose first action carries the given pipeline body.
fn schema_with_pipeline(pipeline: Value) -> Value {
    let mut schema = basic_schema_with_actions(2);
    let mut full = json!({
        "object_promise": "object_promise:0",
        "variables": [],
        "output": [],
    });
    for (key, value) in pipeline.as_object().unwrap() {
        full[key] = value.clone();
    }
    schema["actions"][0]["pipeline"] = full;
    schema
}

#[test]
fn test_pipeline_object_promise_must_match_the_action() {
    let mut schema = schema_with_pipeline(json!({}));
    schema["actions"][0]["pipeline"]["object_promise"] = json!("object_promise:1");
    assert!(errors(&schema).iter().any(|e| e.starts_with(
        "root.actions[0].pipeline.object_promise (action id: 0): expected ref equivalent to \
         \"object_promise:0\""
    )));
}

#[test]
fn test_variable_out_of_scope() {
    let schema = schema_with_pipeline(json!({
        "variables": [
            {"name": "$sum", "type": "NUMERIC", "initial": 0},
        ],
        "traverse": [{
            "ref": "object_promise:1.numbers",
            "foreach": {
                "as": "$n",
                "variables": [
                    {"name": "$x", "type": "NUMERIC", "initial": 0},
                ],
                "apply": [
                    {"from": "$n", "method": "ADD", "to": "$x"},
                ],
            },
        }],
        "apply": [
            {"from": "$x", "method": "ADD", "to": "$sum"},
        ],
    }));

    assert!(errors(&schema).contains(
        &"root.actions[0].pipeline (action id: 0).from: variable \"$x\" is not in scope"
            .to_string()
    ));
}

#[test]
fn test_assignment_out_of_scope() {
    let schema = schema_with_pipeline(json!({
        "variables": [
            {"name": "$sum", "type": "NUMERIC", "initial": 0},
        ],
        "traverse": [{
            "ref": "object_promise:1.numbers",
            "foreach": {
                "as": "$n",
                "variables": [
                    {"name": "$x", "type": "NUMERIC", "initial": 0},
                ],
                "apply": [
                    {"from": "$n", "method": "ADD", "to": "$x"},
                ],
            },
        }],
        "apply": [
            {"from": "$sum", "method": "ADD", "to": "$x"},
        ],
    }));

    assert!(errors(&schema).contains(
        &"root.actions[0].pipeline (action id: 0).to: variable \"$x\" is not in scope".to_string()
    ));
}

#[test]
fn test_use_before_assignment_warns() {
    let schema = schema_with_pipeline(json!({
        "variables": [
            {"name": "$some_var", "type": "NUMERIC", "initial": 0},
            {"name": "$another_var", "type": "NUMERIC_LIST", "initial": [9]},
        ],
        "apply": [
            {"from": "$some_var", "method": "APPEND", "to": "$another_var"},
        ],
    }));

    let report = validate(&schema);
    assert!(report.is_valid(), "{:?}", report.errors);
    assert!(report.warnings.contains(
        &"root.actions[0].pipeline (action id: 0).from: variable used before assignment: \
          \"$some_var\""
            .to_string()
    ));

    // assigning first removes the warning
    let mut schema = schema_with_pipeline(json!({
        "variables": [
            {"name": "$some_var", "type": "NUMERIC", "initial": 0},
            {"name": "$another_var", "type": "NUMERIC_LIST", "initial": [9]},
        ],
        "apply": [
            {"from": "$_object.number", "method": "ADD", "to": "$some_var"},
            {"from": "$some_var", "method": "APPEND", "to": "$another_var"},
        ],
    }));
    schema["actions"][0]["operation"] = json!({"include": ["completed", "number"]});
    let report = validate(&schema);
    assert!(report.is_valid(), "{:?}", report.errors);
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
}

#[test]
fn test_unknown_variable() {
    let schema = schema_with_pipeline(json!({
        "variables": [
            {"name": "$some_var", "type": "NUMERIC", "initial": 0},
        ],
        "apply": [
            {"from": "$non_existent_var", "method": "ADD", "to": "$some_var"},
        ],
    }));
    assert!(errors(&schema).contains(
        &"root.actions[0].pipeline (action id: 0).from: variable \"$non_existent_var\" is not \
          in scope"
            .to_string()
    ));
}

#[test]
fn test_null_initial_requires_set_first() {
    let mut schema = schema_with_pipeline(json!({
        "variables": [
            {"name": "$some_var", "type": "STRING", "initial": null},
        ],
        "apply": [
            {"from": "$_object.name", "method": "SET", "to": "$some_var"},
        ],
    }));
    let report = validate(&schema);
    assert!(report.is_valid(), "{:?}", report.errors);

    schema["actions"][0]["pipeline"]["apply"][0]["method"] = json!("CONCAT");
    assert!(errors(&schema).iter().any(|e| e.contains(
        "when a variable's initial value is null, the \"SET\" method must be used for the \
         first operation on the variable"
    )));
}

#[test]
fn test_set_type_mismatch() {
    let schema = schema_with_pipeline(json!({
        "variables": [
            {"name": "$some_var", "type": "NUMERIC", "initial": null},
        ],
        "apply": [
            {"from": "$_object.name", "method": "SET", "to": "$some_var"},
        ],
    }));
    assert!(errors(&schema)
        .iter()
        .any(|e| e.contains("cannot set value of type \"STRING\" to variable of type \"NUMERIC\"")));
}

#[test]
fn test_method_must_fit_operand_types() {
    let schema = schema_with_pipeline(json!({
        "variables": [
            {"name": "$some_var", "type": "STRING_LIST", "initial": []},
        ],
        "apply": [
            {"from": "$_object.name", "method": "ADD", "to": "$some_var"},
        ],
    }));
    assert!(errors(&schema).iter().any(|e| e.contains(
        "invalid method for operand types \"STRING_LIST\" and \"STRING\": \"ADD\""
    )));

    let schema = schema_with_pipeline(json!({
        "variables": [
            {"name": "$some_var", "type": "STRING_LIST", "initial": []},
        ],
        "apply": [
            {"from": "$_object.name", "method": "APPEND", "to": "$some_var"},
        ],
    }));
    let report = validate(&schema);
    assert!(report.is_valid(), "{:?}", report.errors);
}

#[rstest]
#[case("BOOLEAN", json!(0))]
#[case("BOOLEAN", json!("a"))]
#[case("NUMERIC", json!(true))]
#[case("STRING", json!(0))]
#[case("NUMERIC_LIST", json!(0))]
#[case("NUMERIC_LIST", json!([true]))]
#[case("STRING_LIST", json!([0]))]
#[case("BOOLEAN_LIST", json!(["a"]))]
fn test_invalid_variable_initial(#[case] var_type: &str, #[case] initial: Value) {
    let schema = schema_with_pipeline(json!({
        "variables": [
            {"name": "$v", "type": var_type, "initial": initial},
        ],
    }));
    assert!(
        errors(&schema)
            .iter()
            .any(|e| e.contains("variables[0].initial:")),
        "expected an initial-value error for {} = {}",
        var_type,
        initial
    );
}

#[rstest]
#[case("BOOLEAN", json!(true))]
#[case("BOOLEAN", json!(null))]
#[case("NUMERIC", json!(10.5))]
#[case("STRING", json!(""))]
#[case("NUMERIC_LIST", json!([]))]
#[case("NUMERIC_LIST", json!([1, 2, 3]))]
#[case("STRING_LIST", json!(["a", "b"]))]
#[case("BOOLEAN_LIST", json!([true, false]))]
#[case("OBJECT", json!(null))]
#[case("OBJECT_LIST", json!(null))]
#[case("OBJECT_LIST", json!([]))]
fn test_valid_variable_initial(#[case] var_type: &str, #[case] initial: Value) {
    let schema = schema_with_pipeline(json!({
        "variables": [
            {"name": "$v", "type": var_type, "initial": initial},
        ],
    }));
    let report = validate(&schema);
    // an unused variable warns but does not error
    assert!(report.is_valid(), "{:?}", report.errors);
    assert!(report.warnings.contains(
        &"root.actions[0].pipeline (action id: 0): variable declared but not used: \"$v\""
            .to_string()
    ));
}

#[test]
fn test_mixed_list_initial() {
    let schema = schema_with_pipeline(json!({
        "variables": [
            {"name": "$v", "type": "NUMERIC_LIST", "initial": [0, "a"]},
        ],
    }));
    assert!(errors(&schema).contains(
        &"root.actions[0].pipeline (action id: 0): variables[0].initial: cannot mix types in \
          list"
            .to_string()
    ));
}

#[test]
fn test_traversal_aggregation() {
    let mut schema = schema_with_pipeline(json!({
        "variables": [
            {"name": "$total", "type": "NUMERIC", "initial": 0},
        ],
        "traverse": [{
            "ref": "object_promise:1.objects",
            "foreach": {
                "as": "$edge",
                "variables": [
                    {"name": "$average", "type": "NUMERIC", "initial": 0},
                ],
                "apply": [
                    {
                        "from": "$edge.numbers",
                        "method": "ADD",
                        "to": "$average",
                        "aggregate": {"field": "$_item", "operator": "AVERAGE"},
                    },
                    {"from": "$average", "method": "ADD", "to": "$total"},
                ],
            },
        }],
        "output": [
            {"from": "$total", "to": "number"},
        ],
    }));
    // the output field must not be settable by any action operation
    schema["actions"][0]["operation"] = json!({"include": ["completed"]});

    let report = validate(&schema);
    assert!(report.is_valid(), "{:?}", report.errors);
}

#[test]
fn test_cannot_traverse_non_list() {
    let schema = schema_with_pipeline(json!({
        "traverse": [{
            "ref": "object_promise:1.name",
            "foreach": {"as": "$n", "apply": []},
        }],
    }));
    assert!(errors(&schema).contains(
        &"root.actions[0].pipeline (action id: 0): traverse[0].ref: cannot traverse non-list \
          object"
            .to_string()
    ));
}

#[test]
fn test_cannot_assign_to_loop_variable() {
    let schema = schema_with_pipeline(json!({
        "traverse": [{
            "ref": "object_promise:1.numbers",
            "foreach": {
                "as": "$n",
                "apply": [
                    {"from": "$_object.number", "method": "ADD", "to": "$n"},
                ],
            },
        }],
    }));
    assert!(errors(&schema).contains(
        &"root.actions[0].pipeline (action id: 0).to: cannot assign to loop variable: \"$n\""
            .to_string()
    ));
}

#[test]
fn test_cannot_assign_within_traversed_scope() {
    let schema = schema_with_pipeline(json!({
        "variables": [
            {"name": "$list", "type": "NUMERIC_LIST", "initial": [1, 2, 3]},
        ],
        "traverse": [{
            "ref": "$list",
            "foreach": {
                "as": "$n",
                "apply": [
                    {"from": "$n", "method": "APPEND", "to": "$list"},
                ],
            },
        }],
    }));
    assert!(errors(&schema).contains(
        &"root.actions[0].pipeline (action id: 0).to: cannot apply to variable within a scope \
          that traverses it: \"$list\""
            .to_string()
    ));
}

#[test]
fn test_local_object_refs() {
    // a global ref to the pipeline's own promise is rejected with a hint
    let schema = schema_with_pipeline(json!({
        "variables": [
            {"name": "$x", "type": "NUMERIC", "initial": 0},
        ],
        "apply": [
            {"from": "object_promise:0.number", "method": "ADD", "to": "$x"},
        ],
    }));
    let report = validate(&schema);
    assert!(report.errors.contains(
        &"root.actions[0].pipeline (action id: 0).from: cannot use local object as pipeline \
          input"
            .to_string()
    ));
    assert!(report.warnings.iter().any(|w| w.contains(
        "global ref refers to the local object -- consider using \"$_object\" instead"
    )));

    // local refs cannot feed traversals
    let schema = schema_with_pipeline(json!({
        "traverse": [{
            "ref": "$_object.numbers",
            "foreach": {"as": "$n", "apply": []},
        }],
    }));
    assert!(errors(&schema).contains(
        &"root.actions[0].pipeline (action id: 0): traverse[0].ref: cannot use field from \
          local object as pipeline input"
            .to_string()
    ));
}

#[test]
fn test_sibling_traversals_cannot_share_a_ref() {
    let schema = schema_with_pipeline(json!({
        "traverse": [
            {
                "ref": "object_promise:1.numbers",
                "foreach": {"as": "$a", "apply": []},
            },
            {
                "ref": "object_promise:1.numbers",
                "foreach": {"as": "$b", "apply": []},
            },
        ],
    }));
    assert!(errors(&schema).contains(
        &"root.actions[0].pipeline.traverse (action id: 0): sibling \"traverse\" objects cannot \
          specify the same \"ref\""
            .to_string()
    ));
}

#[test]
fn test_filter_requires_item_reference() {
    // neither side references $_item: the spec walk rejects the comparison
    let schema = schema_with_pipeline(json!({
        "variables": [
            {"name": "$filtered", "type": "OBJECT_LIST", "initial": null},
        ],
        "apply": [{
            "from": "object_promise:1.objects",
            "method": "SET",
            "to": "$filtered",
            "filter": {
                "where": [{
                    "left": 5,
                    "operator": "GREATER_THAN",
                    "right": 10,
                }],
            },
        }],
    }));
    assert!(errors(&schema)
        .iter()
        .any(|e| e.contains("must reference the filter variable (\"$_item\")")));
}

#[test]
fn test_filter_item_comparison() {
    let schema = schema_with_pipeline(json!({
        "variables": [
            {"name": "$filtered", "type": "OBJECT_LIST", "initial": null},
        ],
        "apply": [{
            "from": "object_promise:1.objects",
            "method": "SET",
            "to": "$filtered",
            "filter": {
                "where": [{
                    "left": {"ref": "$_item.number"},
                    "operator": "GREATER_THAN",
                    "right": 10,
                }],
            },
        }],
        "output": [
            {"from": "$filtered", "to": "objects"},
        ],
    }));
    // the filter itself is fine; outputting to an edge collection is not
    let report = validate(&schema);
    assert!(report.errors.contains(
        &"root.actions[0].pipeline (action id: 0): output[0].to: cannot use edge field for \
          aggregation output: \"objects\""
            .to_string()
    ));

    // incomparable operand types are rejected
    let schema = schema_with_pipeline(json!({
        "variables": [
            {"name": "$filtered", "type": "OBJECT_LIST", "initial": null},
        ],
        "apply": [{
            "from": "object_promise:1.objects",
            "method": "SET",
            "to": "$filtered",
            "filter": {
                "where": [{
                    "left": {"ref": "$_item.name"},
                    "operator": "GREATER_THAN",
                    "right": 10,
                }],
            },
        }],
    }));
    assert!(errors(&schema)
        .iter()
        .any(|e| e.contains("invalid comparison: STRING GREATER_THAN NUMERIC")));
}

#[test]
fn test_select_listifies_over_collections() {
    let schema = schema_with_pipeline(json!({
        "variables": [
            {"name": "$names", "type": "STRING_LIST", "initial": null},
        ],
        "apply": [{
            "from": "object_promise:1.objects",
            "method": "SET",
            "to": "$names",
            "select": "name",
        }],
    }));
    let report = validate(&schema);
    assert!(report.is_valid(), "{:?}", report.errors);

    // selecting a list field from a collection would nest lists
    let schema = schema_with_pipeline(json!({
        "variables": [
            {"name": "$numbers", "type": "NUMERIC_LIST", "initial": null},
        ],
        "apply": [{
            "from": "object_promise:1.objects",
            "method": "SET",
            "to": "$numbers",
            "select": "numbers",
        }],
    }));
    assert!(errors(&schema)
        .iter()
        .any(|e| e.contains("nested list types are not supported")));
}

#[test]
fn test_output_type_must_match() {
    let mut schema = schema_with_pipeline(json!({
        "variables": [
            {"name": "$count", "type": "NUMERIC", "initial": 0},
        ],
        "apply": [
            {"from": "$_object.number", "method": "ADD", "to": "$count"},
        ],
        "output": [
            {"from": "$count", "to": "name"},
        ],
    }));
    schema["actions"][0]["operation"] = json!({"include": ["completed", "number"]});
    assert!(errors(&schema).contains(
        &"root.actions[0].pipeline (action id: 0): output[0]: \"from\" type does not match \
          \"to\" type (NUMERIC != STRING)"
            .to_string()
    ));

    schema["actions"][0]["pipeline"]["output"][0]["to"] = json!("number");
    assert!(errors(&schema).contains(
        &"root.actions[0].pipeline (action id: 0): output[0].to: cannot use field for \
          aggregation output because the field is included in an action's operation"
            .to_string()
    ));

    schema["actions"][0]["operation"] = json!({"include": ["completed"]});
    let report = validate(&schema);
    assert!(report.is_valid(), "{:?}", report.errors);
}

#[test]
fn test_output_from_must_be_top_level() {
    let schema = schema_with_pipeline(json!({
        "variables": [],
        "traverse": [{
            "ref": "object_promise:1.numbers",
            "foreach": {
                "as": "$n",
                "variables": [
                    {"name": "$nested", "type": "NUMERIC", "initial": 0},
                ],
                "apply": [
                    {"from": "$n", "method": "ADD", "to": "$nested"},
                ],
            },
        }],
        "output": [
            {"from": "$nested", "to": "number"},
        ],
    }));
    assert!(errors(&schema).contains(
        &"root.actions[0].pipeline (action id: 0): output[0].from: variable not found in \
          top-level pipeline scope: $nested"
            .to_string()
    ));
}

#[test]
fn test_checkpoint_cannot_depend_on_aggregated_field() {
    let mut schema = schema_with_pipeline(json!({
        "variables": [
            {"name": "$count", "type": "NUMERIC", "initial": 0},
        ],
        "apply": [
            {"from": "$_object.number", "method": "ADD", "to": "$count"},
        ],
        "output": [
            {"from": "$count", "to": "number"},
        ],
    }));
    schema["actions"][0]["operation"] = json!({"include": ["completed"]});

    let mut gate = checkpoint(0, "depends-on-aggregated", 1);
    gate["dependencies"][0]["compare"]["left"]["ref"] = json!("action:0.object_promise.number");
    gate["dependencies"][0]["compare"]["right"] = json!({"value": 5});
    push(&mut schema, "checkpoints", gate);
    schema["actions"][1]["depends_on"] = json!("checkpoint:{depends-on-aggregated}");

    assert!(errors(&schema).contains(
        &"root.checkpoints[0].dependencies[0].compare: cannot depend on aggregated field: \
          \"action:0.object_promise.number\""
            .to_string()
    ));
}

#[test]
fn test_thread_variables_visible_to_pipeline() {
    let mut schema = basic_schema_with_actions(2);
    push(&mut schema, "checkpoints", checkpoint(0, "depends-on-0", 1));
    schema["thread_groups"] = json!([{
        "id": 0,
        "depends_on": "checkpoint:{depends-on-0}",
        "spawn": {"foreach": "object_promise:0.numbers", "as": "$number"},
    }]);
    schema["actions"][1]["context"] = json!("thread_group:0");
    schema["object_promises"][1]["context"] = json!("thread_group:0");
    schema["actions"][1]["pipeline"] = json!({
        "object_promise": "object_promise:1",
        "variables": [
            {"name": "$doubled", "type": "NUMERIC", "initial": 0},
        ],
        "apply": [
            {"from": "$number", "method": "ADD", "to": "$doubled"},
        ],
        "output": [
            {"from": "$doubled", "to": "number"},
        ],
    });

    let report = validate(&schema);
    assert!(report.is_valid(), "{:?}", report.errors);

    // pipeline variables cannot shadow thread variables
    schema["actions"][1]["pipeline"]["variables"]
        .as_array_mut()
        .unwrap()
        .push(json!({"name": "$number", "type": "NUMERIC", "initial": 0}));
    assert!(errors(&schema).contains(
        &"root.actions[1].pipeline (action id: 1): variables[1].name: variable already defined \
          within thread scope: \"$number\""
            .to_string()
    ));
}
