//! End-to-end scenarios across normalization and comparison

use serde_json::json;

use schema_compat::compare::compare_packages;
use schema_compat::diag::Severity;
use schema_compat::meta::MetadataEnvelope;
use schema_compat::normalize::normalize;
use schema_compat::schema::PackageSpec;

fn package(value: serde_json::Value) -> PackageSpec {
    serde_json::from_value(value).unwrap()
}

fn envelope(value: serde_json::Value) -> MetadataEnvelope {
    MetadataEnvelope::from_value(value).unwrap()
}

/// All described findings as (severity, description) pairs.
fn findings(tree: &schema_compat::DiagTree) -> Vec<(Severity, String)> {
    let mut out = Vec::new();
    tree.walk_displayed(|node| {
        if let (Some(sev), Some(desc)) = (node.severity, node.description.clone()) {
            out.push((sev, desc));
        }
    });
    out
}

#[test]
fn widget_requiredness_flips_are_two_info_findings() {
    let old = package(json!({
        "name": "pkg",
        "resources": { "pkg:index:Widget": {
            "inputProperties": { "name": { "type": "string" } },
            "properties": { "arn": { "type": "string" } },
            "required": ["arn"]
        }}
    }));
    let new = package(json!({
        "name": "pkg",
        "resources": { "pkg:index:Widget": {
            "inputProperties": { "name": { "type": "string" } },
            "requiredInputs": ["name"],
            "properties": { "arn": { "type": "string" } }
        }}
    }));

    let report = compare_packages(&old, &new, "pkg");
    let found = findings(&report.tree);
    assert_eq!(
        found,
        vec![
            (Severity::Info, "input has changed to Required".to_string()),
            (Severity::Info, "property is no longer Required".to_string()),
        ]
    );
    assert_eq!(report.tree.max_severity(), Some(Severity::Info));
}

#[test]
fn brand_new_required_input_is_two_info_findings_with_relaxed_output() {
    // `list2` does not exist in the old snapshot at all, so its required
    // entry has no counterpart and no rename explanation.
    let old = package(json!({
        "name": "pkg",
        "resources": { "pkg:index:Widget": {
            "inputProperties": { "list": { "type": "array", "items": { "type": "string" } } },
            "requiredInputs": ["list"],
            "properties": { "value": { "type": "string" } },
            "required": ["value"]
        }}
    }));
    let new = package(json!({
        "name": "pkg",
        "resources": { "pkg:index:Widget": {
            "inputProperties": {
                "list": { "type": "array", "items": { "type": "string" } },
                "list2": { "type": "array", "items": { "type": "string" } }
            },
            "requiredInputs": ["list", "list2"],
            "properties": { "value": { "type": "string" } }
        }}
    }));

    let report = compare_packages(&old, &new, "pkg");
    let found = findings(&report.tree);
    assert_eq!(
        found,
        vec![
            (Severity::Info, "input has changed to Required".to_string()),
            (Severity::Info, "property is no longer Required".to_string()),
        ]
    );
}

#[test]
fn evidenced_max_items_one_transition_is_not_breaking() {
    let old = package(json!({
        "name": "pkg",
        "resources": { "pkg:index:Widget": {
            "inputProperties": { "filter": { "type": "string" } },
            "requiredInputs": ["filter"]
        }}
    }));
    let new = package(json!({
        "name": "pkg",
        "resources": { "pkg:index:Widget": {
            "inputProperties": { "filters": { "type": "array", "items": { "type": "string" } } },
            "requiredInputs": ["filters"]
        }}
    }));
    let old_meta = envelope(json!({ "auto-aliasing": { "resources": {
        "pkg_widget": {
            "current": "pkg:index:Widget",
            "fields": { "filter": { "maxItemsOne": true } }
        }
    }}}));
    let new_meta = envelope(json!({ "auto-aliasing": { "resources": {
        "pkg_widget": {
            "current": "pkg:index:Widget",
            "fields": { "filter": { "maxItemsOne": false } }
        }
    }}}));

    let normalized = normalize(&old, &new, Some(&old_meta), Some(&new_meta)).unwrap();
    assert_eq!(normalized.max_items_changes.len(), 1);
    assert_eq!(normalized.max_items_changes[0].path, "filter");

    let report = compare_packages(&old, &normalized.schema, "pkg");
    assert_eq!(findings(&report.tree), vec![]);
    assert_eq!(report.tree.max_severity(), None);
}

#[test]
fn unevidenced_transition_still_warns_after_normalization() {
    // Same shapes as above but no field history: normalization leaves the
    // new schema alone and the engine falls back to the rename heuristic.
    let old = package(json!({
        "name": "pkg",
        "resources": { "pkg:index:Widget": {
            "inputProperties": { "filter": { "type": "string" } }
        }}
    }));
    let new = package(json!({
        "name": "pkg",
        "resources": { "pkg:index:Widget": {
            "inputProperties": { "filters": { "type": "array", "items": { "type": "string" } } }
        }}
    }));
    let old_meta = envelope(json!({ "auto-aliasing": { "resources": {
        "pkg_widget": { "current": "pkg:index:Widget" }
    }}}));
    let new_meta = envelope(json!({ "auto-aliasing": { "resources": {
        "pkg_widget": { "current": "pkg:index:Widget" }
    }}}));

    let normalized = normalize(&old, &new, Some(&old_meta), Some(&new_meta)).unwrap();
    assert!(normalized.max_items_changes.is_empty());

    let report = compare_packages(&old, &normalized.schema, "pkg");
    let found = findings(&report.tree);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].0, Severity::Warn);
    assert_eq!(
        found[0].1,
        "maxItemsOne property `filter` renamed to `filters`"
    );
}

#[test]
fn shared_type_is_never_rewritten_by_one_resources_evidence() {
    let resources = json!({
        "pkg:index:A": { "inputProperties": { "rule": { "$ref": "#/types/pkg:index/rule:Rule" } } },
        "pkg:index:B": { "inputProperties": { "rule": { "$ref": "#/types/pkg:index/rule:Rule" } } }
    });
    let old = package(json!({
        "name": "pkg",
        "resources": resources,
        "types": { "pkg:index/rule:Rule": {
            "properties": { "filter": { "type": "string" } }
        }}
    }));
    let new = package(json!({
        "name": "pkg",
        "resources": resources,
        "types": { "pkg:index/rule:Rule": {
            "properties": { "filter": { "type": "array", "items": { "type": "string" } } }
        }}
    }));
    let old_meta = envelope(json!({ "auto-aliasing": { "resources": {
        "pkg_a": {
            "current": "pkg:index:A",
            "fields": { "rule": { "fields": { "filter": { "maxItemsOne": true } } } }
        }
    }}}));
    let new_meta = envelope(json!({ "auto-aliasing": { "resources": {
        "pkg_a": {
            "current": "pkg:index:A",
            "fields": { "rule": { "fields": { "filter": { "maxItemsOne": false } } } }
        }
    }}}));

    let normalized = normalize(&old, &new, Some(&old_meta), Some(&new_meta)).unwrap();
    assert!(normalized.max_items_changes.is_empty());
    assert_eq!(normalized.schema, new);

    // The shared definition keeps its new shape, so the walk over the named
    // type still surfaces the change.
    let report = compare_packages(&old, &normalized.schema, "pkg");
    let found = findings(&report.tree);
    assert_eq!(found.len(), 1);
    assert_eq!(
        found[0].1,
        "maxItemsOne changed from `string` to `array<string>`"
    );
}

#[test]
fn normalization_never_mutates_caller_snapshots() {
    let old = package(json!({
        "name": "pkg",
        "resources": { "pkg:index:Widget": {
            "inputProperties": { "filter": { "type": "string" } }
        }}
    }));
    let new = package(json!({
        "name": "pkg",
        "resources": { "pkg:index:Gadget": {
            "inputProperties": { "filter": { "type": "array", "items": { "type": "string" } } }
        }}
    }));
    let old_json = serde_json::to_value(&old).unwrap();
    let new_json = serde_json::to_value(&new).unwrap();

    let old_meta = envelope(json!({ "auto-aliasing": { "resources": {
        "pkg_widget": {
            "current": "pkg:index:Widget",
            "fields": { "filter": { "maxItemsOne": true } }
        }
    }}}));
    let new_meta = envelope(json!({ "auto-aliasing": { "resources": {
        "pkg_widget": {
            "current": "pkg:index:Gadget",
            "past": [{ "name": "pkg:index:Widget" }],
            "fields": { "filter": { "maxItemsOne": false } }
        }
    }}}));

    let normalized = normalize(&old, &new, Some(&old_meta), Some(&new_meta)).unwrap();
    // Both passes fired on the working copy.
    assert_eq!(normalized.renames.len(), 1);
    assert_eq!(normalized.max_items_changes.len(), 1);
    assert!(normalized.schema.resources.contains_key("pkg:index:Widget"));

    assert_eq!(serde_json::to_value(&old).unwrap(), old_json);
    assert_eq!(serde_json::to_value(&new).unwrap(), new_json);

    let report = compare_packages(&old, &normalized.schema, "pkg");
    assert_eq!(findings(&report.tree), vec![]);
}
