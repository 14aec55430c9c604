//! Report rendering and summarization
//!
//! Consumes the comparison tree strictly through its display walk, so text
//! and JSON output always agree on visibility, ordering, and chain
//! collapsing.

use serde::Serialize;
use serde_json::json;
use std::fmt;

use crate::compare::ComparisonReport;
use crate::diag::Severity;
use crate::normalize::NormalizeOutput;

/// Headline numbers for one comparison run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub described: usize,
    pub new_resources: usize,
    pub new_functions: usize,
    pub renames: usize,
    pub max_items_changes: usize,
}

pub fn summarize(report: &ComparisonReport, normalized: &NormalizeOutput) -> Summary {
    Summary {
        described: report.tree.described_count(),
        new_resources: report.new_resources.len(),
        new_functions: report.new_functions.len(),
        renames: normalized.renames.len(),
        max_items_changes: normalized.max_items_changes.len(),
    }
}

/// Process exit code for a finished run: 2 on any danger finding, 1 on any
/// warning, 0 otherwise. Info-only runs are clean exits.
pub fn exit_code(report: &ComparisonReport) -> i32 {
    match report.tree.max_severity() {
        Some(Severity::Danger) => 2,
        Some(Severity::Warn) => 1,
        _ => 0,
    }
}

/// Write the human-readable markdown report.
pub fn write_text<W: fmt::Write>(
    w: &mut W,
    report: &ComparisonReport,
    normalized: &NormalizeOutput,
    max_items: i64,
) -> fmt::Result {
    let total = report.tree.described_count();
    if total == 0 {
        writeln!(w, "Looking good! No breaking changes found.")?;
    } else {
        let plural = if total == 1 { "" } else { "s" };
        writeln!(w, "Found {} breaking change{}:", total, plural)?;
        writeln!(w)?;
        let written = report.tree.display(w, max_items)?;
        if max_items >= 0 && total > written {
            writeln!(w)?;
            writeln!(w, "... and {} more", total - written)?;
        }
    }

    if !normalized.diagnostics.is_empty() {
        writeln!(w)?;
        writeln!(w, "#### Metadata diagnostics:")?;
        writeln!(w)?;
        for diag in &normalized.diagnostics {
            writeln!(w, "- {}", diag)?;
        }
    }
    if !normalized.renames.is_empty() {
        writeln!(w)?;
        writeln!(w, "#### Renamed tokens (not breaking):")?;
        writeln!(w)?;
        for rename in &normalized.renames {
            writeln!(
                w,
                "- {}: `{}` is now `{}`",
                rename.scope, rename.old_token, rename.new_token
            )?;
        }
    }
    if !normalized.max_items_changes.is_empty() {
        writeln!(w)?;
        writeln!(w, "#### maxItemsOne changes (not breaking):")?;
        writeln!(w)?;
        for change in &normalized.max_items_changes {
            writeln!(
                w,
                "- `{}` {} `{}`: `{}` is now `{}`",
                change.token, change.location, change.path, change.old_base, change.new_base
            )?;
        }
    }

    if !report.new_resources.is_empty() {
        writeln!(w)?;
        writeln!(w, "#### New resources:")?;
        writeln!(w)?;
        for name in &report.new_resources {
            writeln!(w, "- `{}`", name)?;
        }
    }
    if !report.new_functions.is_empty() {
        writeln!(w)?;
        writeln!(w, "#### New functions:")?;
        writeln!(w)?;
        for name in &report.new_functions {
            writeln!(w, "- `{}`", name)?;
        }
    }
    Ok(())
}

/// Serialize the run for machine consumption. Violations come from the same
/// walk the text report uses.
pub fn to_json(report: &ComparisonReport, normalized: &NormalizeOutput) -> serde_json::Value {
    let mut violations = Vec::new();
    report.tree.walk_displayed(|node| {
        if let (Some(severity), Some(description)) = (node.severity, node.description.as_deref()) {
            violations.push(json!({
                "path": node.path,
                "severity": severity,
                "description": description,
            }));
        }
    });
    json!({
        "summary": summarize(report, normalized),
        "violations": violations,
        "newResources": report.new_resources,
        "newFunctions": report.new_functions,
        "renames": normalized.renames,
        "maxItemsOneChanges": normalized.max_items_changes,
        "diagnostics": normalized.diagnostics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::compare_packages;
    use crate::normalize::normalize;
    use crate::schema::PackageSpec;
    use serde_json::json;

    fn package(value: serde_json::Value) -> PackageSpec {
        serde_json::from_value(value).unwrap()
    }

    fn run(old: serde_json::Value, new: serde_json::Value) -> (ComparisonReport, NormalizeOutput) {
        let old = package(old);
        let new = package(new);
        let normalized = normalize(&old, &new, None, None).unwrap();
        let report = compare_packages(&old, &normalized.schema, "pkg");
        (report, normalized)
    }

    #[test]
    fn test_clean_run_text() {
        let (report, normalized) = run(json!({ "name": "pkg" }), json!({ "name": "pkg" }));
        let mut out = String::new();
        write_text(&mut out, &report, &normalized, -1).unwrap();
        assert_eq!(out, "Looking good! No breaking changes found.\n");
        assert_eq!(exit_code(&report), 0);
    }

    #[test]
    fn test_text_report_caps_violations() {
        let (report, normalized) = run(
            json!({
                "name": "pkg",
                "resources": {
                    "pkg:index:A": {}, "pkg:index:B": {}, "pkg:index:C": {}
                }
            }),
            json!({ "name": "pkg" }),
        );
        let mut out = String::new();
        write_text(&mut out, &report, &normalized, 2).unwrap();
        assert!(out.starts_with("Found 3 breaking changes:\n"));
        assert_eq!(out.matches("missing").count(), 2);
        assert!(out.contains("... and 1 more"));
        assert_eq!(exit_code(&report), 2);
    }

    #[test]
    fn test_new_entities_listed() {
        let (report, normalized) = run(
            json!({ "name": "pkg" }),
            json!({
                "name": "pkg",
                "resources": { "pkg:index:Widget": {} }
            }),
        );
        let mut out = String::new();
        write_text(&mut out, &report, &normalized, -1).unwrap();
        assert!(out.contains("#### New resources:"));
        assert!(out.contains("- `index.Widget`"));
    }

    #[test]
    fn test_json_shape() {
        let (report, normalized) = run(
            json!({
                "name": "pkg",
                "resources": { "pkg:index:Widget": {
                    "inputProperties": { "size": { "type": "number" } }
                }}
            }),
            json!({
                "name": "pkg",
                "resources": { "pkg:index:Widget": {} }
            }),
        );
        let value = to_json(&report, &normalized);
        assert_eq!(value["summary"]["described"], 1);
        let violations = value["violations"].as_array().unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0]["severity"], "warn");
        assert_eq!(violations[0]["description"], "missing");
    }
}
