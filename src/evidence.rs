//! Field evidence resolution
//!
//! Flattens each token's nested field history into path facts: for every
//! flattened field path, what the singleton-vs-collection flag was on the old
//! side, what it is on the new side, and whether that constitutes a
//! transition. Only `Changed` facts drive normalization rewrites.
//!
//! Path syntax: `.` descends into a named field, a trailing `[*]` descends
//! into an array's element history (e.g. `rules[*].filter`).

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::meta::{FieldHistory, MetadataEnvelope, Scope};

/// Classification of one field path across the two snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// Flag absent on at least one side
    Unknown,
    /// Present and equal on both sides
    Unchanged,
    /// Present and different
    Changed,
}

/// The old/new flags and their classification for one path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PathFact {
    pub old: Option<bool>,
    pub new: Option<bool>,
    pub transition: Transition,
}

impl PathFact {
    fn classify(old: Option<bool>, new: Option<bool>) -> Self {
        let transition = match (old, new) {
            (Some(a), Some(b)) if a == b => Transition::Unchanged,
            (Some(_), Some(_)) => Transition::Changed,
            _ => Transition::Unknown,
        };
        Self {
            old,
            new,
            transition,
        }
    }
}

/// Flattened path facts per (scope, external token)
#[derive(Debug, Clone, Default)]
pub struct FieldEvidence {
    facts: BTreeMap<Scope, BTreeMap<String, BTreeMap<String, PathFact>>>,
}

impl FieldEvidence {
    pub fn build(old: &MetadataEnvelope, new: &MetadataEnvelope) -> Self {
        let mut evidence = FieldEvidence::default();
        for scope in Scope::ALL {
            let mut per_token: BTreeMap<String, BTreeMap<String, PathFact>> = BTreeMap::new();
            let keys: BTreeSet<&String> = old
                .entries(scope)
                .keys()
                .chain(new.entries(scope).keys())
                .collect();
            for key in keys {
                let old_flags = flatten(old.entries(scope).get(key).and_then(|h| h.fields.as_ref()));
                let new_flags = flatten(new.entries(scope).get(key).and_then(|h| h.fields.as_ref()));
                let paths: BTreeSet<&String> = old_flags.keys().chain(new_flags.keys()).collect();
                let facts: BTreeMap<String, PathFact> = paths
                    .into_iter()
                    .map(|p| {
                        (
                            p.clone(),
                            PathFact::classify(
                                old_flags.get(p).copied(),
                                new_flags.get(p).copied(),
                            ),
                        )
                    })
                    .collect();
                if !facts.is_empty() {
                    per_token.insert(key.clone(), facts);
                }
            }
            evidence.facts.insert(scope, per_token);
        }
        evidence
    }

    pub fn fact(&self, scope: Scope, token: &str, path: &str) -> Option<&PathFact> {
        self.facts.get(&scope)?.get(token)?.get(path)
    }

    /// Paths with a proven transition for one token, sorted by path
    pub fn changed_paths(&self, scope: Scope, token: &str) -> Vec<(&str, &PathFact)> {
        self.facts
            .get(&scope)
            .and_then(|per_token| per_token.get(token))
            .map(|facts| {
                facts
                    .iter()
                    .filter(|(_, f)| f.transition == Transition::Changed)
                    .map(|(p, f)| (p.as_str(), f))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Flatten one side's field-history trees into path -> flag
fn flatten(fields: Option<&BTreeMap<String, FieldHistory>>) -> BTreeMap<String, bool> {
    let mut out = BTreeMap::new();
    if let Some(fields) = fields {
        // Alphabetical on field name for determinism; BTreeMap gives it.
        for (name, history) in fields {
            flatten_into(history, name, &mut out);
        }
    }
    out
}

fn flatten_into(history: &FieldHistory, path: &str, out: &mut BTreeMap<String, bool>) {
    if let Some(flag) = history.max_items_one {
        out.insert(path.to_string(), flag);
    }
    if let Some(fields) = &history.fields {
        for (name, child) in fields {
            flatten_into(child, &format!("{}.{}", path, name), out);
        }
    }
    if let Some(elem) = &history.elem {
        flatten_into(elem, &format!("{}[*]", path), out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::MetadataEnvelope;
    use serde_json::json;

    fn envelope(fields: serde_json::Value) -> MetadataEnvelope {
        MetadataEnvelope::from_value(json!({ "auto-aliasing": { "resources": {
            "pkg_widget": { "current": "pkg:index:Widget", "fields": fields }
        }}}))
        .unwrap()
    }

    #[test]
    fn test_flattens_nested_and_element_paths() {
        let env = envelope(json!({
            "rules": {
                "maxItemsOne": true,
                "elem": { "fields": { "filter": { "maxItemsOne": false } } }
            }
        }));
        let flags = flatten(
            env.entries(Scope::Resources)["pkg_widget"]
                .fields
                .as_ref(),
        );
        assert_eq!(flags["rules"], true);
        assert_eq!(flags["rules[*].filter"], false);
    }

    #[test]
    fn test_transition_classification() {
        let old = envelope(json!({
            "filter": { "maxItemsOne": true },
            "rules":  { "maxItemsOne": true },
            "tags":   { "maxItemsOne": false }
        }));
        let new = envelope(json!({
            "filter": { "maxItemsOne": false },
            "rules":  { "maxItemsOne": true }
        }));
        let ev = FieldEvidence::build(&old, &new);

        let filter = ev.fact(Scope::Resources, "pkg_widget", "filter").unwrap();
        assert_eq!(filter.transition, Transition::Changed);
        assert_eq!((filter.old, filter.new), (Some(true), Some(false)));

        let rules = ev.fact(Scope::Resources, "pkg_widget", "rules").unwrap();
        assert_eq!(rules.transition, Transition::Unchanged);

        let tags = ev.fact(Scope::Resources, "pkg_widget", "tags").unwrap();
        assert_eq!(tags.transition, Transition::Unknown);

        let changed = ev.changed_paths(Scope::Resources, "pkg_widget");
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].0, "filter");
    }

    #[test]
    fn test_scopes_are_independent() {
        let old = envelope(json!({ "filter": { "maxItemsOne": true } }));
        let new = envelope(json!({ "filter": { "maxItemsOne": false } }));
        let ev = FieldEvidence::build(&old, &new);
        assert!(ev.changed_paths(Scope::Functions, "pkg_widget").is_empty());
    }
}
