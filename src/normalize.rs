//! Metadata-driven schema normalization
//!
//! Rewrites the new snapshot wherever historical evidence proves that an
//! apparent break is a continuation: token renames collapse back to the old
//! token, and proven maxItemsOne transitions collapse back to the old shape.
//! Both passes are strict about metadata (both envelopes or nothing), bounded
//! (only evidence-backed paths), and safety-checked (shared named types are
//! never rewritten). The caller's snapshots are never mutated.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::debug;

use crate::error::{CompatError, Result, Side};
use crate::evidence::FieldEvidence;
use crate::meta::{MetadataEnvelope, Scope};
use crate::remap::TokenRemap;
use crate::schema::{
    max_items_one_wrap, plural_counterparts, PackageSpec, PropertySpec, TypeSpec,
};

// =============================================================================
// Records
// =============================================================================

/// Which property container of an entity a change landed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Location {
    Inputs,
    Outputs,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Inputs => write!(f, "inputs"),
            Location::Outputs => write!(f, "outputs"),
        }
    }
}

/// A token rename the normalizer undid in the new snapshot
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct TokenRename {
    pub scope: Scope,
    pub old_token: String,
    pub new_token: String,
}

/// A proven maxItemsOne shape change the normalizer undid
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct MaxItemsOneChange {
    pub scope: Scope,
    pub token: String,
    pub location: Location,
    pub path: String,
    pub old_base: String,
    pub new_base: String,
}

/// Result of a normalization run
#[derive(Debug, Clone)]
pub struct NormalizeOutput {
    /// The (possibly rewritten) new snapshot
    pub schema: PackageSpec,
    pub renames: Vec<TokenRename>,
    pub max_items_changes: Vec<MaxItemsOneChange>,
    /// Alias-resolution ambiguities surfaced by the remap resolver
    pub diagnostics: Vec<String>,
}

// =============================================================================
// Entry point
// =============================================================================

/// Normalize the new snapshot against historical metadata.
///
/// Strict policy: with neither envelope this is a recorded no-op (the
/// comparison runs unnormalized); with exactly one it is a typed failure.
pub fn normalize(
    old_schema: &PackageSpec,
    new_schema: &PackageSpec,
    old_meta: Option<&MetadataEnvelope>,
    new_meta: Option<&MetadataEnvelope>,
) -> Result<NormalizeOutput> {
    match (old_meta, new_meta) {
        (None, None) => Ok(NormalizeOutput {
            schema: new_schema.clone(),
            renames: Vec::new(),
            max_items_changes: Vec::new(),
            diagnostics: Vec::new(),
        }),
        (Some(_), None) => Err(CompatError::MetadataMissing { side: Side::New }),
        (None, Some(_)) => Err(CompatError::MetadataMissing { side: Side::Old }),
        (Some(old), Some(new)) => run(old_schema, new_schema, old, new),
    }
}

fn run(
    old_schema: &PackageSpec,
    new_schema: &PackageSpec,
    old_meta: &MetadataEnvelope,
    new_meta: &MetadataEnvelope,
) -> Result<NormalizeOutput> {
    let remap = TokenRemap::build(old_meta, new_meta);
    let evidence = FieldEvidence::build(old_meta, new_meta);
    let mut schema = new_schema.clone();

    let mut renames = Vec::new();
    rename_container(
        Scope::Resources,
        &remap,
        &old_schema.resources,
        &mut schema.resources,
        &mut renames,
    );
    rename_container(
        Scope::Functions,
        &remap,
        &old_schema.functions,
        &mut schema.functions,
        &mut renames,
    );
    renames.sort();

    // Reference counts are computed schema-wide before any rewrite so one
    // call site's history never alters a type shared with another.
    let ref_counts = type_reference_counts(&schema);
    let plans = plan_shape_rewrites(old_schema, &schema, &remap, &evidence, old_meta, new_meta, &ref_counts);
    let mut max_items_changes = Vec::new();
    for plan in plans {
        if apply_rewrite(&mut schema, &plan).is_some() {
            max_items_changes.push(plan.record);
        }
    }
    max_items_changes.sort();

    Ok(NormalizeOutput {
        schema,
        renames,
        max_items_changes,
        diagnostics: remap.diagnostics().to_vec(),
    })
}

// =============================================================================
// Pass 1: token renames
// =============================================================================

fn rename_container<O, N>(
    scope: Scope,
    remap: &TokenRemap,
    old_container: &BTreeMap<String, O>,
    new_container: &mut BTreeMap<String, N>,
    renames: &mut Vec<TokenRename>,
) {
    for canonical in remap.canonicals(scope) {
        let olds: Vec<&String> = remap
            .old_members(scope, canonical)
            .iter()
            .filter(|t| old_container.contains_key(*t))
            .collect();
        let news: Vec<&String> = remap
            .new_members(scope, canonical)
            .iter()
            .filter(|t| new_container.contains_key(*t))
            .collect();
        let (old_token, new_token) = match (olds.as_slice(), news.as_slice()) {
            ([o], [n]) if o != n => ((*o).clone(), (*n).clone()),
            _ => continue,
        };
        if new_container.contains_key(&old_token) {
            debug!(%scope, token = %old_token, "rename skipped: old token still present in new schema");
            continue;
        }
        if let Some(entry) = new_container.remove(&new_token) {
            new_container.insert(old_token.clone(), entry);
            debug!(%scope, old = %old_token, new = %new_token, "token rename undone");
            renames.push(TokenRename {
                scope,
                old_token,
                new_token,
            });
        }
    }
}

// =============================================================================
// Pass 2: maxItemsOne shape rewrites
// =============================================================================

/// Where a located TypeSpec lives in a snapshot
#[derive(Debug, Clone, PartialEq)]
enum Host {
    Entity {
        scope: Scope,
        token: String,
        location: Location,
    },
    Type {
        token: String,
    },
}

struct Located<'a> {
    spec: &'a TypeSpec,
    host: Host,
    /// Property name actually found (may be a pluralization counterpart)
    prop: String,
    items_depth: usize,
}

struct RewritePlan {
    host: Host,
    prop: String,
    items_depth: usize,
    /// Rename the property back to the old name while rewriting
    rename_prop: Option<(String, String)>,
    replacement: TypeSpec,
    record: MaxItemsOneChange,
}

#[allow(clippy::too_many_arguments)]
fn plan_shape_rewrites(
    old_schema: &PackageSpec,
    schema: &PackageSpec,
    remap: &TokenRemap,
    evidence: &FieldEvidence,
    old_meta: &MetadataEnvelope,
    new_meta: &MetadataEnvelope,
    ref_counts: &BTreeMap<String, usize>,
) -> Vec<RewritePlan> {
    let mut plans = Vec::new();
    for scope in Scope::ALL {
        // External metadata key per canonical identity. New side wins when
        // both envelopes know the component.
        let mut key_by_canonical: BTreeMap<&str, &str> = BTreeMap::new();
        for env in [new_meta, old_meta] {
            for (key, hist) in env.entries(scope) {
                if let Some(canon) = remap.canonical_for_new(scope, &hist.current) {
                    key_by_canonical.entry(canon).or_insert(key.as_str());
                }
            }
        }

        let tokens: Vec<String> = match scope {
            Scope::Resources => schema.resources.keys().cloned().collect(),
            Scope::Functions => schema.functions.keys().cloned().collect(),
        };
        for token in tokens {
            let Some(canon) = remap.canonical_for_new(scope, &token) else {
                continue;
            };
            let Some(old_token) = old_token_for(scope, old_schema, remap, canon, &token) else {
                debug!(%scope, %token, "shape rewrite skipped: token absent from old snapshot");
                continue;
            };
            let Some(key) = key_by_canonical.get(canon) else {
                continue;
            };
            for (path, _fact) in evidence.changed_paths(scope, key) {
                for location in [Location::Inputs, Location::Outputs] {
                    let Some(old_props) = location_props(old_schema, scope, &old_token, location)
                    else {
                        continue;
                    };
                    let Some(new_props) = location_props(schema, scope, &token, location) else {
                        continue;
                    };
                    let old_host = Host::Entity {
                        scope,
                        token: old_token.clone(),
                        location,
                    };
                    let new_host = Host::Entity {
                        scope,
                        token: token.clone(),
                        location,
                    };
                    let Some(old_loc) = locate(old_schema, old_props, old_host, path, false)
                    else {
                        continue;
                    };
                    let Some(new_loc) = locate(schema, new_props, new_host, path, true) else {
                        continue;
                    };
                    if !max_items_one_wrap(old_loc.spec, new_loc.spec) {
                        continue;
                    }
                    if let Host::Type { token: shared } = &new_loc.host {
                        if ref_counts.get(shared).copied().unwrap_or(0) > 1 {
                            debug!(type_token = %shared, %path, "shape rewrite skipped: type referenced from multiple locations");
                            continue;
                        }
                    }
                    let requested = final_segment_name(path);
                    let rename_prop = (new_loc.prop != requested)
                        .then(|| (new_loc.prop.clone(), requested.to_string()));
                    plans.push(RewritePlan {
                        host: new_loc.host.clone(),
                        prop: new_loc.prop.clone(),
                        items_depth: new_loc.items_depth,
                        rename_prop,
                        replacement: old_loc.spec.clone(),
                        record: MaxItemsOneChange {
                            scope,
                            token: token.clone(),
                            location,
                            path: path.to_string(),
                            old_base: old_loc.spec.label(),
                            new_base: new_loc.spec.label(),
                        },
                    });
                }
            }
        }
    }
    plans
}

fn old_token_for(
    scope: Scope,
    old_schema: &PackageSpec,
    remap: &TokenRemap,
    canonical: &str,
    new_token: &str,
) -> Option<String> {
    let has = |t: &str| match scope {
        Scope::Resources => old_schema.resources.contains_key(t),
        Scope::Functions => old_schema.functions.contains_key(t),
    };
    if has(new_token) {
        return Some(new_token.to_string());
    }
    remap
        .old_members(scope, canonical)
        .iter()
        .find(|t| has(t))
        .cloned()
}

fn location_props<'a>(
    pkg: &'a PackageSpec,
    scope: Scope,
    token: &str,
    location: Location,
) -> Option<&'a BTreeMap<String, PropertySpec>> {
    match (scope, location) {
        (Scope::Resources, Location::Inputs) => {
            pkg.resources.get(token).map(|r| &r.input_properties)
        }
        (Scope::Resources, Location::Outputs) => pkg.resources.get(token).map(|r| &r.properties),
        (Scope::Functions, Location::Inputs) => {
            pkg.functions.get(token)?.inputs.as_ref().map(|o| &o.properties)
        }
        (Scope::Functions, Location::Outputs) => {
            pkg.functions.get(token)?.outputs.as_ref().map(|o| &o.properties)
        }
    }
}

fn final_segment_name(path: &str) -> &str {
    let last = path.rsplit('.').next().unwrap_or(path);
    last.trim_end_matches("[*]")
}

/// Resolve the TypeSpec at a flattened field path. Descends property names,
/// `items` at `[*]` markers, and local named-type references (with a visited
/// set, since the type graph may be cyclic). With `allow_alternates`, the
/// final segment may match a pluralization counterpart of the recorded name.
fn locate<'a>(
    pkg: &'a PackageSpec,
    props: &'a BTreeMap<String, PropertySpec>,
    host: Host,
    path: &str,
    allow_alternates: bool,
) -> Option<Located<'a>> {
    let segments = parse_path(path)?;
    let mut cur_props = props;
    let mut cur_host = host;
    let mut visited: BTreeSet<String> = BTreeSet::new();
    let last = segments.len() - 1;
    for (i, (name, stars)) in segments.iter().enumerate() {
        let (found_name, prop) = match cur_props.get_key_value(name.as_str()) {
            Some((k, v)) => (k, v),
            None if allow_alternates && i == last && *stars == 0 => plural_counterparts(name)
                .into_iter()
                .find_map(|alt| cur_props.get_key_value(alt.as_str()))?,
            None => return None,
        };
        let mut spec = &prop.type_spec;
        for _ in 0..*stars {
            spec = spec.items.as_deref()?;
        }
        if i == last {
            return Some(Located {
                spec,
                host: cur_host,
                prop: found_name.clone(),
                items_depth: *stars,
            });
        }
        let target = spec.local_ref()?;
        if !visited.insert(target.to_string()) {
            return None;
        }
        cur_props = &pkg.types.get(target)?.properties;
        cur_host = Host::Type {
            token: target.to_string(),
        };
    }
    None
}

/// Split a flattened path into (name, element-marker count) segments
fn parse_path(path: &str) -> Option<Vec<(String, usize)>> {
    let mut segments = Vec::new();
    for part in path.split('.') {
        let mut name = part;
        let mut stars = 0usize;
        while let Some(stripped) = name.strip_suffix("[*]") {
            name = stripped;
            stars += 1;
        }
        if name.is_empty() {
            return None;
        }
        segments.push((name.to_string(), stars));
    }
    Some(segments)
}

/// Count `$ref` sites per named type across the whole snapshot, excluding a
/// type's references to itself. Walks definitions syntactically (refs are
/// not followed), so the walk is finite even on cyclic graphs.
fn type_reference_counts(pkg: &PackageSpec) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    if let Some(config) = &pkg.config {
        count_props(&config.properties, None, &mut counts);
    }
    if let Some(provider) = &pkg.provider {
        count_props(&provider.input_properties, None, &mut counts);
        count_props(&provider.properties, None, &mut counts);
    }
    for resource in pkg.resources.values() {
        count_props(&resource.input_properties, None, &mut counts);
        count_props(&resource.properties, None, &mut counts);
    }
    for function in pkg.functions.values() {
        if let Some(inputs) = &function.inputs {
            count_props(&inputs.properties, None, &mut counts);
        }
        if let Some(outputs) = &function.outputs {
            count_props(&outputs.properties, None, &mut counts);
        }
    }
    for (token, obj) in &pkg.types {
        count_props(&obj.properties, Some(token), &mut counts);
    }
    counts
}

fn count_props(
    props: &BTreeMap<String, PropertySpec>,
    owner: Option<&str>,
    counts: &mut BTreeMap<String, usize>,
) {
    for prop in props.values() {
        count_type(&prop.type_spec, owner, counts);
    }
}

fn count_type(spec: &TypeSpec, owner: Option<&str>, counts: &mut BTreeMap<String, usize>) {
    if let Some(target) = spec.local_ref() {
        if owner != Some(target) {
            *counts.entry(target.to_string()).or_insert(0) += 1;
        }
    }
    if let Some(items) = &spec.items {
        count_type(items, owner, counts);
    }
    if let Some(values) = &spec.additional_properties {
        count_type(values, owner, counts);
    }
    for alt in &spec.one_of {
        count_type(alt, owner, counts);
    }
}

fn host_props_mut<'a>(
    schema: &'a mut PackageSpec,
    host: &Host,
) -> Option<&'a mut BTreeMap<String, PropertySpec>> {
    match host {
        Host::Entity {
            scope: Scope::Resources,
            token,
            location: Location::Inputs,
        } => Some(&mut schema.resources.get_mut(token)?.input_properties),
        Host::Entity {
            scope: Scope::Resources,
            token,
            location: Location::Outputs,
        } => Some(&mut schema.resources.get_mut(token)?.properties),
        Host::Entity {
            scope: Scope::Functions,
            token,
            location: Location::Inputs,
        } => Some(&mut schema.functions.get_mut(token)?.inputs.as_mut()?.properties),
        Host::Entity {
            scope: Scope::Functions,
            token,
            location: Location::Outputs,
        } => Some(&mut schema.functions.get_mut(token)?.outputs.as_mut()?.properties),
        Host::Type { token } => Some(&mut schema.types.get_mut(token)?.properties),
    }
}

fn host_required_mut<'a>(schema: &'a mut PackageSpec, host: &Host) -> Option<&'a mut Vec<String>> {
    match host {
        Host::Entity {
            scope: Scope::Resources,
            token,
            location: Location::Inputs,
        } => Some(&mut schema.resources.get_mut(token)?.required_inputs),
        Host::Entity {
            scope: Scope::Resources,
            token,
            location: Location::Outputs,
        } => Some(&mut schema.resources.get_mut(token)?.required),
        Host::Entity {
            scope: Scope::Functions,
            token,
            location: Location::Inputs,
        } => Some(&mut schema.functions.get_mut(token)?.inputs.as_mut()?.required),
        Host::Entity {
            scope: Scope::Functions,
            token,
            location: Location::Outputs,
        } => Some(&mut schema.functions.get_mut(token)?.outputs.as_mut()?.required),
        Host::Type { token } => Some(&mut schema.types.get_mut(token)?.required),
    }
}

fn apply_rewrite(schema: &mut PackageSpec, plan: &RewritePlan) -> Option<()> {
    {
        let props = host_props_mut(schema, &plan.host)?;
        if let Some((from, to)) = &plan.rename_prop {
            let mut prop = props.remove(from)?;
            prop.type_spec = plan.replacement.clone();
            props.insert(to.clone(), prop);
        } else {
            let mut spec = &mut props.get_mut(&plan.prop)?.type_spec;
            for _ in 0..plan.items_depth {
                spec = spec.items.as_deref_mut()?;
            }
            *spec = plan.replacement.clone();
        }
    }
    if let Some((from, to)) = &plan.rename_prop {
        if let Some(required) = host_required_mut(schema, &plan.host) {
            for name in required.iter_mut() {
                if name == from {
                    *name = to.clone();
                }
            }
        }
    }
    Some(())
}
