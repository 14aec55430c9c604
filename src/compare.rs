//! Breaking-change engine
//!
//! Structural comparison of two schema snapshots, old against new. Removals
//! and incompatible changes become described nodes in a [`DiagTree`];
//! additions are collected for the report but never flagged. The walk is
//! directional: nothing is reported about entities that exist only in the
//! new snapshot.

use std::collections::{BTreeMap, BTreeSet};

use crate::diag::{DiagTree, NodeId, Severity};
use crate::schema::{
    display_name, max_items_one_wrap, plural_counterparts, ObjectSpec, PackageSpec, PropertySpec,
    TypeSpec,
};

/// Pairs of named-type tokens already expanded, to keep recursion finite on
/// cyclic type graphs
type Visited = BTreeSet<(String, String)>;

/// How requiredness differences are reported for a property container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequiredRule {
    /// Inputs: only newly required properties are breaking
    Inputs,
    /// Outputs: only no-longer-required properties are breaking
    Outputs,
    /// Named types serve both roles, so both directions are reported
    Symmetric,
}

/// Outcome of one comparison run
#[derive(Debug)]
pub struct ComparisonReport {
    pub tree: DiagTree,
    /// Display names of resources present only in the new snapshot
    pub new_resources: Vec<String>,
    /// Display names of functions present only in the new snapshot
    pub new_functions: Vec<String>,
}

/// Compare two snapshots and build the violation tree.
pub fn compare_packages(old: &PackageSpec, new: &PackageSpec, provider: &str) -> ComparisonReport {
    let mut tree = DiagTree::new();
    let mut visited = Visited::new();

    // Named types first: every token pair walked here is marked visited, so
    // the per-property ref descent below never re-expands a shared type.
    let types_node = tree.label(tree.root(), "Types");
    for (token, old_ty) in &old.types {
        let node = tree.value(types_node, token);
        match new.types.get(token) {
            None => tree.set_description(node, Severity::Danger, "missing"),
            Some(new_ty) => {
                visited.insert((token.clone(), token.clone()));
                compare_object(
                    &mut tree,
                    &mut visited,
                    old,
                    new,
                    node,
                    old_ty,
                    new_ty,
                    RequiredRule::Symmetric,
                );
            }
        }
    }

    let resources_node = tree.label(tree.root(), "Resources");
    for (token, old_res) in &old.resources {
        let node = tree.value(resources_node, token);
        match new.resources.get(token) {
            None => tree.set_description(node, Severity::Danger, "missing"),
            Some(new_res) => {
                let inputs = tree.label(node, "inputs");
                let renamed = compare_properties(
                    &mut tree,
                    &mut visited,
                    old,
                    new,
                    inputs,
                    &old_res.input_properties,
                    &new_res.input_properties,
                );
                apply_required_rule(
                    &mut tree,
                    inputs,
                    &old_res.required_inputs,
                    &new_res.required_inputs,
                    &new_res.input_properties,
                    RequiredRule::Inputs,
                    &renamed,
                );

                let outputs = tree.label(node, "outputs");
                let renamed = compare_properties(
                    &mut tree,
                    &mut visited,
                    old,
                    new,
                    outputs,
                    &old_res.properties,
                    &new_res.properties,
                );
                apply_required_rule(
                    &mut tree,
                    outputs,
                    &old_res.required,
                    &new_res.required,
                    &new_res.properties,
                    RequiredRule::Outputs,
                    &renamed,
                );
            }
        }
    }

    let functions_node = tree.label(tree.root(), "Functions");
    let empty = ObjectSpec::default();
    for (token, old_fn) in &old.functions {
        let node = tree.value(functions_node, token);
        let Some(new_fn) = new.functions.get(token) else {
            tree.set_description(node, Severity::Danger, "missing");
            continue;
        };
        let old_has_inputs = old_fn.inputs.as_ref().is_some_and(|o| !o.properties.is_empty());
        let new_has_inputs = new_fn.inputs.as_ref().is_some_and(|o| !o.properties.is_empty());
        if old_has_inputs != new_has_inputs {
            tree.set_description(
                node,
                Severity::Danger,
                "function signature changed: inputs have appeared or disappeared",
            );
        }
        let inputs = tree.label(node, "inputs");
        compare_object(
            &mut tree,
            &mut visited,
            old,
            new,
            inputs,
            old_fn.inputs.as_ref().unwrap_or(&empty),
            new_fn.inputs.as_ref().unwrap_or(&empty),
            RequiredRule::Inputs,
        );
        let outputs = tree.label(node, "outputs");
        compare_object(
            &mut tree,
            &mut visited,
            old,
            new,
            outputs,
            old_fn.outputs.as_ref().unwrap_or(&empty),
            new_fn.outputs.as_ref().unwrap_or(&empty),
            RequiredRule::Outputs,
        );
    }

    let mut new_resources: Vec<String> = new
        .resources
        .keys()
        .filter(|t| !old.resources.contains_key(*t))
        .map(|t| display_name(provider, t))
        .collect();
    new_resources.sort();
    let mut new_functions: Vec<String> = new
        .functions
        .keys()
        .filter(|t| !old.functions.contains_key(*t))
        .map(|t| display_name(provider, t))
        .collect();
    new_functions.sort();

    tree.prune();
    ComparisonReport {
        tree,
        new_resources,
        new_functions,
    }
}

#[allow(clippy::too_many_arguments)]
fn compare_object(
    tree: &mut DiagTree,
    visited: &mut Visited,
    old_pkg: &PackageSpec,
    new_pkg: &PackageSpec,
    node: NodeId,
    old_obj: &ObjectSpec,
    new_obj: &ObjectSpec,
    rule: RequiredRule,
) {
    let renamed = compare_properties(
        tree,
        visited,
        old_pkg,
        new_pkg,
        node,
        &old_obj.properties,
        &new_obj.properties,
    );
    apply_required_rule(
        tree,
        node,
        &old_obj.required,
        &new_obj.required,
        &new_obj.properties,
        rule,
        &renamed,
    );
}

/// Walk old properties against new ones. Returns the set of new-side names
/// explained as maxItemsOne renames, so requiredness reporting can skip
/// them.
fn compare_properties<'n>(
    tree: &mut DiagTree,
    visited: &mut Visited,
    old_pkg: &PackageSpec,
    new_pkg: &PackageSpec,
    parent: NodeId,
    old_props: &BTreeMap<String, PropertySpec>,
    new_props: &'n BTreeMap<String, PropertySpec>,
) -> BTreeSet<&'n str> {
    let mut rename_targets = BTreeSet::new();
    for (name, old_prop) in old_props {
        let node = tree.value(parent, name);
        match new_props.get(name) {
            Some(new_prop) => {
                diff_type(
                    tree,
                    visited,
                    old_pkg,
                    new_pkg,
                    node,
                    &old_prop.type_spec,
                    &new_prop.type_spec,
                );
            }
            None => match probe_rename(old_props, new_props, name, old_prop) {
                Some(target) => {
                    tree.set_description(
                        node,
                        Severity::Warn,
                        format!("maxItemsOne property `{}` renamed to `{}`", name, target),
                    );
                    rename_targets.insert(target);
                }
                None => tree.set_description(node, Severity::Warn, "missing"),
            },
        }
    }
    rename_targets
}

/// Pluralization rename probe: a missing property is treated as renamed when
/// a plural/singular counterpart exists in new, did not exist in old, and
/// differs from the old shape by exactly an array wrap.
fn probe_rename<'n>(
    old_props: &BTreeMap<String, PropertySpec>,
    new_props: &'n BTreeMap<String, PropertySpec>,
    name: &str,
    old_prop: &PropertySpec,
) -> Option<&'n str> {
    for candidate in plural_counterparts(name) {
        if old_props.contains_key(&candidate) {
            continue;
        }
        let Some((found, new_prop)) = new_props.get_key_value(candidate.as_str()) else {
            continue;
        };
        if max_items_one_wrap(&old_prop.type_spec, &new_prop.type_spec) {
            return Some(found.as_str());
        }
    }
    None
}

fn apply_required_rule(
    tree: &mut DiagTree,
    node: NodeId,
    old_required: &[String],
    new_required: &[String],
    new_props: &BTreeMap<String, PropertySpec>,
    rule: RequiredRule,
    renamed: &BTreeSet<&str>,
) {
    let old_set: BTreeSet<&str> = old_required.iter().map(String::as_str).collect();
    let new_set: BTreeSet<&str> = new_required.iter().map(String::as_str).collect();
    if matches!(rule, RequiredRule::Inputs | RequiredRule::Symmetric) {
        for name in new_required {
            if old_set.contains(name.as_str()) || renamed.contains(name.as_str()) {
                continue;
            }
            let prop = tree.value(node, name);
            let message = match rule {
                RequiredRule::Inputs => "input has changed to Required",
                _ => "property has changed to Required",
            };
            tree.set_description(prop, Severity::Info, message);
        }
    }
    if matches!(rule, RequiredRule::Outputs | RequiredRule::Symmetric) {
        for name in old_required {
            if new_set.contains(name.as_str()) {
                continue;
            }
            // A removed property is already a `missing` violation.
            if !new_props.contains_key(name) {
                continue;
            }
            let prop = tree.value(node, name);
            tree.set_description(prop, Severity::Info, "property is no longer Required");
        }
    }
}

/// Recursive structural diff of two TypeSpecs under one tree node.
fn diff_type(
    tree: &mut DiagTree,
    visited: &mut Visited,
    old_pkg: &PackageSpec,
    new_pkg: &PackageSpec,
    node: NodeId,
    old: &TypeSpec,
    new: &TypeSpec,
) {
    if max_items_one_wrap(old, new) {
        tree.set_description(
            node,
            Severity::Warn,
            format!(
                "maxItemsOne changed from `{}` to `{}`",
                old.label(),
                new.label()
            ),
        );
        return;
    }
    if old.primitive != new.primitive || old.reference != new.reference {
        tree.set_description(
            node,
            Severity::Warn,
            format!("type changed from `{}` to `{}`", old.label(), new.label()),
        );
        return;
    }

    match (&old.items, &new.items) {
        (Some(old_elem), Some(new_elem)) => {
            let child = tree.label(node, "items");
            diff_type(tree, visited, old_pkg, new_pkg, child, old_elem, new_elem);
        }
        (Some(_), None) | (None, Some(_)) => {
            let child = tree.label(node, "items");
            tree.set_description(child, Severity::Warn, "type is missing on one side");
        }
        (None, None) => {}
    }
    match (&old.additional_properties, &new.additional_properties) {
        (Some(old_vals), Some(new_vals)) => {
            let child = tree.label(node, "additionalProperties");
            diff_type(tree, visited, old_pkg, new_pkg, child, old_vals, new_vals);
        }
        (Some(_), None) | (None, Some(_)) => {
            let child = tree.label(node, "additionalProperties");
            tree.set_description(child, Severity::Warn, "type is missing on one side");
        }
        (None, None) => {}
    }

    if let (Some(old_ref), Some(new_ref)) = (old.local_ref(), new.local_ref()) {
        if visited.insert((old_ref.to_string(), new_ref.to_string())) {
            if let (Some(old_obj), Some(new_obj)) =
                (old_pkg.types.get(old_ref), new_pkg.types.get(new_ref))
            {
                for (name, old_prop) in &old_obj.properties {
                    let child = tree.value(node, name);
                    match new_obj.properties.get(name) {
                        Some(new_prop) => diff_type(
                            tree,
                            visited,
                            old_pkg,
                            new_pkg,
                            child,
                            &old_prop.type_spec,
                            &new_prop.type_spec,
                        ),
                        None => tree.set_description(child, Severity::Warn, "missing"),
                    }
                }
            }
        }
    }
}
