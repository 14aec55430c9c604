//! Schema snapshot data model
//!
//! Typed mapping of the provider package schema JSON: named resources,
//! callable functions, and shared named types, each carrying typed properties
//! with container-level required sets. All entity containers are `BTreeMap`
//! so every walk over them is deterministic by construction.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Prefix of a reference into the local named-type table
const LOCAL_TYPE_PREFIX: &str = "#/types/";

// =============================================================================
// Type Spec
// =============================================================================

/// A (possibly recursive) type expression.
///
/// One of: primitive (`type`), named-type reference (`$ref`), array (`items`),
/// map (`additionalProperties`), or union (`oneOf` + optional discriminator).
/// References resolve within the same snapshot's `types` table and the graph
/// may be cyclic, so every recursive walker carries a visited set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeSpec {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub primitive: Option<String>,
    #[serde(rename = "$ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<TypeSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_properties: Option<Box<TypeSpec>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub one_of: Vec<TypeSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discriminator: Option<Discriminator>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub plain: bool,
}

impl TypeSpec {
    pub fn primitive(name: &str) -> Self {
        Self {
            primitive: Some(name.to_string()),
            ..Default::default()
        }
    }

    pub fn reference(target: &str) -> Self {
        Self {
            reference: Some(target.to_string()),
            ..Default::default()
        }
    }

    pub fn array_of(elem: TypeSpec) -> Self {
        Self {
            primitive: Some("array".to_string()),
            items: Some(Box::new(elem)),
            ..Default::default()
        }
    }

    /// The local named-type token this spec references, if any
    pub fn local_ref(&self) -> Option<&str> {
        self.reference.as_deref().and_then(local_type_token)
    }

    /// Compact human-readable label for messages and change records
    pub fn label(&self) -> String {
        if let Some(r) = &self.reference {
            return local_type_token(r).unwrap_or(r).to_string();
        }
        if let Some(items) = &self.items {
            return format!("array<{}>", items.label());
        }
        if let Some(values) = &self.additional_properties {
            return format!("map<{}>", values.label());
        }
        if !self.one_of.is_empty() {
            return "union".to_string();
        }
        match &self.primitive {
            Some(p) => p.clone(),
            None => "unknown".to_string(),
        }
    }
}

/// Union discriminator: field name plus an optional ref mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Discriminator {
    pub property_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping: Option<BTreeMap<String, String>>,
}

/// Strip the local type-table prefix from a `$ref` target
pub fn local_type_token(reference: &str) -> Option<&str> {
    reference.strip_prefix(LOCAL_TYPE_PREFIX)
}

/// True when the two specs differ by exactly an array-wrap of an identical
/// element: one side is `array<T>` and the other is `T` itself.
pub fn max_items_one_wrap(a: &TypeSpec, b: &TypeSpec) -> bool {
    match (&a.items, &b.items) {
        (Some(elem), None) => elem.as_ref() == b,
        (None, Some(elem)) => elem.as_ref() == a,
        _ => false,
    }
}

// =============================================================================
// Properties and containers
// =============================================================================

/// A typed property. Requiredness is not stored here; each container holds
/// its own ordered required-name set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertySpec {
    #[serde(flatten)]
    pub type_spec: TypeSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

impl PropertySpec {
    pub fn of(type_spec: TypeSpec) -> Self {
        Self {
            type_spec,
            ..Default::default()
        }
    }
}

/// Plain object shape: properties plus the required subset of their names
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectSpec {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, PropertySpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

/// A named resource: inputs with their required set, outputs with theirs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub input_properties: BTreeMap<String, PropertySpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_inputs: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, PropertySpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

/// A callable function with optional input and output object shapes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<ObjectSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<ObjectSpec>,
}

// =============================================================================
// Package
// =============================================================================

/// One full schema snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ObjectSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ResourceSpec>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resources: BTreeMap<String, ResourceSpec>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub functions: BTreeMap<String, FunctionSpec>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub types: BTreeMap<String, ObjectSpec>,
}

impl PackageSpec {
    pub fn from_str(payload: &str) -> serde_json::Result<Self> {
        serde_json::from_str(payload)
    }

    /// Resolve a `$ref` of the local `#/types/<token>` form
    pub fn resolve_type(&self, reference: &str) -> Option<&ObjectSpec> {
        self.types.get(local_type_token(reference)?)
    }
}

/// Display name for an entity token: strip the provider prefix and replace
/// module separators with `.`
pub fn display_name(provider: &str, token: &str) -> String {
    let prefix = format!("{}:", provider);
    token
        .strip_prefix(&prefix)
        .unwrap_or(token)
        .replace(':', ".")
}

/// Plural/singular counterparts of a property name, used when probing for a
/// renamed property. Deliberately narrow: append one `s`, or strip one.
pub fn plural_counterparts(name: &str) -> Vec<String> {
    let mut candidates = vec![format!("{}s", name)];
    if let Some(stripped) = name.strip_suffix('s') {
        if !stripped.is_empty() {
            candidates.push(stripped.to_string());
        }
    }
    candidates
}
