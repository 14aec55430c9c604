//! Historical metadata model and loader
//!
//! Parses the externally supplied historical-record payload (token aliases
//! and per-field singleton-vs-collection history) into a typed tree. Pure
//! data: no schema knowledge lives here.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{CompatError, Result};

/// Top-level section the loader requires in a metadata payload
const ALIASING_SECTION: &str = "auto-aliasing";

/// Which entity kind a historical record belongs to.
///
/// Resource-like and function-like histories live in separate namespaces and
/// must never merge, even when they reuse a literal token string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Resources,
    Functions,
}

impl Scope {
    pub const ALL: [Scope; 2] = [Scope::Resources, Scope::Functions];

    /// Key used for this scope in the wire payload
    pub fn wire_key(&self) -> &'static str {
        match self {
            Scope::Resources => "resources",
            Scope::Functions => "datasources",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Resources => write!(f, "resources"),
            Scope::Functions => write!(f, "functions"),
        }
    }
}

/// One past alias of a token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenAlias {
    pub name: String,
    #[serde(default)]
    pub in_codegen: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub major_version: Option<u64>,
}

/// Recursive per-field history: a tri-state singleton-vs-collection flag,
/// nested named-field histories, and one optional array-element history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldHistory {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_items_one: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<BTreeMap<String, FieldHistory>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elem: Option<Box<FieldHistory>>,
}

/// History record for one external token
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenHistory {
    /// Current canonical schema token
    #[serde(default)]
    pub current: String,
    /// Ordered list of past aliases
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub past: Vec<TokenAlias>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<BTreeMap<String, FieldHistory>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub major_version: Option<u64>,
}

/// Wire shape of the aliasing section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AliasingSection {
    #[serde(default)]
    resources: BTreeMap<String, TokenHistory>,
    #[serde(default)]
    datasources: BTreeMap<String, TokenHistory>,
}

/// Per entity-kind mapping from external historical token to its history
#[derive(Debug, Clone, Default)]
pub struct MetadataEnvelope {
    resources: BTreeMap<String, TokenHistory>,
    functions: BTreeMap<String, TokenHistory>,
}

impl MetadataEnvelope {
    /// Parse and shape-validate a metadata payload. A payload without the
    /// aliasing section, or whose section fails to deserialize, is a typed
    /// non-retryable [`CompatError::MetadataShape`].
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let section = value.get(ALIASING_SECTION).ok_or_else(|| {
            CompatError::MetadataShape(format!("missing `{}` section", ALIASING_SECTION))
        })?;
        let parsed: AliasingSection = serde_json::from_value(section.clone())
            .map_err(|e| CompatError::MetadataShape(e.to_string()))?;
        Ok(Self {
            resources: parsed.resources,
            functions: parsed.datasources,
        })
    }

    pub fn from_str(payload: &str) -> Result<Self> {
        Self::from_value(serde_json::from_str(payload)?)
    }

    /// Histories for one scope, keyed by external historical token
    pub fn entries(&self, scope: Scope) -> &BTreeMap<String, TokenHistory> {
        match scope {
            Scope::Resources => &self.resources,
            Scope::Functions => &self.functions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_loads_aliasing_section() {
        let env = MetadataEnvelope::from_value(json!({
            "auto-aliasing": {
                "resources": {
                    "pkg_widget": {
                        "current": "pkg:index:Widget",
                        "past": [{ "name": "pkg:index:OldWidget", "inCodegen": true }],
                        "fields": {
                            "rules": {
                                "maxItemsOne": true,
                                "elem": { "fields": { "filter": { "maxItemsOne": false } } }
                            }
                        }
                    }
                },
                "datasources": {
                    "pkg_get_widget": { "current": "pkg:index:getWidget" }
                }
            }
        }))
        .unwrap();

        let res = env.entries(Scope::Resources);
        assert_eq!(res["pkg_widget"].current, "pkg:index:Widget");
        assert_eq!(res["pkg_widget"].past[0].name, "pkg:index:OldWidget");
        let rules = &res["pkg_widget"].fields.as_ref().unwrap()["rules"];
        assert_eq!(rules.max_items_one, Some(true));
        assert!(rules.elem.is_some());

        assert_eq!(
            env.entries(Scope::Functions)["pkg_get_widget"].current,
            "pkg:index:getWidget"
        );
    }

    #[test]
    fn test_missing_section_is_shape_error() {
        let err = MetadataEnvelope::from_value(json!({ "something-else": {} })).unwrap_err();
        assert!(matches!(err, CompatError::MetadataShape(_)));
    }

    #[test]
    fn test_malformed_section_is_shape_error() {
        let err = MetadataEnvelope::from_value(json!({
            "auto-aliasing": { "resources": [1, 2, 3] }
        }))
        .unwrap_err();
        assert!(matches!(err, CompatError::MetadataShape(_)));
    }
}
