//! Provider Schema Compatibility Checker
//!
//! Detects breaking changes between two versions of a provider package
//! schema: resources, invokable functions, and the shared named-type table.
//!
//! ## Features
//!
//! - **Structural diffing**: property-by-property comparison of resources,
//!   functions, and named types, with cycle-safe descent into the type graph
//! - **Severity-ranked findings**: informational, warning, and danger
//!   diagnostics accumulated in a hierarchical tree
//! - **Metadata-driven normalization**: historical aliasing metadata proves
//!   token renames and maxItemsOne flips as continuations instead of breaks
//! - **Deterministic output**: identical inputs always render the identical
//!   report, in text or JSON
//!
//! ## Pipeline
//!
//! ```text
//! old schema ─┐                         ┌─> violation tree ─> report
//!             ├─> normalize ─> compare ─┤
//! new schema ─┘       ^                 └─> new-entity lists
//!                     │
//!        aliasing metadata (old + new)
//! ```

pub mod compare;
pub mod diag;
pub mod error;
pub mod evidence;
pub mod meta;
pub mod normalize;
pub mod remap;
pub mod report;
pub mod schema;

pub use compare::{compare_packages, ComparisonReport};
pub use diag::{DiagTree, Severity};
pub use error::{CompatError, Result, Side};
pub use evidence::{FieldEvidence, Transition};
pub use meta::{MetadataEnvelope, Scope};
pub use normalize::{normalize, MaxItemsOneChange, NormalizeOutput, TokenRename};
pub use remap::TokenRemap;
pub use report::Summary;
pub use schema::PackageSpec;
