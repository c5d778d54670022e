//! Resource model and label-scoped resource access
//!
//! - `resource.rs` - [`Resource`] wrapper and identity types
//! - `selector.rs` - Equality-based label selectors
//! - `filter.rs` - Include/exclude filtering by kind and namespace
//! - `manifest.rs` - YAML manifest parsing
//! - `prepare.rs` - Namespace defaulting and duplicate detection
//! - `labeled.rs` - Ownership labeling and listing of owned resources

pub mod filter;
pub mod labeled;
pub mod manifest;
pub mod prepare;
pub mod resource;
pub mod selector;

pub use filter::ResourceFilter;
pub use labeled::{AllAndMatchingOpts, LabelMod, LabeledResources};
pub use manifest::{parse_manifest, read_manifest_files};
pub use prepare::Preparation;
pub use resource::{GroupVersion, OwnerRef, Resource, ResourceKey};
pub use selector::{LabelSelector, Requirement};
