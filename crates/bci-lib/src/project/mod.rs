//! Project directories, their metadata documents and the shared registry.

pub mod layout;
pub mod metadata;
pub(crate) mod persist;
pub mod registry;
pub mod store;

pub use layout::ProjectLayout;
pub use metadata::{
    ArtifactCategory, FieldValue, MetadataField, MetadataFile, ProgressMap, ProgressSummary,
    ProjectMetadata, Stage, METADATA_FILE,
};
pub use registry::{RegistryEntry, LEGACY_REGISTRY_FILE, REGISTRY_FILE};
pub use store::{ProjectStore, ProjectSummary};
