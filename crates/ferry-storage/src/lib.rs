//! Ferry Storage Library
//!
//! Destination abstraction for migrated objects with a local filesystem backend and a
//! Google Drive backend.
//!
//! # Destination layout
//!
//! Objects land in a folder hierarchy `{root_folder}/{folder_prefix}{container_id}`.
//! Every uploaded file name starts with `{object_id}__`. The local backend finds an object
//! again by that prefix; Drive also stores the id in `appProperties`. Either way uploads
//! stay idempotent across crashes.

#[cfg(feature = "storage-drive")]
pub mod drive;
pub mod factory;
pub(crate) mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
pub mod traits;

// Re-export commonly used types
#[cfg(feature = "storage-drive")]
pub use drive::DriveDestination;
pub use factory::create_destination;
#[cfg(feature = "storage-local")]
pub use local::LocalDestination;
pub use traits::{Destination, DestinationError, DestinationResult, FolderRef, UploadMetadata};
