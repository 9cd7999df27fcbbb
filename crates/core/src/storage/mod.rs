//! Artifact persistence on top of object storage.
//!
//! [`ObjectStore`] is the thin backend seam (S3/MinIO or memory);
//! [`ArtifactStore`] adds checksums, idempotent puts and retries.

mod artifact;
mod error;
mod keys;
mod memory;
mod s3;
mod traits;

pub use artifact::{ArtifactStore, PutOutcome, PutReport};
pub use error::StorageError;
pub use keys::{ArtifactKeys, ArtifactKind};
pub use memory::InMemoryObjectStore;
pub use s3::{S3Config, S3ObjectStore};
pub use traits::{ObjectInfo, ObjectStore};
