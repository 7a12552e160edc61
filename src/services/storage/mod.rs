//! Object storage gateway over an S3-compatible store.
//!
//! [`Gateway`] is the immutable, process-wide handle; a [`GatewaySession`]
//! is derived from it per operation chain, pinned to one bucket and one
//! [`OperationScope`]. [`ObjectStore`] is the transport seam, implemented
//! for AWS SDK clients by [`S3ObjectStore`].

pub mod error;
pub mod gateway;
pub mod s3;
pub mod scope;
pub mod store;
pub mod types;

pub use error::{StorageError, StorageResult};
pub use gateway::{BucketPresence, Gateway, GatewaySession};
pub use s3::S3ObjectStore;
pub use scope::{ChildScope, OperationScope};
pub use store::ObjectStore;
pub use types::*;
