pub mod backend;
pub mod cache;
pub mod local;
pub mod resilience;
pub mod s3;

pub use backend::{HealthStatus, Stat, StorageBackend, StorageError, StorageKind};
pub use local::LocalBackend;
pub use s3::{S3Backend, S3Config};
