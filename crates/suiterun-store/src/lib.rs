//! Store clients for suiterun.
//!
//! The run/result store holds run records and task results; the secret store
//! holds per-product configuration. Both are external services reached
//! through the traits in [`store`] and [`secrets`], with HTTP/filesystem
//! implementations for production and in-memory ones for tests.

pub mod error;
pub mod http;
pub mod memory;
pub mod secrets;
pub mod store;

pub use error::StoreError;
pub use http::HttpStore;
pub use memory::MemoryStore;
pub use secrets::{MemorySecrets, MountedSecrets, SecretStore};
pub use store::{ResultStore, RunStore, TaskStore};
