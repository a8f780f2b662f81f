//! Persistence layer: a key/document store with libSQL and in-memory backends.

mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlStore;
pub use memory::{MemoryStore, UnavailableStore};
pub use traits::{DocumentStore, get_doc, put_doc};
