pub mod backend;
pub mod catalog;
pub mod config;
pub mod error;
pub mod export;
pub mod import;
pub mod node;
pub mod store;
pub mod validation;

#[cfg(test)]
mod testing;

pub use backend::{Backend, MemoryBackend, Record, SqliteBackend, StoredKey};
pub use catalog::Catalog;
pub use config::{Config, KeyScheme, SyntheticIds};
pub use error::{NodeLocation, Result, TemplateDbError};
pub use export::{Exporter, Snapshot};
pub use import::{ImportOptions, ImportReport, Importer};
pub use node::{Archive, Embedded, Fields, Node, NodeId, Value};
pub use store::TemplateDb;
