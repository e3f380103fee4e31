pub mod cmfquery;
pub mod errors;
pub mod fluent;
pub mod lineage;
pub mod metadata;
pub mod recorder;
pub mod requests;
pub mod server;
pub mod sync;

pub mod metadata_store;
mod query;
#[cfg(test)]
mod testing;

pub use self::metadata_store::MetadataStore;
