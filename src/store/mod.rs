// src/store/mod.rs — Plugin metadata persistence

pub mod metadata;
pub mod schema;

pub use metadata::{MetadataStore, SqliteMetadataStore};
