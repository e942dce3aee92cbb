//! Product naming rules shared by the ingest and build workflows.

pub mod value_objects;

pub use value_objects::{ProcessingLevel, ProductName, TileId, ValidationError};
