//! S3-compatible object store access and the model catalog built on top of
//! it. The deployment target is a MinIO endpoint, so the client pins static
//! credentials, a custom endpoint and path-style addressing.

mod catalog;
mod gateway;

pub use catalog::{ModelCatalog, MODEL_SUFFIXES};
pub use gateway::{has_suffix, ObjectStoreGateway};
