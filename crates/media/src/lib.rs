//! Download directory: artifact naming, lookup, MIME detection, TTL cleanup.

pub mod cleanup;
pub mod error;
pub mod mime;
pub mod store;

pub use {
    error::{Error, Result},
    store::{Allocation, ArtifactRef, DownloadStore},
};
