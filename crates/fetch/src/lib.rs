//! Media retrieval: runs `yt-dlp` under a worker pool with a hard timeout,
//! streams direct audio links, and scrapes metadata for sites the downloader
//! handles poorly.

pub mod direct;
pub mod error;
pub mod exec;
pub mod extractors;
pub mod service;
pub mod types;
pub mod ytdlp;

pub use {
    error::{Error, Result},
    service::FetchService,
    types::{FetchRequest, MediaFormat, MediaInfo},
};
