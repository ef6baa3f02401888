//! Error-context helpers shared by the mediafetch crates.

pub mod error;

pub use error::FromMessage;
