//! HTTP front end for the fetch service.

pub mod routes;
pub mod server;
pub mod state;

pub use {
    server::{build_gateway_app, start_gateway},
    state::AppState,
};
