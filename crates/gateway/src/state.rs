use std::sync::Arc;

use mediafetch_fetch::FetchService;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<FetchService>,
    pub version: &'static str,
}

impl AppState {
    pub fn new(service: FetchService) -> Self {
        Self {
            service: Arc::new(service),
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}
