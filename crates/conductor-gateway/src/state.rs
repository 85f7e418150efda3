use conductor_core::config::GatewayConfig;

use crate::services::Services;

/// Shared application state for axum handlers.
pub struct AppState {
    pub config: GatewayConfig,
    pub services: Services,
}
