mod auth;
mod error;
mod middleware;
mod routes;
mod server;
mod services;
mod state;

pub use server::GatewayServer;
pub use services::Services;
