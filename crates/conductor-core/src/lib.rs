pub mod agent;
pub mod config;
pub mod error;
pub mod event;
pub mod execution;
pub mod policy;
pub mod session;
pub mod traits;
pub mod types;
pub mod workflow;

pub use config::AppConfig;
pub use error::{ConductorError, Result};
pub use event::EventBus;
pub use types::*;
