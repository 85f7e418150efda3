pub mod audit;
pub mod engine;
pub mod executor;
pub mod gate;
pub mod registry;
pub mod session;
pub mod store;
pub mod workers;

pub use audit::AuditLogger;
pub use engine::{compose_input, ExecuteOptions, OrchestrationEngine};
pub use executor::DefaultStageExecutor;
pub use gate::StaticGate;
pub use registry::{AgentRegistry, Candidates};
pub use session::SessionManager;
pub use store::ExecutionStore;
pub use workers::{StaticWorker, WorkerRegistry};
