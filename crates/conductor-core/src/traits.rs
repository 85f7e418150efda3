use futures::future::BoxFuture;

use crate::error::Result;
use crate::policy::{PolicyDecision, PolicyRequest};
use crate::types::{AttemptOutcome, DataMap, StageContext};

/// Worker: performs a stage's domain logic.
pub trait Worker: Send + Sync + 'static {
    /// Produce an output mapping from the composed stage input.
    ///
    /// The engine bounds this call with the stage timeout and drops the
    /// future when it elapses.
    fn invoke(&self, input: DataMap) -> BoxFuture<'_, Result<DataMap>>;
}

/// Authorization gate: external policy decision point.
pub trait AuthorizationGate: Send + Sync + 'static {
    /// Decide whether `request` is allowed.
    ///
    /// An `Err` means no decision could be obtained, which is not a denial.
    fn evaluate(&self, request: PolicyRequest) -> BoxFuture<'_, Result<PolicyDecision>>;
}

/// Stage executor: runs one attempt of a stage.
///
/// The engine owns scheduling, retries, and state; the executor owns
/// agent selection, authorization, and invocation for a single attempt.
pub trait StageExecutor: Send + Sync + 'static {
    fn execute(&self, ctx: StageContext) -> BoxFuture<'_, AttemptOutcome>;
}
