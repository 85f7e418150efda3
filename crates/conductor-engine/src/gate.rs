use futures::future::BoxFuture;
use tracing::debug;

use conductor_core::error::Result;
use conductor_core::policy::{PolicyDecision, PolicyRequest, StaticPolicy};
use conductor_core::traits::AuthorizationGate;

/// Authorization gate backed by in-process rules.
pub struct StaticGate {
    policy: StaticPolicy,
}

impl StaticGate {
    pub fn new(policy: StaticPolicy) -> Self {
        Self { policy }
    }

    pub fn allow_all() -> Self {
        Self::new(StaticPolicy::allow_all())
    }

    pub fn policy(&self) -> &StaticPolicy {
        &self.policy
    }
}

impl AuthorizationGate for StaticGate {
    fn evaluate(&self, request: PolicyRequest) -> BoxFuture<'_, Result<PolicyDecision>> {
        Box::pin(async move {
            let decision = self.policy.decide(&request);
            debug!(
                agent_id = %request.agent_id,
                action = %request.action,
                resource = %request.resource,
                allow = decision.allow,
                "Static policy decision"
            );
            Ok(decision)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::policy::{Effect, PolicyRule};

    #[tokio::test]
    async fn evaluates_rules() {
        let gate = StaticGate::new(StaticPolicy::allow_all().with_rule(PolicyRule {
            agent: "*".into(),
            action: "*".into(),
            resource: "security".into(),
            effect: Effect::Deny,
        }));

        let denied = gate
            .evaluate(PolicyRequest::execute_stage("a", "security", "wf"))
            .await
            .unwrap();
        assert!(!denied.allow);

        let allowed = gate
            .evaluate(PolicyRequest::execute_stage("a", "triage", "wf"))
            .await
            .unwrap();
        assert!(allowed.allow);
    }
}
