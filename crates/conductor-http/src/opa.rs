use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use tracing::{debug, warn};

use conductor_core::config::OpaConfig;
use conductor_core::error::{ConductorError, Result};
use conductor_core::policy::{PolicyDecision, PolicyRequest};
use conductor_core::traits::AuthorizationGate;

/// Authorization gate that asks an Open Policy Agent server.
///
/// Sends `{"input": <request>}` to the configured data path and reads
/// `result.allow`. A missing `allow` is a deny. A transport failure or a
/// non-2xx answer is `PolicyUnavailable`, never a deny.
pub struct OpaGate {
    http: Client,
    url: String,
    timeout: Duration,
}

impl OpaGate {
    pub fn new(config: &OpaConfig) -> Self {
        Self {
            http: Client::new(),
            url: config.opa_url.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Interpret an OPA response document.
fn decision_from(body: &serde_json::Value) -> PolicyDecision {
    let result = body.get("result").cloned().unwrap_or(serde_json::Value::Null);
    let allow = result
        .get("allow")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false);
    let reason = if allow {
        None
    } else {
        Some(
            result
                .get("reason")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("not allowed by policy")
                .to_string(),
        )
    };
    PolicyDecision {
        allow,
        reason,
        raw: result,
    }
}

impl AuthorizationGate for OpaGate {
    fn evaluate(&self, request: PolicyRequest) -> BoxFuture<'_, Result<PolicyDecision>> {
        Box::pin(async move {
            let body = serde_json::json!({ "input": request });
            let response = self
                .http
                .post(&self.url)
                .timeout(self.timeout)
                .json(&body)
                .send()
                .await
                .map_err(|e| {
                    warn!(url = %self.url, error = %e, "OPA request failed");
                    ConductorError::PolicyUnavailable(e.to_string())
                })?;

            if !response.status().is_success() {
                let status = response.status();
                return Err(ConductorError::PolicyUnavailable(format!("HTTP {}", status)));
            }

            let doc: serde_json::Value = response
                .json()
                .await
                .map_err(|e| ConductorError::PolicyUnavailable(format!("invalid OPA response: {}", e)))?;
            let decision = decision_from(&doc);
            debug!(
                agent_id = %request.agent_id,
                action = %request.action,
                resource = %request.resource,
                allow = decision.allow,
                "OPA decision"
            );
            Ok(decision)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/v1/data/agent/policy", addr)
    }

    fn gate(url: String) -> OpaGate {
        OpaGate::new(&OpaConfig {
            opa_url: url,
            timeout_secs: 2,
        })
    }

    #[test]
    fn missing_allow_is_deny() {
        let d = decision_from(&serde_json::json!({}));
        assert!(!d.allow);
        let d = decision_from(&serde_json::json!({"result": {"allow": "yes"}}));
        assert!(!d.allow);
        let d = decision_from(&serde_json::json!({"result": {"allow": true}}));
        assert!(d.allow);
        assert!(d.reason.is_none());
    }

    #[tokio::test]
    async fn allows_only_triage_agent() {
        let url = serve(Router::new().route(
            "/v1/data/agent/policy",
            post(|Json(body): Json<serde_json::Value>| async move {
                let allow = body["input"]["agent_id"] == "triage_agent"
                    && body["input"]["context"]["workflow_id"] == "wf";
                Json(serde_json::json!({"result": {"allow": allow}}))
            }),
        ))
        .await;
        let gate = gate(url);

        let ok = gate
            .evaluate(PolicyRequest::execute_stage("triage_agent", "triage", "wf"))
            .await
            .unwrap();
        assert!(ok.allow);
        assert_eq!(ok.raw["allow"], true);

        let denied = gate
            .evaluate(PolicyRequest::execute_stage("intruder", "triage", "wf"))
            .await
            .unwrap();
        assert!(!denied.allow);
    }

    #[tokio::test]
    async fn unreachable_server_is_unavailable() {
        let gate = gate("http://127.0.0.1:1/v1/data/agent/policy".into());
        let err = gate
            .evaluate(PolicyRequest::execute_stage("triage_agent", "triage", "wf"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConductorError::PolicyUnavailable(_)));
    }

    #[tokio::test]
    async fn server_error_is_unavailable() {
        let url = serve(Router::new().route(
            "/v1/data/agent/policy",
            post(|| async { axum::http::StatusCode::INTERNAL_SERVER_ERROR }),
        ))
        .await;
        let err = gate(url)
            .evaluate(PolicyRequest::execute_stage("triage_agent", "triage", "wf"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConductorError::PolicyUnavailable(_)));
    }
}
