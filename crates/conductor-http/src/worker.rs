use std::collections::HashMap;

use futures::future::BoxFuture;
use reqwest::Client;
use tracing::debug;

use conductor_core::error::{ConductorError, Result};
use conductor_core::traits::Worker;
use conductor_core::types::DataMap;

/// Worker backed by a remote service.
///
/// The composed stage input is POSTed as a JSON object; the response body
/// must be a JSON object and becomes the stage output. The engine's stage
/// timeout bounds the whole request.
pub struct HttpWorker {
    http: Client,
    agent_id: String,
    url: String,
    token: Option<String>,
    headers: HashMap<String, String>,
}

impl HttpWorker {
    pub fn new(
        agent_id: impl Into<String>,
        url: impl Into<String>,
        token: Option<String>,
        headers: HashMap<String, String>,
    ) -> Self {
        Self {
            http: Client::new(),
            agent_id: agent_id.into(),
            url: url.into(),
            token,
            headers,
        }
    }

    fn error(&self, message: impl Into<String>) -> ConductorError {
        ConductorError::Worker {
            agent: self.agent_id.clone(),
            message: message.into(),
        }
    }
}

impl Worker for HttpWorker {
    fn invoke(&self, input: DataMap) -> BoxFuture<'_, Result<DataMap>> {
        Box::pin(async move {
            let mut request = self
                .http
                .post(&self.url)
                .header("content-type", "application/json");
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }
            for (name, value) in &self.headers {
                request = request.header(name.as_str(), value.as_str());
            }

            debug!(agent_id = %self.agent_id, url = %self.url, "Invoking HTTP worker");
            let response = request
                .json(&input)
                .send()
                .await
                .map_err(|e| self.error(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown".to_string());
                return Err(self.error(format!("HTTP {}: {}", status, body)));
            }

            let body: serde_json::Value = response
                .json()
                .await
                .map_err(|e| self.error(format!("invalid response body: {}", e)))?;
            match body {
                serde_json::Value::Object(output) => Ok(output),
                other => Err(self.error(format!(
                    "expected a JSON object, got {}",
                    json_kind(&other)
                ))),
            }
        })
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn input() -> DataMap {
        match serde_json::json!({"ticket": {"id": "T1"}}) {
            serde_json::Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn posts_input_and_returns_object() {
        let base = serve(Router::new().route(
            "/triage",
            post(|headers: HeaderMap, Json(body): Json<serde_json::Value>| async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                Json(serde_json::json!({
                    "category": "hardware",
                    "seen_ticket": body["ticket"]["id"],
                    "auth": auth,
                }))
            }),
        ))
        .await;

        let worker = HttpWorker::new(
            "triage_agent",
            format!("{}/triage", base),
            Some("s3cret".into()),
            HashMap::new(),
        );
        let output = worker.invoke(input()).await.unwrap();
        assert_eq!(output["category"], "hardware");
        assert_eq!(output["seen_ticket"], "T1");
        assert_eq!(output["auth"], "Bearer s3cret");
    }

    #[tokio::test]
    async fn non_success_status_is_worker_error() {
        let base = serve(Router::new().route(
            "/triage",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "overloaded") }),
        ))
        .await;

        let worker = HttpWorker::new("triage_agent", format!("{}/triage", base), None, HashMap::new());
        match worker.invoke(input()).await {
            Err(ConductorError::Worker { agent, message }) => {
                assert_eq!(agent, "triage_agent");
                assert!(message.contains("503"));
                assert!(message.contains("overloaded"));
            }
            other => panic!("expected worker error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn non_object_body_is_worker_error() {
        let base = serve(Router::new().route(
            "/triage",
            post(|| async { Json(serde_json::json!(["not", "an", "object"])) }),
        ))
        .await;

        let worker = HttpWorker::new("triage_agent", format!("{}/triage", base), None, HashMap::new());
        let err = worker.invoke(input()).await.unwrap_err();
        assert!(err.to_string().contains("an array"));
    }

    #[tokio::test]
    async fn unreachable_service_is_worker_error() {
        let worker = HttpWorker::new("triage_agent", "http://127.0.0.1:1/none", None, HashMap::new());
        let err = worker.invoke(input()).await.unwrap_err();
        assert!(matches!(err, ConductorError::Worker { .. }));
        assert!(err.is_retryable());
    }
}
