//! Domain operations collaborator.
//!
//! Action executors never talk to the CRM/invoicing/payroll services
//! directly; they call narrow, already-defined domain operations through
//! this interface. The production implementation forwards over HTTP; tests
//! substitute a recording client. Calls are only idempotent-safe because
//! executors wrap them in the durable step runner.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{Error, Result};

/// Narrow interface to the platform's domain operations.
#[async_trait]
pub trait DomainClient: Send + Sync {
    /// Invoke a named operation ("send_message", "refund_payment", ...)
    /// with its rendered payload on behalf of a tenant user.
    async fn invoke(&self, operation: &str, payload: &Value, user_id: &str) -> Result<Value>;
}

/// HTTP-backed domain client for the internal operations API.
pub struct HttpDomainClient {
    base_url: String,
    secret: Option<String>,
    client: reqwest::Client,
}

impl HttpDomainClient {
    pub fn new(base_url: impl Into<String>, secret: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            secret,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl DomainClient for HttpDomainClient {
    async fn invoke(&self, operation: &str, payload: &Value, user_id: &str) -> Result<Value> {
        let url = format!(
            "{}/internal/v1/operations/{}",
            self.base_url.trim_end_matches('/'),
            operation
        );

        debug!(operation, user_id, "Invoking domain operation");

        let mut request = self.client.post(&url).json(&json!({
            "userId": user_id,
            "payload": payload,
        }));
        if let Some(secret) = &self.secret {
            request = request.bearer_auth(secret);
        }

        let response = request.send().await?;
        let status = response.status();

        if status.is_success() {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            return Ok(body);
        }

        let body = response.text().await.unwrap_or_default();
        let code = status.as_u16();
        if status.is_server_error() || code == 408 || code == 429 {
            Err(Error::Transient(format!(
                "domain operation '{}' failed with status {}: {}",
                operation, code, body
            )))
        } else {
            Err(Error::Domain(format!(
                "domain operation '{}' rejected with status {}: {}",
                operation, code, body
            )))
        }
    }
}

/// Recording domain client for tests: logs every call, can fail the first
/// N invocations with a transient error, and returns a canned response.
#[derive(Default)]
pub struct RecordingDomainClient {
    calls: Mutex<Vec<(String, Value)>>,
    response: Option<Value>,
    failures_remaining: AtomicUsize,
}

impl RecordingDomainClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond to every call with `response` instead of `{"ok": true}`.
    pub fn with_response(mut self, response: Value) -> Self {
        self.response = Some(response);
        self
    }

    /// Fail the first `n` calls with a transient error.
    pub fn failing_times(self, n: usize) -> Self {
        self.failures_remaining.store(n, Ordering::SeqCst);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl DomainClient for RecordingDomainClient {
    async fn invoke(&self, operation: &str, payload: &Value, _user_id: &str) -> Result<Value> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((operation.to_string(), payload.clone()));

        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::Transient("injected transient failure".to_string()));
        }

        Ok(self.response.clone().unwrap_or_else(|| json!({"ok": true})))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_client_logs_calls() {
        let client = RecordingDomainClient::new();
        client
            .invoke("send_message", &json!({"contactId": "c-1"}), "user-1")
            .await
            .unwrap();

        assert_eq!(client.call_count(), 1);
        assert_eq!(client.calls()[0].0, "send_message");
    }

    #[tokio::test]
    async fn test_recording_client_injected_failures_clear() {
        let client = RecordingDomainClient::new().failing_times(2);

        assert!(client.invoke("op", &json!({}), "u").await.is_err());
        assert!(client.invoke("op", &json!({}), "u").await.is_err());
        assert!(client.invoke("op", &json!({}), "u").await.is_ok());
        assert_eq!(client.call_count(), 3);
    }
}
