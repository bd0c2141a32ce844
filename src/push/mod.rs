/// Push Notification Relay
///
/// Best-effort delivery of notification payloads to device tokens through an
/// external HTTP push gateway. Relay failure is a recoverable, loggable
/// condition; the message send path never surfaces it to the caller.
use crate::config::PushConfig;
use crate::error::{CourierError, CourierResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Notification payload handed to the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    /// "message" for a relayed chat message, "receipt" for a read/delivered
    /// notification back to the sender
    pub kind: String,
    pub message_id: String,
    pub conversation_id: String,
    pub sender: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl PushPayload {
    pub fn message(message_id: &str, conversation_id: &str, sender: &str, body: &str) -> Self {
        Self {
            kind: "message".to_string(),
            message_id: message_id.to_string(),
            conversation_id: conversation_id.to_string(),
            sender: sender.to_string(),
            body: Some(body.to_string()),
            status: None,
        }
    }

    pub fn receipt(message_id: &str, conversation_id: &str, sender: &str, status: &str) -> Self {
        Self {
            kind: "receipt".to_string(),
            message_id: message_id.to_string(),
            conversation_id: conversation_id.to_string(),
            sender: sender.to_string(),
            body: None,
            status: Some(status.to_string()),
        }
    }
}

/// Push delivery backend
///
/// Implementations attempt delivery of one payload to one device token.
#[async_trait]
pub trait PushBackend: Send + Sync {
    async fn send(&self, token: &str, payload: &PushPayload) -> CourierResult<()>;
}

/// HTTP push gateway backend
pub struct HttpPushGateway {
    config: PushConfig,
    client: reqwest::Client,
}

impl HttpPushGateway {
    pub fn new(config: PushConfig) -> CourierResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CourierError::Internal(format!("Push client setup failed: {}", e)))?;

        Ok(Self { config, client })
    }
}

#[async_trait]
impl PushBackend for HttpPushGateway {
    async fn send(&self, token: &str, payload: &PushPayload) -> CourierResult<()> {
        let mut request = self
            .client
            .post(&self.config.gateway_url)
            .json(&serde_json::json!({
                "to": token,
                "priority": "high",
                "data": payload,
            }));

        if let Some(ref api_key) = self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CourierError::Push(format!("Gateway request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(CourierError::Push(format!(
                "Gateway returned {}",
                response.status()
            )));
        }

        Ok(())
    }
}

/// Push relay service wrapping the configured backend
#[derive(Clone)]
pub struct PushRelay {
    backend: Option<Arc<dyn PushBackend>>,
}

impl PushRelay {
    /// Create a relay from configuration. Absent config disables relaying;
    /// send attempts then fail and messages stay queued.
    pub fn new(config: Option<PushConfig>) -> CourierResult<Self> {
        let backend = match config {
            Some(push_config) => {
                Some(Arc::new(HttpPushGateway::new(push_config)?) as Arc<dyn PushBackend>)
            }
            None => {
                tracing::warn!("Push gateway not configured, messages will stay queued");
                None
            }
        };

        Ok(Self { backend })
    }

    /// Create a relay over an explicit backend
    pub fn with_backend(backend: Arc<dyn PushBackend>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    /// Attempt delivery to a device token
    pub async fn send(&self, token: &str, payload: &PushPayload) -> CourierResult<()> {
        match self.backend {
            Some(ref backend) => backend.send(token, payload).await,
            None => Err(CourierError::Push(
                "Push gateway not configured".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_relay_fails_send() {
        let relay = PushRelay::new(None).unwrap();
        let payload = PushPayload::message("m1", "a:b", "user-a", "hello");

        let err = relay.send("token-1", &payload).await.unwrap_err();
        assert!(matches!(err, CourierError::Push(_)));
    }

    #[test]
    fn test_receipt_payload_shape() {
        let payload = PushPayload::receipt("m1", "a:b", "user-b", "delivered");
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["kind"], "receipt");
        assert_eq!(json["status"], "delivered");
        assert!(json.get("body").is_none());
    }
}
