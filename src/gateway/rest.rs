//! REST command transport: `reqwest`.
//!
//! `POST {base}/orders` and `POST {base}/orders/{id}/cancel`. Every request
//! carries the command id as `Idempotency-Key` so a retried submit is safe to
//! deliver twice.

use super::transport::CommandTransport;
use crate::domain::order::wire::{CancelBody, CancelData, CommandResponse};
use crate::domain::order::{Acknowledgement, OrderCommand};
use crate::error::CommandError;
use crate::shared::CommandId;
use crate::ws::CredentialsProvider;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Command transport for one venue's REST endpoint.
#[derive(Clone)]
pub struct RestTransport {
    base_url: String,
    client: Client,
    timeout: Duration,
    credentials: Option<Arc<dyn CredentialsProvider>>,
}

impl RestTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CommandError> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| CommandError::Transport(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            timeout,
            credentials: None,
        })
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialsProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        url: &str,
        id: &CommandId,
        body: &B,
    ) -> Result<T, CommandError> {
        let mut req = self
            .client
            .post(url)
            .header(IDEMPOTENCY_HEADER, id.as_str())
            .json(body);

        if let Some(token) = self.credentials.as_ref().and_then(|c| c.token()) {
            req = req.header("Authorization", format!("Bearer {}", token));
        }

        let resp = req.send().await.map_err(|e| self.map_reqwest(e))?;
        let status = resp.status();
        if status.is_success() {
            let parsed = resp
                .json::<CommandResponse<T>>()
                .await
                .map_err(|e| CommandError::Transport(e.to_string()))?;
            return parsed.into_result();
        }
        Err(error_for_status(status, id, resp).await)
    }

    fn map_reqwest(&self, e: reqwest::Error) -> CommandError {
        if e.is_timeout() {
            CommandError::Timeout(self.timeout.as_millis() as u64)
        } else if e.is_connect() || e.is_request() {
            CommandError::ConnectionReset(e.to_string())
        } else {
            CommandError::Transport(e.to_string())
        }
    }
}

impl std::fmt::Debug for RestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestTransport")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("has_credentials", &self.credentials.is_some())
            .finish()
    }
}

#[async_trait]
impl CommandTransport for RestTransport {
    async fn submit(&self, command: &OrderCommand) -> Result<Acknowledgement, CommandError> {
        let url = format!("{}/orders", self.base_url);
        self.post(&url, &command.id, command).await
    }

    async fn cancel(&self, id: &CommandId) -> Result<bool, CommandError> {
        let url = format!(
            "{}/orders/{}/cancel",
            self.base_url,
            urlencoding::encode(id.as_str())
        );
        let body = CancelBody {
            command_id: id.clone(),
        };
        let data: CancelData = self.post(&url, id, &body).await?;
        Ok(data.cancelled)
    }
}

async fn error_for_status(status: StatusCode, id: &CommandId, resp: Response) -> CommandError {
    let retry_after_ms = retry_after_ms(&resp);
    let body = resp.text().await.unwrap_or_default();

    match status.as_u16() {
        401 | 403 => CommandError::Unauthorized,
        404 => CommandError::NotFound(id.clone()),
        408 => CommandError::Timeout(0),
        429 => CommandError::RateLimited { retry_after_ms },
        400..=499 => match serde_json::from_str::<CommandResponse<serde_json::Value>>(&body) {
            Ok(envelope) => envelope
                .into_result()
                .err()
                .unwrap_or_else(|| CommandError::Rejected(body)),
            Err(_) => CommandError::Rejected(body),
        },
        code => CommandError::ServerError { status: code, body },
    }
}

/// `Retry-After` in whole seconds.
fn retry_after_ms(resp: &Response) -> Option<u64> {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| secs * 1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trimmed() {
        let t = RestTransport::new("https://venue.test/api/", Duration::from_millis(500)).unwrap();
        assert_eq!(t.base_url(), "https://venue.test/api");
        assert!(format!("{:?}", t).contains("has_credentials: false"));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transient() {
        let t = RestTransport::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let cmd = OrderCommand::limit(
            "venue",
            "BTC-USD",
            crate::shared::Side::Bid,
            crate::shared::Decimal::ONE,
            crate::shared::Decimal::ONE,
        );
        let err = t.submit(&cmd).await.unwrap_err();
        assert!(err.is_transient(), "unexpected error: {err:?}");
    }
}
