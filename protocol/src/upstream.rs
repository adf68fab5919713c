//! # Upstream Processor Client
//!
//! HTTP client for the mobile-money processor the gateway proxies to. The
//! processor is an opaque remote service: plain JSON in, plain JSON out,
//! no envelopes (the sealed channel exists between customer and gateway,
//! not gateway and processor).
//!
//! Five operations, all POST under `{base}/api/clients/`: `get-token`,
//! `payment-request`, `payment-confirmation`, `resend-otp`, `get-url`.
//!
//! ## Failure shape
//!
//! A 2xx answer comes back as [`UpstreamReply`] with the status and the
//! raw JSON body (the gateway seals and relays it verbatim). A non-2xx
//! answer becomes [`UpstreamError::Status`] carrying the upstream status
//! and a message pulled from the body's `message` or `errorDesc` field.
//! Transport failures (DNS, refused, timeout) become
//! [`UpstreamError::Transport`]. Nothing is retried here; a failed call
//! surfaces immediately to the caller.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::config::{UPSTREAM_CONNECT_TIMEOUT, UPSTREAM_TIMEOUT};

/// Errors from the upstream processor.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The processor answered with a non-2xx status.
    #[error("upstream returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The processor could not be reached (or timed out).
    #[error("upstream unreachable: {0}")]
    Transport(String),
}

/// A successful upstream answer: the status to mirror and the body to
/// seal and relay.
#[derive(Debug, Clone)]
pub struct UpstreamReply {
    pub status: u16,
    pub body: Value,
}

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetTokenCall<'a> {
    pub program_name: &'a str,
    pub company_name: &'a str,
    pub merchant_msisdn: &'a str,
    pub code: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequestCall<'a> {
    pub code: &'a str,
    pub customer_msisdn: &'a str,
    pub merchant_msisdn: &'a str,
    pub transaction_id: &'a str,
    pub amount: &'a str,
    pub token: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentConfirmationCall<'a> {
    pub code: &'a str,
    pub transaction_id: &'a str,
    pub merchant_msisdn: &'a str,
    pub otp: &'a str,
    pub token: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResendOtpCall<'a> {
    pub code: &'a str,
    pub transaction_id: &'a str,
    pub merchant_msisdn: &'a str,
    pub token: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetUrlCall<'a> {
    pub company_name: &'a str,
    pub program_name: &'a str,
    pub code: &'a str,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Client for the upstream payment processor.
///
/// Cheap to clone (reqwest pools connections internally). The overall
/// request timeout is multi-minute on purpose: a payment request can sit
/// waiting for the customer, and the call must suspend without holding
/// any lock.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
}

impl UpstreamClient {
    /// Build a client for the processor at `base_url` (no trailing slash
    /// needed).
    pub fn new(base_url: &str) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .timeout(UPSTREAM_TIMEOUT)
            .connect_timeout(UPSTREAM_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn get_token(&self, call: &GetTokenCall<'_>) -> Result<UpstreamReply, UpstreamError> {
        self.post("get-token", call).await
    }

    pub async fn payment_request(
        &self,
        call: &PaymentRequestCall<'_>,
    ) -> Result<UpstreamReply, UpstreamError> {
        self.post("payment-request", call).await
    }

    pub async fn payment_confirmation(
        &self,
        call: &PaymentConfirmationCall<'_>,
    ) -> Result<UpstreamReply, UpstreamError> {
        self.post("payment-confirmation", call).await
    }

    pub async fn resend_otp(&self, call: &ResendOtpCall<'_>) -> Result<UpstreamReply, UpstreamError> {
        self.post("resend-otp", call).await
    }

    pub async fn get_url(&self, call: &GetUrlCall<'_>) -> Result<UpstreamReply, UpstreamError> {
        self.post("get-url", call).await
    }

    async fn post<T: Serialize>(&self, op: &str, payload: &T) -> Result<UpstreamReply, UpstreamError> {
        let url = format!("{}/api/clients/{}", self.base_url, op);
        tracing::debug!(%url, "calling upstream processor");

        let response = self
            .http
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let body: Value = response.json().await.unwrap_or(Value::Null);

        if (200..300).contains(&status) {
            Ok(UpstreamReply { status, body })
        } else {
            let message = extract_message(&body);
            tracing::warn!(status, %message, op, "upstream rejected request");
            Err(UpstreamError::Status { status, message })
        }
    }
}

/// Pull a human-readable message out of an upstream error body.
/// Providers are inconsistent: some use `message`, some `errorDesc`.
fn extract_message(body: &Value) -> String {
    body.get("message")
        .or_else(|| body.get("errorDesc"))
        .and_then(Value::as_str)
        .unwrap_or("Internal Server Error")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_extract_message_variants() {
        assert_eq!(
            extract_message(&serde_json::json!({"message": "bad code"})),
            "bad code"
        );
        assert_eq!(
            extract_message(&serde_json::json!({"errorDesc": "expired"})),
            "expired"
        );
        assert_eq!(extract_message(&Value::Null), "Internal Server Error");
        assert_eq!(
            extract_message(&serde_json::json!({"message": 42})),
            "Internal Server Error"
        );
    }

    #[tokio::test]
    async fn test_get_token_success_passes_body_through() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/clients/get-token"))
            .and(body_partial_json(serde_json::json!({
                "companyName": "Acme",
                "merchantMsisdn": "0999000000",
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"token": "tok-1"})),
            )
            .mount(&server)
            .await;

        let client = UpstreamClient::new(&server.uri()).unwrap();
        let reply = client
            .get_token(&GetTokenCall {
                program_name: "P1",
                company_name: "Acme",
                merchant_msisdn: "0999000000",
                code: "123",
            })
            .await
            .unwrap();

        assert_eq!(reply.status, 200);
        assert_eq!(reply.body["token"], "tok-1");
    }

    #[tokio::test]
    async fn test_non_2xx_becomes_status_error_with_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/clients/payment-confirmation"))
            .respond_with(
                ResponseTemplate::new(500)
                    .set_body_json(serde_json::json!({"errorDesc": "processor down"})),
            )
            .mount(&server)
            .await;

        let client = UpstreamClient::new(&server.uri()).unwrap();
        let err = client
            .payment_confirmation(&PaymentConfirmationCall {
                code: "123",
                transaction_id: "t-1",
                merchant_msisdn: "0999000000",
                otp: "123456",
                token: "tok",
            })
            .await
            .unwrap_err();

        match err {
            UpstreamError::Status { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "processor down");
            }
            other => panic!("expected Status, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        // Nothing listens on this port.
        let client = UpstreamClient::new("http://127.0.0.1:1").unwrap();
        let err = client
            .resend_otp(&ResendOtpCall {
                code: "123",
                transaction_id: "t-1",
                merchant_msisdn: "0999000000",
                token: "tok",
            })
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Transport(_)));
    }

    #[tokio::test]
    async fn test_non_json_error_body_still_yields_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/clients/resend-otp"))
            .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
            .mount(&server)
            .await;

        let client = UpstreamClient::new(&server.uri()).unwrap();
        let err = client
            .resend_otp(&ResendOtpCall {
                code: "123",
                transaction_id: "t-1",
                merchant_msisdn: "0999000000",
                token: "tok",
            })
            .await
            .unwrap_err();
        match err {
            UpstreamError::Status { status, message } => {
                assert_eq!(status, 502);
                assert_eq!(message, "Internal Server Error");
            }
            other => panic!("expected Status, got {:?}", other),
        }
    }
}
