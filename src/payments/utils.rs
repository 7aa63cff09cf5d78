use crate::payments::error::{GatewayError, GatewayResult};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::warn;

/// Basic-auth credentials for the gateway API.
#[derive(Clone, Copy)]
pub struct BasicAuth<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
    timeout: Duration,
    max_retries: u32,
}

impl PaymentHttpClient {
    pub fn new(timeout: Duration, max_retries: u32) -> GatewayResult<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            GatewayError::GatewayUnavailable {
                message: format!("failed to initialize HTTP client: {}", e),
            }
        })?;

        Ok(Self {
            client,
            timeout,
            max_retries,
        })
    }

    /// Sends a JSON request. Only idempotent methods are retried; a POST that
    /// creates a gateway resource is attempted exactly once.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        auth: Option<BasicAuth<'_>>,
        body: Option<&JsonValue>,
    ) -> GatewayResult<T> {
        let retries = if method == reqwest::Method::GET {
            self.max_retries
        } else {
            0
        };

        let mut last_error = None;
        for attempt in 0..=retries {
            let mut request = self.client.request(method.clone(), url);
            request = request.timeout(self.timeout);

            if let Some(auth) = auth {
                request = request.basic_auth(auth.username, Some(auth.password));
            }
            if let Some(payload) = body {
                request = request.json(payload);
            }

            let response = request.send().await.map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout {
                        timeout_secs: self.timeout.as_secs(),
                    }
                } else {
                    GatewayError::GatewayUnavailable {
                        message: format!("gateway request failed: {}", e),
                    }
                }
            });

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    if status.is_success() {
                        return serde_json::from_str::<T>(&text).map_err(|e| {
                            GatewayError::InvalidResponse {
                                message: format!("invalid gateway JSON response: {}", e),
                            }
                        });
                    }

                    let retryable =
                        status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS;
                    if retryable && attempt < retries {
                        warn!(
                            status = %status,
                            attempt = attempt + 1,
                            "gateway returned retryable status, retrying"
                        );
                        tokio::time::sleep(Duration::from_millis(200 << attempt)).await;
                        continue;
                    }

                    return Err(classify_status(status, &text));
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < retries {
                        tokio::time::sleep(Duration::from_millis(200 << attempt)).await;
                        continue;
                    }
                }
            }
        }

        Err(last_error.unwrap_or(GatewayError::GatewayUnavailable {
            message: "gateway request failed".to_string(),
        }))
    }
}

fn classify_status(status: StatusCode, body: &str) -> GatewayError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return GatewayError::GatewayUnavailable {
            message: format!("HTTP {}", status),
        };
    }

    let parsed: Option<JsonValue> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error"));
    let gateway_code = error
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .or_else(|| Some(status.as_u16().to_string()));
    let description = error
        .and_then(|e| e.get("description"))
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .unwrap_or_else(|| format!("HTTP {}", status));

    GatewayError::GatewayRejected {
        message: description,
        gateway_code,
    }
}

/// Lowercase hex HMAC-SHA256 of `payload` keyed by `secret`.
pub fn hmac_sha256_hex(payload: &[u8], secret: &str) -> Option<String> {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(payload);
    Some(hex::encode(mac.finalize().into_bytes()))
}

pub fn verify_hmac_sha256_hex(payload: &[u8], secret: &str, signature: &str) -> bool {
    match hmac_sha256_hex(payload, secret) {
        Some(computed) => secure_eq(computed.as_bytes(), signature.trim().as_bytes()),
        None => false,
    }
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_eq_behaves_correctly() {
        assert!(secure_eq(b"abc", b"abc"));
        assert!(!secure_eq(b"abc", b"abd"));
        assert!(!secure_eq(b"abc", b"ab"));
    }

    #[test]
    fn hmac_matches_known_vector() {
        // RFC 4231 test case 2
        let digest = hmac_sha256_hex(b"what do ya want for nothing?", "Jefe").unwrap();
        assert_eq!(
            digest,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn webhook_hmac_verification_detects_invalid_signature() {
        let payload = br#"{"event":"payment.captured"}"#;
        let valid = hmac_sha256_hex(payload, "secret").unwrap();
        assert!(verify_hmac_sha256_hex(payload, "secret", &valid));
        assert!(!verify_hmac_sha256_hex(payload, "secret", "not-a-valid-signature"));
        assert!(!verify_hmac_sha256_hex(payload, "other", &valid));
    }

    #[test]
    fn rejected_status_extracts_gateway_description() {
        let body = r#"{"error":{"code":"BAD_REQUEST_ERROR","description":"Order amount less than minimum amount allowed"}}"#;
        match classify_status(StatusCode::BAD_REQUEST, body) {
            GatewayError::GatewayRejected {
                message,
                gateway_code,
            } => {
                assert!(message.contains("minimum amount"));
                assert_eq!(gateway_code.as_deref(), Some("BAD_REQUEST_ERROR"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn server_errors_classify_as_unavailable() {
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, ""),
            GatewayError::GatewayUnavailable { .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, ""),
            GatewayError::GatewayUnavailable { .. }
        ));
    }
}
