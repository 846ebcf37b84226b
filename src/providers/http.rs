//! Shared outbound HTTP client for provider adapters: per-request timeout,
//! bounded retries with exponential backoff on 429/5xx/network errors.

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::warn;

use crate::providers::error::{ProviderError, ProviderResult};

#[derive(Debug, Clone)]
pub enum RequestAuth<'a> {
    None,
    Bearer(&'a str),
    Basic { user: &'a str, password: &'a str },
}

#[derive(Clone)]
pub struct ProviderHttpClient {
    client: Client,
    timeout: Duration,
    max_retries: u32,
}

impl ProviderHttpClient {
    pub fn new(timeout: Duration, max_retries: u32) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Network {
                message: format!("failed to initialize HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            timeout,
            max_retries,
        })
    }

    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        auth: RequestAuth<'_>,
        body: Option<&JsonValue>,
    ) -> ProviderResult<T> {
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            let mut request = self.client.request(method.clone(), url);
            request = request.timeout(self.timeout);

            match &auth {
                RequestAuth::None => {}
                RequestAuth::Bearer(token) => request = request.bearer_auth(token),
                RequestAuth::Basic { user, password } => {
                    request = request.basic_auth(user, Some(password))
                }
            }
            if let Some(payload) = body {
                request = request.json(payload);
            }

            let response = request.send().await.map_err(|e| ProviderError::Network {
                message: format!("provider request failed: {}", e),
            });

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    if status.is_success() {
                        return serde_json::from_str::<T>(&text).map_err(|e| {
                            ProviderError::Rejected {
                                code: None,
                                message: format!("invalid provider JSON response: {}", e),
                            }
                        });
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        if attempt < self.max_retries {
                            warn!(
                                status = %status,
                                attempt = attempt + 1,
                                "provider returned {}, retrying", status
                            );
                            tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                            continue;
                        }
                        return Err(ProviderError::Network {
                            message: format!("HTTP {} after retries: {}", status, text),
                        });
                    }

                    if status.as_u16() == 401 || status.as_u16() == 403 {
                        return Err(ProviderError::Auth {
                            message: format!("HTTP {}: {}", status, text),
                        });
                    }

                    return Err(ProviderError::Rejected {
                        code: Some(status.as_u16().to_string()),
                        message: format!("HTTP {}: {}", status, text),
                    });
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                        continue;
                    }
                }
            }
        }

        Err(last_error.unwrap_or(ProviderError::Network {
            message: "provider request failed".to_string(),
        }))
    }
}
