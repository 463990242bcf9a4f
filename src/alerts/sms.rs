//! HTTP SMS gateway.

use std::time::Duration;

use super::{NotifyError, SmsGateway};

/// SMS provider reached over HTTPS with an API key.
#[derive(Debug, Clone)]
pub struct HttpSmsGateway {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    timeout: Duration,
}

impl HttpSmsGateway {
    pub fn new(endpoint: &str, api_key: &str, timeout: Duration) -> Result<Self, NotifyError> {
        if api_key.is_empty() {
            return Err(NotifyError::Config("empty API key".to_string()));
        }

        let endpoint = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!("https://{}", endpoint)
        };

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Network(e.to_string()))?;

        Ok(Self {
            client,
            endpoint,
            api_key: api_key.to_string(),
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl SmsGateway for HttpSmsGateway {
    async fn send(&self, destination: &str, message: &str) -> Result<String, NotifyError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("recipients", destination),
                ("message", message),
                ("apikey", self.api_key.as_str()),
                ("sendsms", "1"),
                ("sendwa", "0"),
            ])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NotifyError::Timeout(self.timeout)
                } else {
                    NotifyError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| NotifyError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(NotifyError::Rejected(format!("{}: {}", status, body)));
        }

        Ok(body)
    }
}
