use crate::error::SourceError;
use crate::sources::LogSource;
use crate::BoxFuture;
use log::debug;
use reqwest::Client;
use std::time::Duration;

/// Log source that pulls pending lines from an HTTP endpoint
///
/// The endpoint answers a GET with either a JSON array of strings or plain
/// text with one log line per line.
pub struct HttpLogSource {
    client: Client,
    url: String,
}

impl HttpLogSource {
    /// Create a new HTTP log source
    ///
    /// # Arguments
    /// * `url` - Endpoint returning pending log lines
    /// * `timeout` - Upper bound for one fetch so a hung backend cannot stall a run
    pub fn new(url: String, timeout: Duration) -> Result<Self, SourceError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Decode a response body into log lines
    fn parse_body(body: &str) -> Result<Vec<String>, SourceError> {
        let trimmed = body.trim_start();
        if trimmed.starts_with('[') {
            let lines: Vec<String> = serde_json::from_str(trimmed)
                .map_err(|e| SourceError::ParseError(format!("expected JSON array of strings: {}", e)))?;
            return Ok(lines
                .into_iter()
                .filter(|line| !line.trim().is_empty())
                .collect());
        }

        Ok(body
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}

impl LogSource for HttpLogSource {
    fn fetch_logs(&self) -> BoxFuture<'_, Result<Vec<String>, SourceError>> {
        Box::pin(async move {
            let response = self.client.get(&self.url).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(SourceError::Unavailable(format!(
                    "{} answered with status {}",
                    self.url, status
                )));
            }

            let body = response.text().await?;
            let lines = Self::parse_body(&body)?;
            debug!("Fetched {} log lines from {}", lines.len(), self.url);
            Ok(lines)
        })
    }
}
