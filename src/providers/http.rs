use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};
use url::Url;

use super::ProviderKind;
use crate::{CodeRagError, Result};

/// Blocking JSON-over-HTTP transport shared by the provider clients.
///
/// Every call is bounded by the agent timeout, and further by a caller
/// deadline when one is given. Failures are terminal; nothing is retried.
#[derive(Debug, Clone)]
pub(crate) struct HttpTransport {
    provider: ProviderKind,
    agent: ureq::Agent,
    timeout: Duration,
}

impl HttpTransport {
    pub(crate) fn new(provider: ProviderKind, timeout: Duration) -> Self {
        Self {
            provider,
            agent: build_agent(timeout),
            timeout,
        }
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }

    pub(crate) fn post_json<Req, Resp>(
        &self,
        url: &Url,
        bearer: Option<&str>,
        body: &Req,
        deadline: Option<Instant>,
    ) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let request_json = serde_json::to_string(body).map_err(|e| {
            CodeRagError::Other(anyhow::anyhow!("Failed to serialize request: {e}"))
        })?;
        let (agent, timeout) = self.agent_for(deadline)?;

        debug!("POST {} ({} bytes)", url, request_json.len());

        let mut request = agent
            .post(url.as_str())
            .header("Content-Type", "application/json");
        if let Some(key) = bearer {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response_text = request
            .send(&request_json)
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .map_err(|e| self.convert_error(url, e, timeout))?;

        self.parse(&response_text)
    }

    pub(crate) fn get_json<Resp>(&self, url: &Url, deadline: Option<Instant>) -> Result<Resp>
    where
        Resp: DeserializeOwned,
    {
        let (agent, timeout) = self.agent_for(deadline)?;

        debug!("GET {}", url);

        let response_text = agent
            .get(url.as_str())
            .call()
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .map_err(|e| self.convert_error(url, e, timeout))?;

        self.parse(&response_text)
    }

    /// The agent to use for one call, and the timeout it enforces.
    fn agent_for(&self, deadline: Option<Instant>) -> Result<(ureq::Agent, Duration)> {
        let Some(deadline) = deadline else {
            return Ok((self.agent.clone(), self.timeout));
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            warn!("Deadline already passed, not calling {}", self.provider);
            return Err(CodeRagError::ProviderTimeout {
                provider: self.provider,
                timeout: Duration::ZERO,
            });
        }

        if remaining < self.timeout {
            Ok((build_agent(remaining), remaining))
        } else {
            Ok((self.agent.clone(), self.timeout))
        }
    }

    fn parse<Resp: DeserializeOwned>(&self, response_text: &str) -> Result<Resp> {
        serde_json::from_str(response_text).map_err(|e| CodeRagError::ProviderBadResponse {
            provider: self.provider,
            message: format!("malformed JSON: {e}"),
        })
    }

    fn convert_error(&self, url: &Url, error: ureq::Error, timeout: Duration) -> CodeRagError {
        let provider = self.provider;
        match error {
            ureq::Error::StatusCode(status) => {
                error!("{} answered HTTP {} for {}", provider, status, url);
                CodeRagError::ProviderBadResponse {
                    provider,
                    message: format!("HTTP {status}"),
                }
            }
            ureq::Error::Timeout(_) => {
                error!("{} timed out after {:?} for {}", provider, timeout, url);
                CodeRagError::ProviderTimeout { provider, timeout }
            }
            ureq::Error::Io(ref io) if io.kind() == std::io::ErrorKind::TimedOut => {
                error!("{} timed out after {:?} for {}", provider, timeout, url);
                CodeRagError::ProviderTimeout { provider, timeout }
            }
            ureq::Error::ConnectionFailed | ureq::Error::HostNotFound | ureq::Error::Io(_) => {
                error!("Could not reach {} at {}: {}", provider, url, error);
                CodeRagError::ProviderUnavailable {
                    provider,
                    message: error.to_string(),
                }
            }
            other => {
                error!("Request to {} at {} failed: {}", provider, url, other);
                CodeRagError::ProviderUnavailable {
                    provider,
                    message: other.to_string(),
                }
            }
        }
    }
}

/// Append `path` to `base`, keeping any path prefix `base` already has
/// (`https://host/v1` + `embeddings` = `https://host/v1/embeddings`).
pub(crate) fn endpoint(base: &Url, path: &str) -> Result<Url> {
    let joined = format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    Url::parse(&joined)
        .map_err(|e| CodeRagError::Config(format!("Invalid endpoint URL {joined}: {e}")))
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}
