//! Channel resolution against the upstream content network.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::ResolveError;

/// A channel claim resolved upstream.
#[derive(Debug, Clone)]
pub struct ResolvedChannel {
    /// Canonical channel URL.
    pub canonical_url: String,
    /// Claim identifier on the upstream network.
    pub claim_id: String,
}

/// Resolves channel URLs to claims. The network call sits behind this trait
/// so the library can be exercised without upstream access.
#[async_trait]
pub trait ChannelResolver: Send + Sync {
    async fn resolve_channel(&self, url: &str) -> Result<ResolvedChannel, ResolveError>;
}

/// Normalizes user-supplied channel handles to `lbry://@name#claim` form.
/// Accepts `@name:claim`, `@name#claim` and either with the scheme prefix.
pub fn canonicalize_channel_url(raw: &str) -> String {
    let stripped = raw.trim().trim_start_matches("lbry://");
    format!("lbry://{}", stripped.replace(':', "#"))
}

/// Resolver backed by the content network HTTP API.
pub struct HttpResolver {
    api_url: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ResolveCall<'a> {
    method: &'static str,
    params: ResolveParams<'a>,
}

#[derive(Serialize)]
struct ResolveParams<'a> {
    urls: Vec<&'a str>,
}

impl HttpResolver {
    pub fn new(api_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self {
            api_url: api_url.to_string(),
            client,
        }
    }
}

#[async_trait]
impl ChannelResolver for HttpResolver {
    async fn resolve_channel(&self, url: &str) -> Result<ResolvedChannel, ResolveError> {
        debug!(url, "resolving channel");
        let call = ResolveCall {
            method: "resolve",
            params: ResolveParams { urls: vec![url] },
        };

        let response: Value = self
            .client
            .post(&self.api_url)
            .json(&call)
            .send()
            .await?
            .json()
            .await?;

        let item = response
            .get("result")
            .and_then(|r| r.get(url))
            .ok_or_else(|| ResolveError::BadResponse("result entry missing".to_string()))?;

        if item.get("error").is_some() {
            return Err(ResolveError::ChannelNotFound);
        }

        let claim_id = item
            .get("claim_id")
            .and_then(Value::as_str)
            .ok_or(ResolveError::ChannelNotFound)?;
        let canonical_url = item
            .get("canonical_url")
            .and_then(Value::as_str)
            .unwrap_or(url);

        Ok(ResolvedChannel {
            canonical_url: canonical_url.to_string(),
            claim_id: claim_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::canonicalize_channel_url;

    #[test]
    fn canonicalizes_channel_handles() {
        assert_eq!(
            canonicalize_channel_url("@somechannel:3"),
            "lbry://@somechannel#3"
        );
        assert_eq!(
            canonicalize_channel_url("lbry://@somechannel#3"),
            "lbry://@somechannel#3"
        );
        assert_eq!(
            canonicalize_channel_url("  @somechannel#3"),
            "lbry://@somechannel#3"
        );
    }
}
