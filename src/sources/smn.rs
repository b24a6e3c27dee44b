//! SMN radar image source.
//!
//! The SMN website embeds a short-lived JWT in its radar page. That token
//! authorizes the inventory web service, which lists the images currently
//! published for a station. Images themselves are served from a static
//! repository.

use async_trait::async_trait;
use futures_util::StreamExt;
use regex::Regex;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{HarvesterConfig, SourceSection};
use crate::harvest::{
    ArtifactFetcher, ArtifactStream, CredentialProvider, DataSource, HarvestError,
    InventorySource, LifecycleHooks,
};

const TOKEN_PATTERN: &str = r"localStorage\.setItem\('token',\s*'([^']+)'\);";

const ACCEPT_LANGUAGE: &str =
    "en-GB;q=0.9,en-US;q=0.8,en;q=0.7,es-ES;q=0.8,es-PY;q=0.7,es;q=0.6";

const TEXT_HTML: &str = "text/html";
const APPLICATION_JSON: &str = "application/json";
const IMAGE_PNG: &str = "image/png";

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct InventoryPage {
    list: Vec<String>,
}

#[derive(Debug, Serialize)]
struct Credentials {
    token: Option<String>,
}

// ============================================================================
// Source
// ============================================================================

/// HTTP client for the SMN radar endpoints.
pub struct SmnSource {
    client: Client,
    endpoints: SourceSection,
    wait_for_next_request: Duration,
    wait_for_next_authorization: Duration,
    token_pattern: Regex,
}

impl SmnSource {
    pub fn new(config: &HarvesterConfig) -> Result<Self, HarvestError> {
        let user_agent = config.client.user_agent.clone().unwrap_or_else(|| {
            format!(
                "{}/{} ({})",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION"),
                std::env::consts::OS
            )
        });

        let client = Client::builder()
            .default_headers(default_headers(&config.source.base_url, &user_agent)?)
            .timeout(config.request_timeout())
            .build()?;

        let token_pattern = Regex::new(TOKEN_PATTERN)
            .map_err(|e| HarvestError::Config(format!("token pattern: {e}")))?;

        Ok(Self {
            client,
            endpoints: config.source.clone(),
            wait_for_next_request: Duration::from_millis(config.timing.wait_for_next_request_ms),
            wait_for_next_authorization: Duration::from_millis(
                config.timing.wait_for_next_authorization_ms,
            ),
            token_pattern,
        })
    }

    /// Pulls the access token out of the radar page HTML.
    pub fn extract_token(&self, html: &str) -> Option<String> {
        self.token_pattern
            .captures(html)
            .and_then(|captures| captures.get(1))
            .map(|token| token.as_str().to_string())
    }

    /// Reads the cached token, if any.
    ///
    /// A missing or empty credentials document, or an empty token, means
    /// no cached token. A non-empty document without a string `token`
    /// entry is a configuration error.
    async fn load_cached_token(&self) -> Result<Option<String>, HarvestError> {
        let path = &self.endpoints.credentials_path;
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if content.trim().is_empty() {
            return Ok(None);
        }

        let document: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&content)
            .map_err(|e| HarvestError::Config(format!("{}: {e}", path.display())))?;
        if document.is_empty() {
            return Ok(None);
        }

        match document.get("token") {
            Some(serde_json::Value::String(token)) if token.is_empty() => Ok(None),
            Some(serde_json::Value::String(token)) => Ok(Some(token.clone())),
            _ => Err(HarvestError::Config(format!(
                "{} has no 'token' entry",
                path.display()
            ))),
        }
    }

    async fn save_token(path: &Path, token: &str) -> Result<(), HarvestError> {
        let credentials = Credentials {
            token: Some(token.to_string()),
        };
        tokio::fs::write(path, serde_json::to_string_pretty(&credentials)?).await?;
        Ok(())
    }

    async fn request_token(&self) -> Result<String, HarvestError> {
        let response = self
            .client
            .get(&self.endpoints.radar_url)
            .header(header::ACCEPT, TEXT_HTML)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::Request {
                status: status.as_u16(),
                message: format!("GET {}", self.endpoints.radar_url),
            });
        }

        let html = response.text().await?;
        self.extract_token(&html).ok_or_else(|| {
            HarvestError::UnexpectedResponse("access token not found in radar page".to_string())
        })
    }

    async fn list_station(&self, station: &str, token: &str) -> Result<Vec<String>, HarvestError> {
        tokio::time::sleep(self.wait_for_next_request).await;

        let url = format!("{}{}", self.endpoints.inventory_url, station);
        let response = self
            .client
            .get(&url)
            .header(header::ACCEPT, APPLICATION_JSON)
            .header(header::AUTHORIZATION, format!("JWT {token}"))
            .send()
            .await?;

        if let Some(e) = classify_status(response.status(), station, false) {
            return Err(e);
        }

        let body = response.text().await?;
        parse_inventory(&body, station)
    }
}

fn default_headers(referer: &str, user_agent: &str) -> Result<HeaderMap, HarvestError> {
    let value = |v: &str| {
        HeaderValue::from_str(v).map_err(|e| HarvestError::Config(format!("header '{v}': {e}")))
    };

    let mut headers = HeaderMap::new();
    headers.insert(header::REFERER, value(referer)?);
    headers.insert(header::USER_AGENT, value(user_agent)?);
    headers.insert(header::ACCEPT_LANGUAGE, value(ACCEPT_LANGUAGE)?);
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    Ok(headers)
}

/// Maps a non-success status to the error the scan loop acts on.
///
/// `401` always signals an expired token. For artifact downloads `404`
/// means the image is not (or no longer) published.
fn classify_status(status: StatusCode, id: &str, artifact: bool) -> Option<HarvestError> {
    if status.is_success() {
        return None;
    }

    Some(match status {
        StatusCode::UNAUTHORIZED => {
            HarvestError::AuthorizationExpired(format!("'{id}' answered {status}"))
        }
        StatusCode::NOT_FOUND if artifact => HarvestError::ArtifactUnavailable {
            id: id.to_string(),
            reason: status.to_string(),
        },
        _ => HarvestError::Request {
            status: status.as_u16(),
            message: format!("request for '{id}' rejected"),
        },
    })
}

fn parse_inventory(body: &str, station: &str) -> Result<Vec<String>, HarvestError> {
    serde_json::from_str::<InventoryPage>(body)
        .map(|page| page.list)
        .map_err(|e| {
            HarvestError::UnexpectedResponse(format!("inventory of '{station}': {e}"))
        })
}

// ============================================================================
// Capability Implementations
// ============================================================================

#[async_trait]
impl CredentialProvider for SmnSource {
    async fn get_api_key(&self) -> Result<String, HarvestError> {
        Ok(self.endpoints.api_key.clone().unwrap_or_default())
    }

    async fn get_access_token(&self, _api_key: &str, renew: bool) -> Result<String, HarvestError> {
        tokio::time::sleep(self.wait_for_next_authorization).await;

        if !renew {
            if let Some(token) = self.load_cached_token().await? {
                debug!("Using cached access token");
                return Ok(token);
            }
        }

        let token = self
            .request_token()
            .await
            .map_err(|e| HarvestError::Authorization(e.to_string()))?;
        info!(renew, "Access token obtained");

        if let Err(e) = Self::save_token(&self.endpoints.credentials_path, &token).await {
            warn!(error = %e, "Could not cache access token");
        }

        Ok(token)
    }
}

#[async_trait]
impl InventorySource for SmnSource {
    async fn list(
        &self,
        ids: &BTreeSet<String>,
        _api_key: &str,
        token: &str,
    ) -> Result<BTreeSet<String>, HarvestError> {
        let mut available = BTreeSet::new();

        for station in ids {
            let images = self.list_station(station, token).await?;
            debug!(station = %station, images = images.len(), "Station inventory");
            available.extend(images);
        }

        Ok(available)
    }
}

#[async_trait]
impl ArtifactFetcher for SmnSource {
    async fn fetch(
        &self,
        id: &str,
        _api_key: &str,
        _token: &str,
    ) -> Result<ArtifactStream, HarvestError> {
        tokio::time::sleep(self.wait_for_next_request).await;

        let unavailable = |reason: String| HarvestError::ArtifactUnavailable {
            id: id.to_string(),
            reason,
        };

        let url = format!("{}{}", self.endpoints.repository_url, id);
        let response = self
            .client
            .get(&url)
            .header(header::ACCEPT, IMAGE_PNG)
            .send()
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        if let Some(e) = classify_status(response.status(), id, true) {
            return Err(e);
        }

        let id = id.to_string();
        let stream = response.bytes_stream().map(move |chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|e| HarvestError::ArtifactUnavailable {
                    id: id.clone(),
                    reason: e.to_string(),
                })
        });

        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl LifecycleHooks for SmnSource {
    async fn prepare(&self) -> Result<(), HarvestError> {
        info!(inventory = %self.endpoints.inventory_url, "SMN harvest session started");
        Ok(())
    }

    async fn prepare_next_cycle(&self) -> Result<(), HarvestError> {
        debug!("SMN scan cycle finished");
        Ok(())
    }

    async fn finalize(&self) -> Result<(), HarvestError> {
        info!("SMN harvest session ended");
        Ok(())
    }
}

impl DataSource for SmnSource {
    fn name(&self) -> &str {
        "smn"
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn source_in(dir: &TempDir) -> SmnSource {
        let mut config = HarvesterConfig::default();
        config.source.credentials_path = dir.path().join("credentials.json");
        config.timing.wait_for_next_request_ms = 0;
        config.timing.wait_for_next_authorization_ms = 0;
        SmnSource::new(&config).unwrap()
    }

    #[test]
    fn test_extract_token() {
        let dir = TempDir::new().unwrap();
        let source = source_in(&dir);

        let html = "<script>localStorage.setItem('token', 'eyJ0eXAi.abc.def');</script>";
        assert_eq!(source.extract_token(html), Some("eyJ0eXAi.abc.def".to_string()));

        assert_eq!(source.extract_token("<html>no token here</html>"), None);
        assert_eq!(
            source.extract_token("localStorage.setItem('token','');"),
            None
        );
    }

    #[test]
    fn test_classify_status() {
        assert!(classify_status(StatusCode::OK, "a.png", true).is_none());

        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, "RMA1", false),
            Some(HarvestError::AuthorizationExpired(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, "a.png", true),
            Some(HarvestError::ArtifactUnavailable { .. })
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, "RMA1", false),
            Some(HarvestError::Request { status: 404, .. })
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, "a.png", true),
            Some(HarvestError::Request { status: 502, .. })
        ));
    }

    #[test]
    fn test_parse_inventory() {
        let body = r#"{"list": ["RMA1_240_COLMAX_20240101T000000Z.png", "RMA1_240_COLMAX_20240101T001000Z.png"]}"#;
        assert_eq!(parse_inventory(body, "RMA1").unwrap().len(), 2);

        assert!(parse_inventory(r#"{"list": []}"#, "RMA1").unwrap().is_empty());

        assert!(matches!(
            parse_inventory(r#"{"images": []}"#, "RMA1"),
            Err(HarvestError::UnexpectedResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_cached_token_is_reused_without_renewal() {
        let dir = TempDir::new().unwrap();
        let source = source_in(&dir);
        SmnSource::save_token(&dir.path().join("credentials.json"), "cached")
            .await
            .unwrap();

        let token = source.get_access_token("", false).await.unwrap();

        assert_eq!(token, "cached");
    }

    #[tokio::test]
    async fn test_credentials_without_token_is_config_error() {
        let dir = TempDir::new().unwrap();
        let source = source_in(&dir);
        std::fs::write(dir.path().join("credentials.json"), r#"{"other": 1}"#).unwrap();

        let result = source.get_access_token("", false).await;

        assert!(matches!(result, Err(HarvestError::Config(_))));
    }

    #[tokio::test]
    async fn test_empty_credentials_mean_no_cached_token() {
        let dir = TempDir::new().unwrap();
        let source = source_in(&dir);
        let path = dir.path().join("credentials.json");

        for document in ["", "{}", r#"{"token": ""}"#] {
            std::fs::write(&path, document).unwrap();
            assert_eq!(
                source.load_cached_token().await.unwrap(),
                None,
                "document {document:?} should hold no token"
            );
        }
    }

    #[tokio::test]
    async fn test_missing_credentials_file_means_no_cached_token() {
        let dir = TempDir::new().unwrap();
        let source = source_in(&dir);

        assert_eq!(source.load_cached_token().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_api_key_defaults_to_empty() {
        let dir = TempDir::new().unwrap();
        let source = source_in(&dir);

        assert_eq!(source.get_api_key().await.unwrap(), "");
        assert_eq!(source.name(), "smn");
    }
}
