//! Instagram Graph API publisher
//!
//! Speaks the container-based content publishing endpoints:
//!
//! - `POST /{account_id}/media` creates a container
//! - `GET /{container_id}?fields=status_code,status` reports processing state
//! - `POST /{account_id}/media_publish` publishes a finished container
//! - `GET /{media_id}?fields=permalink` returns the public URL
//!
//! Failures are classified from the HTTP status and the Graph error
//! envelope (`code`, `error_subcode`) by [`classify_graph_error`].

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;

use crate::config::InstagramConfig;
use crate::error::{ConfigError, PlatformError, Result};
use crate::platforms::{ContainerRequest, ContainerStatus, PlatformResult, Publisher};

/// Graph error codes for invalid or expired credentials
const AUTH_CODES: &[i64] = &[102, 190, 2203007];
/// Graph error codes for application, user, or account throttling
const RATE_LIMIT_CODES: &[i64] = &[4, 17, 32, 613];
/// Content publishing limit reached
const RATE_LIMIT_SUBCODE: i64 = 2207042;
/// Graph error codes for temporary server-side failures
const SERVER_CODES: &[i64] = &[1, 2];
/// Invalid parameter
const INVALID_PARAMETER_CODE: i64 = 100;

/// Error body returned by the Graph API
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GraphApiError {
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub error_subcode: Option<i64>,
    #[serde(default)]
    pub fbtrace_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphErrorEnvelope {
    error: GraphApiError,
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status_code: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PermalinkResponse {
    permalink: String,
}

/// Graph API publisher
pub struct GraphPublisher {
    client: reqwest::Client,
    /// `<base_url>/<api_version>`
    api_root: String,
    account_id: String,
    access_token: SecretString,
}

impl GraphPublisher {
    /// Build a publisher, reading the access token from `config.token_file`
    pub fn new(config: &InstagramConfig) -> Result<Self> {
        let token = read_token_file(&config.token_file)?;
        Self::with_token(config, token)
    }

    /// Build a publisher with an already loaded access token
    pub fn with_token(config: &InstagramConfig, access_token: SecretString) -> Result<Self> {
        if config.account_id.trim().is_empty() {
            return Err(ConfigError::MissingField("instagram.account_id".to_string()).into());
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout))
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                field: "instagram".to_string(),
                reason: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_root: format!(
                "{}/{}",
                config.base_url.trim_end_matches('/'),
                config.api_version
            ),
            account_id: config.account_id.clone(),
            access_token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_root, path)
    }

    /// Send a request and decode the JSON body, classifying any failure
    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> PlatformResult<T> {
        let response = request
            .bearer_auth(self.access_token.expose_secret())
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let body = response.text().await.map_err(classify_transport_error)?;

        if !status.is_success() {
            let api_error = serde_json::from_str::<GraphErrorEnvelope>(&body)
                .map(|envelope| envelope.error)
                .ok();
            let error = classify_graph_error(status.as_u16(), api_error.as_ref(), retry_after);
            tracing::debug!(
                status = status.as_u16(),
                code = api_error.as_ref().and_then(|e| e.code),
                subcode = api_error.as_ref().and_then(|e| e.error_subcode),
                kind = %error.kind(),
                "Graph API request failed"
            );
            return Err(error);
        }

        serde_json::from_str(&body)
            .map_err(|e| PlatformError::Unknown(format!("Unexpected Graph API response: {}", e)))
    }
}

#[async_trait]
impl Publisher for GraphPublisher {
    fn name(&self) -> &str {
        "instagram"
    }

    async fn create_container(&self, request: &ContainerRequest) -> PlatformResult<String> {
        let params = container_params(request);
        let response: IdResponse = self
            .send(
                self.client
                    .post(self.url(&format!("{}/media", self.account_id)))
                    .form(&params),
            )
            .await?;
        tracing::debug!(container_id = %response.id, "Created media container");
        Ok(response.id)
    }

    async fn poll_status(&self, container_id: &str) -> PlatformResult<ContainerStatus> {
        let response: StatusResponse = self
            .send(
                self.client
                    .get(self.url(container_id))
                    .query(&[("fields", "status_code,status")]),
            )
            .await?;
        Ok(ContainerStatus::from_code(&response.status_code, response.status))
    }

    async fn publish(&self, container_id: &str) -> PlatformResult<String> {
        let response: IdResponse = self
            .send(
                self.client
                    .post(self.url(&format!("{}/media_publish", self.account_id)))
                    .form(&[("creation_id", container_id)]),
            )
            .await?;
        Ok(response.id)
    }

    async fn get_permalink(&self, media_id: &str) -> PlatformResult<String> {
        let response: PermalinkResponse = self
            .send(
                self.client
                    .get(self.url(media_id))
                    .query(&[("fields", "permalink")]),
            )
            .await?;
        Ok(response.permalink)
    }
}

/// Read and trim a token file; `~` is expanded
fn read_token_file(path: &str) -> Result<SecretString> {
    let expanded = shellexpand::tilde(path).to_string();
    let content = std::fs::read_to_string(&expanded).map_err(ConfigError::ReadError)?;
    let token = content.trim();
    if token.is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "instagram.token_file".to_string(),
            reason: format!("{} is empty", expanded),
        }
        .into());
    }
    Ok(SecretString::new(Box::from(token)))
}

/// Form parameters for a container request
fn container_params(request: &ContainerRequest) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = Vec::new();
    let mut push = |key: &str, value: String| params.push((key.to_string(), value));

    let (caption, options) = match request {
        ContainerRequest::Image {
            image_url,
            caption,
            options,
        } => {
            push("image_url", image_url.clone());
            (caption, Some(options))
        }
        ContainerRequest::Reel {
            video_url,
            caption,
            options,
        } => {
            push("media_type", "REELS".to_string());
            push("video_url", video_url.clone());
            (caption, Some(options))
        }
        ContainerRequest::CarouselItem {
            media_url,
            is_video,
        } => {
            push("is_carousel_item", "true".to_string());
            if *is_video {
                push("media_type", "VIDEO".to_string());
                push("video_url", media_url.clone());
            } else {
                push("image_url", media_url.clone());
            }
            (&None, None)
        }
        ContainerRequest::Carousel {
            children,
            caption,
            options,
        } => {
            push("media_type", "CAROUSEL".to_string());
            push("children", children.join(","));
            (caption, Some(options))
        }
    };

    if let Some(caption) = caption {
        push("caption", caption.clone());
    }
    if let Some(options) = options {
        append_options(&mut params, options);
    }
    params
}

/// Pass free-form job options through; reserved protocol keys are skipped
fn append_options(params: &mut Vec<(String, String)>, options: &Map<String, Value>) {
    const RESERVED: &[&str] = &[
        "access_token",
        "caption",
        "children",
        "creation_id",
        "image_url",
        "is_carousel_item",
        "media_type",
        "video_url",
    ];

    for (key, value) in options {
        if RESERVED.contains(&key.as_str()) {
            tracing::warn!(option = %key, "Ignoring reserved publisher option");
            continue;
        }
        let value = match value {
            Value::String(s) => s.clone(),
            Value::Null => continue,
            other => other.to_string(),
        };
        params.push((key.clone(), value));
    }
}

/// Map a failed HTTP exchange to a [`PlatformError`]
///
/// Graph error codes take precedence over the HTTP status. Anything not
/// recognized is `Unknown`, which the worker treats as permanent.
pub fn classify_graph_error(
    status: u16,
    error: Option<&GraphApiError>,
    retry_after: Option<u64>,
) -> PlatformError {
    let code = error.and_then(|e| e.code);
    let subcode = error.and_then(|e| e.error_subcode);
    let message = match error {
        Some(e) => format!(
            "{} (HTTP {}, code {}, subcode {})",
            if e.message.is_empty() { "Graph API error" } else { e.message.as_str() },
            status,
            code.map_or_else(|| "-".to_string(), |c| c.to_string()),
            subcode.map_or_else(|| "-".to_string(), |c| c.to_string()),
        ),
        None => format!("Graph API returned HTTP {}", status),
    };

    let has = |codes: &[i64]| {
        code.is_some_and(|c| codes.contains(&c)) || subcode.is_some_and(|c| codes.contains(&c))
    };
    let in_family = |family: i64| {
        let matches = |c: i64| c / 1000 == family;
        code.is_some_and(matches) || subcode.is_some_and(matches)
    };

    if has(AUTH_CODES) || status == 401 {
        PlatformError::Authentication(message)
    } else if has(RATE_LIMIT_CODES) || subcode == Some(RATE_LIMIT_SUBCODE) || status == 429 {
        PlatformError::RateLimit {
            message,
            retry_after,
        }
    } else if has(SERVER_CODES) || (500..600).contains(&status) {
        PlatformError::Server(message)
    } else if in_family(2207) || in_family(2208) || code == Some(INVALID_PARAMETER_CODE) {
        PlatformError::Validation(message)
    } else if (400..500).contains(&status) {
        PlatformError::Validation(message)
    } else {
        PlatformError::Unknown(message)
    }
}

/// Map a transport-level `reqwest` failure
fn classify_transport_error(error: reqwest::Error) -> PlatformError {
    if error.is_timeout() {
        PlatformError::Timeout(error.to_string())
    } else if error.is_connect() || error.is_request() || error.is_body() {
        PlatformError::Network(error.to_string())
    } else if error.is_decode() {
        PlatformError::Unknown(format!("Failed to read Graph API response: {}", error))
    } else {
        PlatformError::Network(error.to_string())
    }
}
