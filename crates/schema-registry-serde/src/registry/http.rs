use super::{RegistrySchema, RegistryTransport, SchemaVersion, SubjectSchema};
use crate::config::{BasicAuth, RegistryConfig};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

/// Media type of every registry request and response body.
pub const REGISTRY_CONTENT_TYPE: &str = "application/vnd.schemaregistry.v1+json";

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: u32,
}

#[derive(Debug, Deserialize)]
struct CompatibilityResponse {
    is_compatible: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorResponse {
    error_code: Option<u32>,
    message: Option<String>,
}

/// Registry transport over HTTP(S) with optional basic auth
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
    auth: Option<BasicAuth>,
}

impl HttpTransport {
    pub fn new(config: &RegistryConfig) -> Result<Self> {
        let base_url = Url::parse(config.url.trim_end_matches('/'))
            .map_err(|e| Error::Config(format!("Invalid schema registry url {}: {e}", config.url)))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Config(format!(
                "Schema registry url cannot be a base: {}",
                config.url
            )));
        }

        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            auth: config.basic_auth.clone(),
        })
    }

    /// Append percent-encoded path segments to the base url.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                Error::Config(format!(
                    "Schema registry url cannot be a base: {}",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        body: Option<&RegistrySchema>,
        what: &str,
    ) -> Result<T> {
        debug!("Schema registry request {method} {}", url.path());

        let mut request = self
            .client
            .request(method, url.clone())
            .header(ACCEPT, HeaderValue::from_static(REGISTRY_CONTENT_TYPE));

        if let Some(auth) = &self.auth {
            request = request.basic_auth(&auth.username, Some(&auth.password));
        }

        if let Some(body) = body {
            let body = serde_json::to_vec(body)
                .map_err(|e| Error::Encode(format!("Failed to serialize request body: {e}")))?;
            request = request
                .header(CONTENT_TYPE, HeaderValue::from_static(REGISTRY_CONTENT_TYPE))
                .body(body);
        }

        let network = |e: reqwest::Error| Error::Network {
            url: url.to_string(),
            message: e.to_string(),
        };

        let response = request.send().await.map_err(network)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(network)?;

        if !status.is_success() {
            return Err(status_error(status, &bytes, what));
        }

        serde_json::from_slice(&bytes).map_err(|e| Error::Registry {
            status: status.as_u16(),
            error_code: None,
            message: format!("Unexpected response body for {what}: {e}"),
        })
    }
}

/// Map an unsuccessful registry response to the error taxonomy.
fn status_error(status: StatusCode, body: &[u8], what: &str) -> Error {
    let parsed: ErrorResponse = serde_json::from_slice(body).unwrap_or_default();
    let message = parsed
        .message
        .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Auth {
            status: status.as_u16(),
            message,
        },
        StatusCode::NOT_FOUND => Error::SchemaNotFound {
            what: if message.is_empty() {
                what.to_string()
            } else {
                format!("{what}: {message}")
            },
            error_code: parsed.error_code,
        },
        _ => Error::Registry {
            status: status.as_u16(),
            error_code: parsed.error_code,
            message,
        },
    }
}

#[async_trait]
impl RegistryTransport for HttpTransport {
    async fn schema_by_id(&self, id: u32) -> Result<RegistrySchema> {
        let url = self.url(&["schemas", "ids", &id.to_string()])?;
        self.execute(Method::GET, url, None, &format!("schema id {id}"))
            .await
    }

    async fn subject_version(&self, subject: &str, version: SchemaVersion) -> Result<SubjectSchema> {
        let url = self.url(&["subjects", subject, "versions", &version.to_string()])?;
        self.execute(
            Method::GET,
            url,
            None,
            &format!("subject {subject} version {version}"),
        )
        .await
    }

    async fn register(&self, subject: &str, schema: &RegistrySchema, normalize: bool) -> Result<u32> {
        let mut url = self.url(&["subjects", subject, "versions"])?;
        if normalize {
            url.query_pairs_mut().append_pair("normalize", "true");
        }
        let response: IdResponse = self
            .execute(Method::POST, url, Some(schema), &format!("subject {subject}"))
            .await?;
        Ok(response.id)
    }

    async fn lookup_schema(
        &self,
        subject: &str,
        schema: &RegistrySchema,
        normalize: bool,
    ) -> Result<SubjectSchema> {
        let mut url = self.url(&["subjects", subject])?;
        if normalize {
            url.query_pairs_mut().append_pair("normalize", "true");
        }
        self.execute(
            Method::POST,
            url,
            Some(schema),
            &format!("schema under subject {subject}"),
        )
        .await
    }

    async fn check_compatibility(&self, subject: &str, schema: &RegistrySchema) -> Result<bool> {
        let url = self.url(&["compatibility", "subjects", subject, "versions", "latest"])?;
        let response: CompatibilityResponse = self
            .execute(Method::POST, url, Some(schema), &format!("subject {subject}"))
            .await?;
        Ok(response.is_compatible)
    }
}
