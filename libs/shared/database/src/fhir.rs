use std::time::Duration;

use anyhow::{Result, anyhow};
use reqwest::{
    Client,
    header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION},
    Method,
};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, error};

use shared_config::AppConfig;

const FHIR_JSON: &str = "application/fhir+json";

/// Non-success responses from the record store. Returned inside
/// `anyhow::Error`; callers that care about the cause use `downcast_ref`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FhirError {
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("FHIR API error ({status}): {message}")]
    Api { status: u16, message: String },
}

impl FhirError {
    pub fn is_not_found(err: &anyhow::Error) -> bool {
        matches!(err.downcast_ref::<FhirError>(), Some(FhirError::NotFound(_)))
    }
}

/// Read client for the clinical record store's FHIR R4 REST API.
pub struct FhirClient {
    client: Client,
    base_url: String,
}

impl FhirClient {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.fhir_request_timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            base_url: config.fhir_base_url.trim_end_matches('/').to_string(),
        })
    }

    fn get_headers(&self, auth_token: Option<&str>) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        headers.insert(ACCEPT, HeaderValue::from_static(FHIR_JSON));

        if let Some(token) = auth_token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|e| anyhow!("Invalid auth token header: {}", e))?,
            );
        }

        Ok(headers)
    }

    /// Issues a request against a path relative to the FHIR base URL.
    pub async fn request<T>(&self, method: Method, path: &str, auth_token: Option<&str>) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        self.request_url(method, &url, auth_token).await
    }

    /// Issues a GET against an absolute URL, as handed out in bundle `link`s.
    /// Only URLs on the configured server are followed.
    pub async fn get_absolute<T>(&self, url: &str, auth_token: Option<&str>) -> Result<T>
    where
        T: DeserializeOwned,
    {
        if !url.starts_with(&self.base_url) {
            return Err(anyhow!("Refusing to follow link outside FHIR base URL: {}", url));
        }

        self.request_url(Method::GET, url, auth_token).await
    }

    async fn request_url<T>(&self, method: Method, url: &str, auth_token: Option<&str>) -> Result<T>
    where
        T: DeserializeOwned,
    {
        debug!("Making request to {}", url);

        let headers = self.get_headers(auth_token)?;

        let response = self.client.request(method, url)
            .headers(headers)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await?;
            error!("FHIR API error ({}): {}", status, error_text);

            let err = match status.as_u16() {
                401 | 403 => FhirError::Auth(error_text),
                404 => FhirError::NotFound(error_text),
                code => FhirError::Api { status: code, message: error_text },
            };
            return Err(err.into());
        }

        let data = response.json::<T>().await?;
        Ok(data)
    }

    pub fn get_base_url(&self) -> &str {
        &self.base_url
    }
}
