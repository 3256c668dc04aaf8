use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::payload::{record_key, records_from_payload};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("base url cannot carry path segments: {0}")]
    BaseUrl(String),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("unexpected response shape: {0}")]
    UnexpectedShape(String),
    #[error("created record carries no key")]
    MissingKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

/// A `(project, version)` pair; every collection call is scoped by one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub project_id: String,
    pub version_id: String,
}

impl Scope {
    pub fn new(project_id: impl Into<String>, version_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            version_id: version_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatedRecord {
    pub key: String,
    pub record: Value,
}

#[derive(Clone)]
pub struct CollectionsClient {
    http: Client,
    base_url: Url,
    token: Option<String>,
}

impl CollectionsClient {
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            token: None,
        })
    }

    pub fn with_token(base_url: &str, token: impl Into<String>) -> Result<Self, ApiError> {
        let mut client = Self::new(base_url)?;
        client.token = Some(token.into());
        Ok(client)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn list_records(
        &self,
        collection: &str,
        scope: &Scope,
    ) -> Result<Vec<Value>, ApiError> {
        self.query_records(collection, scope, None).await
    }

    pub async fn list_records_by_file_id(
        &self,
        collection: &str,
        scope: &Scope,
        file_id: &str,
    ) -> Result<Vec<Value>, ApiError> {
        self.query_records(collection, scope, Some(file_id)).await
    }

    pub async fn create_record(
        &self,
        collection: &str,
        body: &Value,
    ) -> Result<CreatedRecord, ApiError> {
        let url = self.records_endpoint(collection, None)?;
        let response = self.request(Method::POST, url).json(body).send().await?;
        let record: Value = Self::handle_response(response).await?;
        let key = record_key(&record).ok_or(ApiError::MissingKey)?;
        Ok(CreatedRecord { key, record })
    }

    pub async fn update_record(
        &self,
        collection: &str,
        key: &str,
        body: &Value,
    ) -> Result<(), ApiError> {
        let url = self.records_endpoint(collection, Some(key))?;
        let response = self.request(Method::PUT, url).json(body).send().await?;
        Self::expect_success(response).await
    }

    pub async fn delete_record(&self, collection: &str, key: &str) -> Result<(), ApiError> {
        let url = self.records_endpoint(collection, Some(key))?;
        let response = self.request(Method::DELETE, url).send().await?;
        Self::expect_success(response).await
    }

    pub async fn delete_records_by_file_id(
        &self,
        collection: &str,
        scope: &Scope,
        file_id: &str,
    ) -> Result<(), ApiError> {
        let mut url = self.records_endpoint(collection, None)?;
        url.query_pairs_mut()
            .append_pair("projectId", &scope.project_id)
            .append_pair("versionId", &scope.version_id)
            .append_pair("fileId", file_id);
        let response = self.request(Method::DELETE, url).send().await?;
        Self::expect_success(response).await
    }

    async fn query_records(
        &self,
        collection: &str,
        scope: &Scope,
        file_id: Option<&str>,
    ) -> Result<Vec<Value>, ApiError> {
        let mut url = self.records_endpoint(collection, None)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("projectId", &scope.project_id);
            query.append_pair("versionId", &scope.version_id);
            if let Some(file_id) = file_id {
                query.append_pair("fileId", file_id);
            }
        }
        let response = self.request(Method::GET, url).send().await?;
        let payload: Value = Self::handle_response(response).await?;
        records_from_payload(payload)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.token {
            Some(token) => builder.header("Authorization", format!("Bearer {token}")),
            None => builder,
        }
    }

    fn records_endpoint(&self, collection: &str, key: Option<&str>) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| ApiError::BaseUrl(self.base_url.to_string()))?;
            segments
                .pop_if_empty()
                .extend(["v1", "collections", collection, "records"]);
            if let Some(key) = key {
                segments.push(key);
            }
        }
        Ok(url)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::Api { status, body })
        }
    }

    async fn expect_success(response: reqwest::Response) -> Result<(), ApiError> {
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::Api { status, body })
        }
    }
}

impl ApiError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            ApiError::Api { status, .. } => Some(classify_api_status(*status)),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.classification(),
            Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
        )
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::CONFLICT | StatusCode::TOO_EARLY
        )
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}
