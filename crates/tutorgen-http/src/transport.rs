use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument};
use tutorgen_protocol::{
    ApiRequest, ApiResponse, ClientError, ClientResult, HttpMethod, HttpTransport,
};

/// `HttpTransport` over a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    base_url: String,
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, reqwest::Client::new())
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> ClientResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ClientError::Transport(err.to_string()))?;
        Ok(Self::with_client(base_url, client))
    }

    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self { base_url, client }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    #[instrument(
        skip(self, request),
        fields(method = request.method.as_str(), path = %request.path)
    )]
    async fn send(&self, request: ApiRequest) -> ClientResult<ApiResponse> {
        let url = self.url_for(&request.path);
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
        };

        let mut builder = self.client.request(method, &url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| ClientError::Transport(format!("{url}: {err}")))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|err| ClientError::Transport(format!("{url}: {err}")))?;
        debug!(status, bytes = body.len(), "transport exchange finished");
        Ok(ApiResponse::new(status, body))
    }
}
