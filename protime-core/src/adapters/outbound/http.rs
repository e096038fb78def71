use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use crate::domain::{
    ports::outbound::{Method, RemoteRequest, RemoteResponse, Transport},
    TransportError,
};

/// [`Transport`] over HTTP, relative to the API base URL.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpTransport {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        // A trailing slash makes `Url::join` append instead of replacing the
        // last path segment.
        let base_url = Url::parse(&format!("{}/", base_url.trim_end_matches('/')))
            .map_err(|e| TransportError::InvalidPath(format!("{base_url}: {e}")))?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, TransportError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| TransportError::InvalidPath(format!("{path}: {e}")))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &RemoteRequest) -> Result<RemoteResponse, TransportError> {
        let url = self.endpoint(&request.path)?;

        let mut builder = match request.method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
            Method::Put => self.client.put(url),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;
        let body = serde_json::from_slice(&bytes).ok();

        tracing::debug!(status, "{}", request);
        Ok(RemoteResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(base: &str) -> HttpTransport {
        HttpTransport::new(base, None, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn paths_are_appended_to_the_base_path() {
        let http = transport("http://localhost:3000/api");
        assert_eq!(
            http.endpoint("/projects/p1/tasks").unwrap().as_str(),
            "http://localhost:3000/api/projects/p1/tasks"
        );

        let http = transport("https://protime.example.com/api/");
        assert_eq!(
            http.endpoint("time-entries").unwrap().as_str(),
            "https://protime.example.com/api/time-entries"
        );
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let err = HttpTransport::new("not a url", None, Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, TransportError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn unreachable_host_is_a_request_error() {
        // Port 9 (discard) on localhost is expected to refuse connections.
        let http = HttpTransport::new("http://127.0.0.1:9", None, Duration::from_secs(2)).unwrap();
        let err = http.send(&RemoteRequest::get("/projects")).await.unwrap_err();
        assert!(matches!(err, TransportError::Request(_)));
    }
}
