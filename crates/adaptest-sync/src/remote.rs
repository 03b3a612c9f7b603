//! Remote snapshot storage over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::instrument;
use uuid::Uuid;

use adaptest_core::snapshot::SessionSnapshot;

use crate::error::SyncError;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Server-side copy of attempt snapshots.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Human-readable store name for logs.
    fn name(&self) -> &str;

    /// Upload a snapshot. Fails with [`SyncError::Conflict`] when the server
    /// already holds a newer one.
    async fn push(&self, snapshot: &SessionSnapshot) -> Result<(), SyncError>;

    /// Download the server's snapshot of an attempt, if it has one.
    async fn fetch(&self, attempt_id: Uuid) -> Result<Option<SessionSnapshot>, SyncError>;
}

/// JSON-over-HTTP remote store.
///
/// `PUT {base}/attempts/{id}` uploads, `GET {base}/attempts/{id}` downloads.
/// A 409 response carries the server's snapshot in its body.
pub struct HttpRemoteStore {
    base_url: String,
    api_token: Option<String>,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpRemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRemoteStore")
            .field("base_url", &self.base_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "***"))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl HttpRemoteStore {
    pub fn new(
        base_url: &str,
        api_token: Option<String>,
        timeout_secs: Option<u64>,
    ) -> Result<Self, SyncError> {
        let timeout_secs = timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| SyncError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: api_token.filter(|t| !t.is_empty()),
            timeout_secs,
            client,
        })
    }

    fn url(&self, attempt_id: Uuid) -> String {
        format!("{}/attempts/{attempt_id}", self.base_url)
    }

    fn request(&self, method: reqwest::Method, attempt_id: Uuid) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, self.url(attempt_id));
        match &self.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn transport_error(&self, e: reqwest::Error) -> SyncError {
        if e.is_timeout() {
            SyncError::Timeout(self.timeout_secs)
        } else {
            SyncError::Network(e.to_string())
        }
    }
}

/// Map an unsuccessful status to a [`SyncError`].
async fn status_error(response: reqwest::Response) -> SyncError {
    let status = response.status().as_u16();
    if status == 429 {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(5)
            * 1000;
        return SyncError::RateLimited {
            retry_after_ms: retry_after,
        };
    }

    let body = response.text().await.unwrap_or_default();
    if status == 401 {
        return SyncError::Unauthorized(body);
    }
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|e| e.error)
        .unwrap_or(body);
    SyncError::Api { status, message }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    fn name(&self) -> &str {
        "http"
    }

    #[instrument(skip(self, snapshot), fields(attempt = %snapshot.attempt_id, revision = snapshot.revision))]
    async fn push(&self, snapshot: &SessionSnapshot) -> Result<(), SyncError> {
        let response = self
            .request(reqwest::Method::PUT, snapshot.attempt_id)
            .json(snapshot)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status.as_u16() == 409 {
            let body = response.text().await.unwrap_or_default();
            return match serde_json::from_str::<SessionSnapshot>(&body) {
                Ok(remote) => Err(SyncError::Conflict {
                    remote: Box::new(remote),
                }),
                Err(e) => Err(SyncError::Api {
                    status: 409,
                    message: format!("conflict without a readable snapshot: {e}"),
                }),
            };
        }
        Err(status_error(response).await)
    }

    #[instrument(skip(self))]
    async fn fetch(&self, attempt_id: Uuid) -> Result<Option<SessionSnapshot>, SyncError> {
        let response = self
            .request(reqwest::Method::GET, attempt_id)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(status_error(response).await);
        }

        response
            .json::<SessionSnapshot>()
            .await
            .map(Some)
            .map_err(|e| SyncError::Api {
                status: 0,
                message: format!("failed to parse snapshot: {e}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::snapshot;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn push_sends_bearer_token_and_json() {
        let server = MockServer::start().await;
        let id = Uuid::new_v4();

        Mock::given(method("PUT"))
            .and(path(format!("/attempts/{id}")))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let store = HttpRemoteStore::new(&server.uri(), Some("secret".into()), None).unwrap();
        store.push(&snapshot(id, 3)).await.unwrap();
    }

    #[tokio::test]
    async fn push_conflict_returns_remote_snapshot() {
        let server = MockServer::start().await;
        let id = Uuid::new_v4();

        Mock::given(method("PUT"))
            .and(path(format!("/attempts/{id}")))
            .respond_with(ResponseTemplate::new(409).set_body_json(snapshot(id, 9)))
            .mount(&server)
            .await;

        let store = HttpRemoteStore::new(&format!("{}/", server.uri()), None, None).unwrap();
        match store.push(&snapshot(id, 3)).await.unwrap_err() {
            SyncError::Conflict { remote } => assert_eq!(remote.revision, 9),
            other => panic!("expected conflict, got {other}"),
        }
    }

    #[tokio::test]
    async fn fetch_missing_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let store = HttpRemoteStore::new(&server.uri(), None, None).unwrap();
        assert!(store.fetch(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fetch_returns_snapshot() {
        let server = MockServer::start().await;
        let id = Uuid::new_v4();
        Mock::given(method("GET"))
            .and(path(format!("/attempts/{id}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(snapshot(id, 4)))
            .mount(&server)
            .await;

        let store = HttpRemoteStore::new(&server.uri(), None, None).unwrap();
        let fetched = store.fetch(id).await.unwrap().unwrap();
        assert_eq!(fetched.revision, 4);
        assert_eq!(fetched.attempt_id, id);
    }

    #[tokio::test]
    async fn rate_limiting() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;

        let store = HttpRemoteStore::new(&server.uri(), None, None).unwrap();
        let err = store.push(&snapshot(Uuid::new_v4(), 1)).await.unwrap_err();
        assert_eq!(err.retry_after_ms(), Some(7000));
    }

    #[tokio::test]
    async fn error_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(500)
                    .set_body_json(serde_json::json!({ "error": "database unavailable" })),
            )
            .mount(&server)
            .await;

        let store = HttpRemoteStore::new(&server.uri(), None, None).unwrap();
        let err = store.push(&snapshot(Uuid::new_v4(), 1)).await.unwrap_err();
        assert!(matches!(err, SyncError::Unauthorized(ref body) if body == "bad token"));

        let err = store.fetch(Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("database unavailable"));
    }

    #[tokio::test]
    async fn unreachable_server_is_network_error() {
        let store = HttpRemoteStore::new("http://127.0.0.1:9", None, Some(2)).unwrap();
        let err = store.push(&snapshot(Uuid::new_v4(), 1)).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn debug_masks_token() {
        let store = HttpRemoteStore::new("http://localhost", Some("secret".into()), None).unwrap();
        let debug = format!("{store:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("***"));
    }
}
