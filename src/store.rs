//! The store client contract: what the load/refresh engine needs from the
//! upstream configuration service, and a `reqwest`-backed default impl.

use crate::error::{Error, Result, TransportError, TransportErrorKind};
use crate::setting::{Page, ResponseStatus, Setting, SnapshotCompositionType};

/// The injected transport contract for talking to the configuration store.
///
/// A test double typically implements this directly; the default
/// implementation (`HttpStoreClient`) speaks to a real endpoint over
/// `reqwest`.
#[async_trait::async_trait]
pub trait StoreClient: Send + Sync {
    /// List settings matching a filter, one page at a time. `page_etag` is
    /// the previously-observed ETag for this page, if any, sent as
    /// `If-None-Match`.
    async fn list(
        &self,
        key_filter: &str,
        label_filter: Option<&str>,
        tag_filters: &[String],
        page_etag: Option<&str>,
    ) -> Result<(ResponseStatus, Page)>;

    /// Fetch a single setting, conditionally on a known ETag.
    async fn get(
        &self,
        key: &str,
        label: Option<&str>,
        known_etag: Option<&str>,
    ) -> Result<(ResponseStatus, Option<Setting>)>;

    /// Fetch a named snapshot's metadata.
    async fn get_snapshot(&self, name: &str) -> Result<(SnapshotCompositionType, Option<String>)>;

    /// List every setting belonging to a named snapshot.
    async fn list_for_snapshot(&self, name: &str) -> Result<Vec<Setting>>;

    /// The origin this client talks to, used to build feature-flag
    /// telemetry references (`<origin>/kv/<key>`).
    fn origin(&self) -> &str;

    /// Discover replica endpoints for this client's origin (e.g. via DNS),
    /// each paired with a client constructed against it. Transport-level;
    /// the default implementation reports no replicas, since discovery is
    /// meaningful only for transports that have a notion of one (HTTP SRV
    /// records, a cluster directory, etc).
    async fn discover_replicas(&self) -> Vec<(String, std::sync::Arc<dyn StoreClient>)> {
        Vec::new()
    }
}

/// The default `StoreClient` implementation, backed by `reqwest`.
pub struct HttpStoreClient {
    base_url: url::Url,
    http: reqwest::Client,
}

impl HttpStoreClient {
    pub fn new(base_url: url::Url, http: reqwest::Client) -> Self {
        Self { base_url, http }
    }

    fn classify_transport_error(err: &reqwest::Error) -> TransportError {
        if err.is_timeout() {
            return TransportError::new(TransportErrorKind::TimedOut, clone_display(err));
        }
        if err.is_connect() {
            return TransportError::new(TransportErrorKind::ConnectionRefused, clone_display(err));
        }
        if let Some(status) = err.status() {
            return TransportError::new(
                TransportErrorKind::from_status(status.as_u16()),
                clone_display(err),
            );
        }
        TransportError::new(TransportErrorKind::Other, clone_display(err))
    }
}

fn clone_display(err: &reqwest::Error) -> std::io::Error {
    std::io::Error::other(err.to_string())
}

#[async_trait::async_trait]
impl StoreClient for HttpStoreClient {
    async fn list(
        &self,
        key_filter: &str,
        label_filter: Option<&str>,
        tag_filters: &[String],
        page_etag: Option<&str>,
    ) -> Result<(ResponseStatus, Page)> {
        let mut url = self.base_url.join("kv").map_err(|e| {
            Error::Transport(TransportError::new(
                TransportErrorKind::Other,
                std::io::Error::other(e.to_string()),
            ))
        })?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("key", key_filter);
            if let Some(label) = label_filter {
                query.append_pair("label", label);
            }
            for tag in tag_filters {
                query.append_pair("tags", tag);
            }
        }

        let mut request = self.http.get(url);
        if let Some(etag) = page_etag {
            request = request.header(reqwest::header::IF_NONE_MATCH, etag);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Transport(Self::classify_transport_error(&e)))?;

        if response.status() == reqwest::StatusCode::NOT_MODIFIED {
            return Ok((
                ResponseStatus::NotModified,
                Page {
                    etag: page_etag.map(str::to_string),
                    settings: Vec::new(),
                },
            ));
        }
        if !response.status().is_success() {
            return Err(Error::Transport(TransportError::new(
                TransportErrorKind::from_status(response.status().as_u16()),
                std::io::Error::other(format!("unexpected status {}", response.status())),
            )));
        }

        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let settings: Vec<Setting> = response
            .json()
            .await
            .map_err(|e| Error::Transport(Self::classify_transport_error(&e)))?;

        Ok((ResponseStatus::Changed, Page { etag, settings }))
    }

    async fn get(
        &self,
        key: &str,
        label: Option<&str>,
        known_etag: Option<&str>,
    ) -> Result<(ResponseStatus, Option<Setting>)> {
        let mut url = self.base_url.join(&format!("kv/{key}")).map_err(|e| {
            Error::Transport(TransportError::new(
                TransportErrorKind::Other,
                std::io::Error::other(e.to_string()),
            ))
        })?;
        if let Some(label) = label {
            url.query_pairs_mut().append_pair("label", label);
        }

        let mut request = self.http.get(url);
        if let Some(etag) = known_etag {
            request = request.header(reqwest::header::IF_NONE_MATCH, etag);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Transport(Self::classify_transport_error(&e)))?;

        match response.status() {
            reqwest::StatusCode::NOT_MODIFIED => Ok((ResponseStatus::NotModified, None)),
            reqwest::StatusCode::NOT_FOUND => Ok((ResponseStatus::NotFound, None)),
            status if status.is_success() => {
                let setting = response
                    .json()
                    .await
                    .map_err(|e| Error::Transport(Self::classify_transport_error(&e)))?;
                Ok((ResponseStatus::Changed, Some(setting)))
            }
            status => Err(Error::Transport(TransportError::new(
                TransportErrorKind::from_status(status.as_u16()),
                std::io::Error::other(format!("unexpected status {status}")),
            ))),
        }
    }

    async fn get_snapshot(&self, name: &str) -> Result<(SnapshotCompositionType, Option<String>)> {
        #[derive(serde::Deserialize)]
        struct SnapshotResponse {
            composition_type: String,
        }

        let url = self.base_url.join(&format!("snapshots/{name}")).map_err(|e| {
            Error::Transport(TransportError::new(
                TransportErrorKind::Other,
                std::io::Error::other(e.to_string()),
            ))
        })?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Transport(Self::classify_transport_error(&e)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::InvalidOperation(format!("snapshot '{name}' not found")));
        }
        let body: SnapshotResponse = response
            .json()
            .await
            .map_err(|e| Error::Transport(Self::classify_transport_error(&e)))?;

        let composition = match body.composition_type.as_str() {
            "key" => SnapshotCompositionType::Key,
            "key_label" | "keyLabel" => SnapshotCompositionType::KeyLabel,
            other => {
                return Err(Error::InvalidOperation(format!(
                    "unknown snapshot composition type '{other}'"
                )))
            }
        };
        Ok((composition, None))
    }

    async fn list_for_snapshot(&self, name: &str) -> Result<Vec<Setting>> {
        let url = self
            .base_url
            .join(&format!("kv?snapshot={name}"))
            .map_err(|e| {
                Error::Transport(TransportError::new(
                    TransportErrorKind::Other,
                    std::io::Error::other(e.to_string()),
                ))
            })?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Transport(Self::classify_transport_error(&e)))?;
        response
            .json()
            .await
            .map_err(|e| Error::Transport(Self::classify_transport_error(&e)))
    }

    fn origin(&self) -> &str {
        self.base_url.as_str()
    }
}
