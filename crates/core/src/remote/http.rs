use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::{Deserialize, Serialize};

use crate::{
    error::{BeaconError, Result},
    events::{Envelope, RemoteRecord},
    remote::{RemoteStore, SessionSpan},
    types::{ActorId, SessionId},
};

/// JSON-over-HTTP remote log store.
///
/// | operation | request |
/// |---|---|
/// | append | `POST {base}/logs/{actor}/{session}` |
/// | list sessions | `GET {base}/logs/{actor}` |
/// | session span | `GET {base}/logs/{actor}/{session}/span` |
/// | delete session | `DELETE {base}/logs/{actor}/{session}` |
/// | query actor | `GET {base}/logs/{actor}/records?start=..&end=..` |
/// | scan all | `GET {base}/logs?start=..&end=..` |
/// | privileges | `GET {base}/actors/{actor}/privileges` |
///
/// Ids travel as single percent-encoded path segments. Empty, `.` and `..`
/// ids are rejected so a request never leaves its actor partition.
pub struct HttpRemoteStore {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendResponse {
    record_id: String,
}

#[derive(Deserialize)]
struct SessionsResponse {
    sessions: Vec<SessionId>,
}

#[derive(Deserialize)]
struct SpanResponse {
    span: Option<SessionSpan>,
}

#[derive(Deserialize)]
struct DeleteResponse {
    deleted: usize,
}

#[derive(Deserialize)]
struct RecordsResponse {
    records: Vec<RemoteRecord>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrivilegesResponse {
    all_logs_read: bool,
}

#[derive(Serialize)]
struct RangeQuery {
    start: i64,
    end: i64,
}

impl HttpRemoteStore {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| BeaconError::InvalidRemoteUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(BeaconError::InvalidRemoteUrl {
                url: base_url.to_string(),
                reason: "not a hierarchical URL".into(),
            });
        }
        Ok(Self {
            client: Client::new(),
            base_url,
            token,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        if let Some(bad) = segments
            .iter()
            .find(|s| s.is_empty() || **s == "." || **s == "..")
        {
            return Err(BeaconError::InvalidPathSegment(bad.to_string()));
        }
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| BeaconError::InvalidRemoteUrl {
                url: self.base_url.to_string(),
                reason: "not a hierarchical URL".into(),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, operation: &'static str, request: RequestBuilder) -> Result<Response> {
        let response = self.authorized(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(BeaconError::RemoteRejected {
            operation,
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn append(&self, actor: &ActorId, envelope: &Envelope) -> Result<String> {
        let url = self.url(&["logs", actor.as_str(), envelope.session_id.as_str()])?;
        let response = self
            .send("append", self.client.post(url).json(envelope))
            .await?;
        Ok(response.json::<AppendResponse>().await?.record_id)
    }

    async fn list_sessions(&self, actor: &ActorId) -> Result<Vec<SessionId>> {
        let url = self.url(&["logs", actor.as_str()])?;
        let response = self.send("list_sessions", self.client.get(url)).await?;
        Ok(response.json::<SessionsResponse>().await?.sessions)
    }

    async fn session_span(
        &self,
        actor: &ActorId,
        session: &SessionId,
    ) -> Result<Option<SessionSpan>> {
        let url = self.url(&["logs", actor.as_str(), session.as_str(), "span"])?;
        let response = self.send("session_span", self.client.get(url)).await?;
        Ok(response.json::<SpanResponse>().await?.span)
    }

    async fn delete_session(&self, actor: &ActorId, session: &SessionId) -> Result<usize> {
        let url = self.url(&["logs", actor.as_str(), session.as_str()])?;
        let response = self.send("delete_session", self.client.delete(url)).await?;
        Ok(response.json::<DeleteResponse>().await?.deleted)
    }

    async fn query_actor(
        &self,
        actor: &ActorId,
        start: i64,
        end: i64,
    ) -> Result<Vec<RemoteRecord>> {
        let url = self.url(&["logs", actor.as_str(), "records"])?;
        let request = self.client.get(url).query(&RangeQuery { start, end });
        let response = self.send("query_actor", request).await?;
        Ok(response.json::<RecordsResponse>().await?.records)
    }

    async fn scan_all(&self, start: i64, end: i64) -> Result<Vec<RemoteRecord>> {
        let url = self.url(&["logs"])?;
        let request = self.client.get(url).query(&RangeQuery { start, end });
        let response = self.send("scan_all", request).await?;
        Ok(response.json::<RecordsResponse>().await?.records)
    }

    async fn has_all_logs_read(&self, actor: &ActorId) -> Result<bool> {
        let url = self.url(&["actors", actor.as_str(), "privileges"])?;
        let response = self.send("has_all_logs_read", self.client.get(url)).await?;
        Ok(response.json::<PrivilegesResponse>().await?.all_logs_read)
    }
}
