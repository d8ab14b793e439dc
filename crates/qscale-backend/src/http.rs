//! JSON-over-HTTP/1.1 capability client.
//!
//! Routes, relative to `base_path`:
//!
//! | Capability | Request | Body / Response |
//! |---|---|---|
//! | backlog | `GET /queues/{id}/depth` | `{"depth": f64}` |
//! | desired count | `PUT /services/{id}/desired-count` | `{"count": u32}` |
//! | demand | `GET /services/{id}/demand` | `{"demand": f64}` |
//! | pool resize | `PUT /pools/{id}/size` | `{"count": u32}` |
//! | pool size | `GET /pools/{id}/size` | `{"count": u32}` |
//!
//! Each call opens its own connection. Deadlines are applied by the
//! caller.

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use qscale_core::{BackendError, BackendResult, BacklogSource, InstancePool, TaskService};

const USER_AGENT: &str = concat!("qscale/", env!("CARGO_PKG_VERSION"));

/// Everything but RFC 3986 unreserved characters is escaped in a segment.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

fn segment(id: &str) -> String {
    utf8_percent_encode(id, SEGMENT).to_string()
}

#[derive(Debug, Deserialize)]
struct DepthBody {
    depth: f64,
}

#[derive(Debug, Deserialize)]
struct DemandBody {
    demand: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct CountBody {
    count: u32,
}

#[derive(Debug, Clone)]
pub struct HttpBackend {
    address: String,
    base_path: String,
}

impl HttpBackend {
    pub fn new(address: &str, base_path: &str) -> Self {
        Self {
            address: address.to_string(),
            base_path: base_path.trim_end_matches('/').to_string(),
        }
    }

    fn uri(&self, path: &str) -> String {
        format!("http://{}{}{}", self.address, self.base_path, path)
    }

    /// Send one request and return the response body of a 2xx reply.
    async fn send(&self, method: Method, path: &str, body: Option<Vec<u8>>) -> BackendResult<Bytes> {
        let uri = self.uri(path);

        let stream = tokio::net::TcpStream::connect(&self.address)
            .await
            .map_err(|e| BackendError::Unavailable(format!("connect {}: {e}", self.address)))?;

        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| BackendError::Unavailable(format!("handshake {}: {e}", self.address)))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let mut builder = Request::builder()
            .method(method.clone())
            .uri(&uri)
            .header("host", &self.address)
            .header("user-agent", USER_AGENT);
        if body.is_some() {
            builder = builder.header("content-type", "application/json");
        }
        let req = builder
            .body(Full::new(Bytes::from(body.unwrap_or_default())))
            .map_err(|e| BackendError::Protocol(format!("build request {uri}: {e}")))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| BackendError::Unavailable(format!("{method} {uri}: {e}")))?;

        let status = resp.status();
        let bytes = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| BackendError::Unavailable(format!("read body {uri}: {e}")))?
            .to_bytes();

        debug!(%method, %uri, %status, "capability call");

        if status.is_success() {
            return Ok(bytes);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(BackendError::NotFound(path.to_string()));
        }
        Err(BackendError::Rejected {
            status: status.as_u16(),
            message: String::from_utf8_lossy(&bytes).trim().to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> BackendResult<T> {
        let bytes = self.send(Method::GET, path, None).await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| BackendError::Protocol(format!("decode {path}: {e}")))
    }

    async fn put_count(&self, path: &str, count: u32) -> BackendResult<()> {
        let body = serde_json::to_vec(&CountBody { count })
            .map_err(|e| BackendError::Protocol(format!("encode {path}: {e}")))?;
        self.send(Method::PUT, path, Some(body)).await?;
        Ok(())
    }
}

#[async_trait]
impl BacklogSource for HttpBackend {
    async fn sample_backlog(&self, queue_id: &str) -> BackendResult<f64> {
        let body: DepthBody = self.get_json(&format!("/queues/{}/depth", segment(queue_id))).await?;
        Ok(body.depth)
    }
}

#[async_trait]
impl TaskService for HttpBackend {
    async fn set_desired_task_count(&self, service_id: &str, count: u32) -> BackendResult<()> {
        self.put_count(&format!("/services/{}/desired-count", segment(service_id)), count)
            .await
    }

    async fn scheduled_task_demand(&self, service_id: &str) -> BackendResult<f64> {
        let body: DemandBody = self
            .get_json(&format!("/services/{}/demand", segment(service_id)))
            .await?;
        Ok(body.demand)
    }
}

#[async_trait]
impl InstancePool for HttpBackend {
    async fn set_instance_pool_size(&self, pool_id: &str, count: u32) -> BackendResult<()> {
        self.put_count(&format!("/pools/{}/size", segment(pool_id)), count).await
    }

    async fn instance_pool_size(&self, pool_id: &str) -> BackendResult<u32> {
        let body: CountBody = self.get_json(&format!("/pools/{}/size", segment(pool_id))).await?;
        Ok(body.count)
    }
}
