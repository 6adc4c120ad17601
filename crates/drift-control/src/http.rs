//! JSON-over-HTTP client for the cluster gateway.
//!
//! Every gateway reply is wrapped in a `{ "success": bool, "error"?: string }`
//! envelope with the payload fields alongside. A non-2xx status or
//! `success: false` is a failure; the gateway's message is carried into
//! the returned [`ControlError`].

use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HOST, USER_AGENT};
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::net::TcpStream;
use tracing::debug;

use drift_core::config::ControlConfig;
use drift_core::{GuestId, GuestKind, GuestLocation, MigrationRequest, Progress, TaskHandle};

use crate::error::{ControlError, ControlResult};
use crate::port::{
    ClusterLocations, ControlFuture, ControlPlane, StopOutcome, SubmittedMigration, TaskState,
    TaskStatus,
};

/// Gateway path of a task. Node names and task ids are opaque strings,
/// so each segment is percent-encoded.
fn task_path(node: &str, task: &TaskHandle) -> String {
    format!(
        "/api/tasks/{}/{}",
        urlencoding::encode(node),
        urlencoding::encode(task.as_str())
    )
}

/// Control plane reached through the local cluster gateway.
#[derive(Debug, Clone)]
pub struct HttpControlPlane {
    endpoint: String,
    timeout: Duration,
}

impl HttpControlPlane {
    pub fn new(endpoint: &str, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            timeout,
        }
    }

    pub fn from_config(config: &ControlConfig) -> Self {
        Self::new(&config.endpoint, config.request_timeout)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// GET `path` and decode the enveloped reply.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ControlResult<T> {
        self.exchange(Method::GET, path, None)
            .await
            .map_err(ControlError::Query)
    }

    /// POST `body` to `path` and decode the enveloped reply.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> ControlResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let payload = serde_json::to_vec(body)
            .map_err(|e| ControlError::Query(format!("encode request: {e}")))?;
        self.exchange(Method::POST, path, Some(payload))
            .await
            .map_err(ControlError::Query)
    }

    /// POST `body` to `path` and accept any 2xx reply, whatever its body.
    pub async fn post_event<B>(&self, path: &str, body: &B) -> ControlResult<()>
    where
        B: Serialize + ?Sized,
    {
        let payload = serde_json::to_vec(body)
            .map_err(|e| ControlError::Query(format!("encode request: {e}")))?;
        let (status, _) = self
            .send(Method::POST, path, Some(payload))
            .await
            .map_err(ControlError::Query)?;
        if !status.is_success() {
            return Err(ControlError::Query(format!(
                "{path} returned HTTP {}",
                status.as_u16()
            )));
        }
        Ok(())
    }

    async fn exchange<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<T, String> {
        let (status, bytes) = self.send(method, path, body).await?;
        decode_envelope(status, &bytes)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<(StatusCode, Bytes), String> {
        let endpoint = self.endpoint.as_str();
        let call = async {
            let stream = TcpStream::connect(endpoint)
                .await
                .map_err(|e| format!("connect to gateway {endpoint}: {e}"))?;

            let io = TokioIo::new(stream);
            let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
                .await
                .map_err(|e| format!("gateway handshake: {e}"))?;

            tokio::spawn(async move {
                if let Err(e) = conn.await {
                    debug!(error = %e, "gateway connection closed with error");
                }
            });

            let mut builder = Request::builder()
                .method(method.clone())
                .uri(path)
                .header(HOST, endpoint)
                .header(USER_AGENT, "drift-control/0.1");
            let payload = match body {
                Some(bytes) => {
                    builder = builder.header(CONTENT_TYPE, "application/json");
                    Full::new(Bytes::from(bytes))
                }
                None => Full::new(Bytes::new()),
            };
            let req = builder
                .body(payload)
                .map_err(|e| format!("build request: {e}"))?;

            let resp = sender
                .send_request(req)
                .await
                .map_err(|e| format!("gateway request: {e}"))?;
            let status = resp.status();
            let bytes = resp
                .into_body()
                .collect()
                .await
                .map_err(|e| format!("read gateway reply: {e}"))?
                .to_bytes();

            debug!(%method, path, %status, "gateway call");
            Ok((status, bytes))
        };

        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(format!(
                "gateway call {path} timed out after {:?}",
                self.timeout
            )),
        }
    }
}

fn decode_envelope<T: DeserializeOwned>(status: StatusCode, body: &[u8]) -> Result<T, String> {
    let value: Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(_) if !status.is_success() => {
            return Err(format!("gateway returned HTTP {}", status.as_u16()));
        }
        Err(e) => return Err(format!("invalid JSON from gateway: {e}")),
    };

    let flagged_ok = value.get("success").and_then(Value::as_bool).unwrap_or(true);
    if !status.is_success() || !flagged_ok {
        let message = value
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("no error message");
        return Err(format!(
            "gateway returned HTTP {}: {message}",
            status.as_u16()
        ));
    }

    serde_json::from_value(value).map_err(|e| format!("unexpected gateway reply: {e}"))
}

// ── Wire shapes ───────────────────────────────────────────────────

#[derive(Serialize)]
struct MigrateBody<'a> {
    vmid: GuestId,
    #[serde(rename = "type")]
    kind: &'static str,
    source_node: &'a str,
    target_node: &'a str,
}

#[derive(serde::Deserialize)]
struct MigrateReply {
    task_id: String,
    #[serde(default)]
    source_node: Option<String>,
    #[serde(default)]
    target_node: Option<String>,
}

#[derive(serde::Deserialize)]
struct StopReply {
    success: bool,
}

#[derive(serde::Deserialize)]
struct MigratingReply {
    is_migrating: bool,
}

#[derive(serde::Deserialize)]
struct TaskReply {
    status: String,
    #[serde(default)]
    exitstatus: Option<String>,
    #[serde(default)]
    progress: Option<Progress>,
}

#[derive(serde::Deserialize)]
struct LocationReply {
    node: String,
    status: String,
}

#[derive(serde::Deserialize)]
struct LocatedGuest {
    node: String,
    status: String,
    #[serde(default)]
    tags: WireTags,
}

/// Guest tags arrive as `"a;b"`, as a list, or as `{all_tags: [...]}`.
#[derive(Default, serde::Deserialize)]
#[serde(untagged)]
enum WireTags {
    #[default]
    None,
    Text(String),
    List(Vec<String>),
    Detailed {
        #[serde(default)]
        all_tags: Vec<String>,
    },
}

impl WireTags {
    fn into_vec(self) -> Vec<String> {
        match self {
            WireTags::None => Vec::new(),
            WireTags::Text(text) => text.split(';').map(str::to_string).collect(),
            WireTags::List(list) | WireTags::Detailed { all_tags: list } => list,
        }
    }
}

#[derive(serde::Deserialize)]
struct LocationsReply {
    guests: BTreeMap<GuestId, LocatedGuest>,
    #[serde(default)]
    nodes: BTreeMap<String, NodeGuests>,
}

#[derive(serde::Deserialize)]
struct NodeGuests {
    #[serde(default)]
    guests: Vec<GuestId>,
}

fn wire_kind(kind: GuestKind) -> &'static str {
    match kind {
        GuestKind::Vm => "VM",
        GuestKind::Container => "CT",
    }
}

impl ControlPlane for HttpControlPlane {
    fn submit_migration<'a>(
        &'a self,
        request: &'a MigrationRequest,
    ) -> ControlFuture<'a, SubmittedMigration> {
        Box::pin(async move {
            let body = MigrateBody {
                vmid: request.guest.id,
                kind: wire_kind(request.guest.kind),
                source_node: &request.source_node,
                target_node: &request.target_node,
            };
            let payload = serde_json::to_vec(&body)
                .map_err(|e| ControlError::Submission(format!("encode request: {e}")))?;
            let reply: MigrateReply = self
                .exchange(Method::POST, "/api/migrate", Some(payload))
                .await
                .map_err(ControlError::Submission)?;
            Ok(SubmittedMigration {
                task: TaskHandle::new(reply.task_id),
                source_node: reply
                    .source_node
                    .unwrap_or_else(|| request.source_node.clone()),
                target_node: reply
                    .target_node
                    .unwrap_or_else(|| request.target_node.clone()),
            })
        })
    }

    fn stop_task<'a>(
        &'a self,
        node: &'a str,
        task: &'a TaskHandle,
    ) -> ControlFuture<'a, StopOutcome> {
        Box::pin(async move {
            let path = format!("{}/stop", task_path(node, task));
            let reply: StopReply = self
                .exchange(Method::POST, &path, Some(b"{}".to_vec()))
                .await
                .map_err(ControlError::Stop)?;
            Ok(StopOutcome {
                success: reply.success,
            })
        })
    }

    fn query_migrating_state(&self, guest: GuestId) -> ControlFuture<'_, bool> {
        Box::pin(async move {
            let reply: MigratingReply = self
                .get_json(&format!("/api/guests/{guest}/migrating"))
                .await?;
            Ok(reply.is_migrating)
        })
    }

    fn query_task_status<'a>(
        &'a self,
        node: &'a str,
        task: &'a TaskHandle,
    ) -> ControlFuture<'a, TaskStatus> {
        Box::pin(async move {
            let reply: TaskReply = self.get_json(&task_path(node, task)).await?;
            // Anything other than "stopped" means the task is still alive.
            let state = if reply.status.eq_ignore_ascii_case("stopped") {
                TaskState::Stopped
            } else {
                TaskState::Running
            };
            Ok(TaskStatus {
                state,
                exit_status: reply.exitstatus,
                progress: reply.progress,
            })
        })
    }

    fn query_guest_location(&self, guest: GuestId) -> ControlFuture<'_, GuestLocation> {
        Box::pin(async move {
            let reply: LocationReply = self
                .get_json(&format!("/api/guests/{guest}/location"))
                .await?;
            Ok(GuestLocation {
                node: reply.node,
                status: reply.status,
            })
        })
    }

    fn query_all_guest_locations(&self) -> ControlFuture<'_, ClusterLocations> {
        Box::pin(async move {
            let reply: LocationsReply = self.get_json("/api/guests/locations").await?;
            let mut locations = ClusterLocations {
                nodes: reply
                    .nodes
                    .into_iter()
                    .map(|(node, entry)| (node, entry.guests))
                    .collect(),
                ..ClusterLocations::default()
            };
            for (id, guest) in reply.guests {
                locations.set_tags(id, guest.tags.into_vec());
                locations.guests.insert(
                    id,
                    GuestLocation {
                        node: guest.node,
                        status: guest.status,
                    },
                );
            }
            // Older gateways only send the guest map.
            for (id, loc) in &locations.guests {
                let hosted = locations.nodes.entry(loc.node.clone()).or_default();
                if !hosted.contains(id) {
                    hosted.push(*id);
                }
            }
            Ok(locations)
        })
    }
}
