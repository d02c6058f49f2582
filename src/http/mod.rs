//! HTTP status server
//!
//! Health, readiness and Prometheus endpoints plus the command API used by
//! the backend to reach devices.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::{BodyExt, Full, Limited};
use hyper::body::{Body, Bytes};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::command::{CommandCategory, OutboundCommand, PublishError};
use crate::supervisor::{BridgeState, BridgeSupervisor};


/// Largest accepted command body
const MAX_BODY: usize = 64 * 1024;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Body of `POST /api/commands`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommandRequest {
    category: CommandCategory,
    #[serde(default)]
    target_id: String,
    command: String,
    #[serde(default)]
    parameters: Map<String, Value>,
    source: Option<String>,
}

impl CommandRequest {
    fn into_command(self) -> OutboundCommand {
        let cmd = OutboundCommand::new(self.category, self.target_id, self.command)
            .with_parameters(self.parameters);
        match self.source {
            Some(source) => cmd.with_source(source),
            None => cmd,
        }
    }
}

/// HTTP server for status and commands
pub struct StatusServer {
    supervisor: Arc<BridgeSupervisor>,
    addr: SocketAddr,
}

impl StatusServer {
    pub fn new(supervisor: Arc<BridgeSupervisor>, addr: SocketAddr) -> Self {
        Self { supervisor, addr }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<(), BoxError> {
        let listener = TcpListener::bind(self.addr).await?;
        info!("Status server listening on http://{}", self.addr);

        loop {
            let (stream, _) = tokio::select! {
                _ = shutdown.recv() => break,
                accepted = listener.accept() => accepted?,
            };
            let io = TokioIo::new(stream);
            let supervisor = self.supervisor.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let supervisor = supervisor.clone();
                    async move { handle_request(req, supervisor).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving status connection: {:?}", err);
                }
            });
        }

        info!("Status server stopped");
        Ok(())
    }
}

fn respond(status: StatusCode, content_type: &str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    if let Ok(value) = content_type.parse() {
        response.headers_mut().insert(hyper::header::CONTENT_TYPE, value);
    }
    response
}

fn respond_json(status: StatusCode, body: &Value) -> Response<Full<Bytes>> {
    respond(status, "application/json", body.to_string())
}

fn error_json(status: StatusCode, message: impl std::fmt::Display) -> Response<Full<Bytes>> {
    respond_json(status, &json!({ "error": message.to_string() }))
}

pub(crate) async fn handle_request<B>(
    req: Request<B>,
    supervisor: Arc<BridgeSupervisor>,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/health") => match serde_json::to_value(supervisor.health()) {
            Ok(health) => respond_json(StatusCode::OK, &health),
            Err(e) => error_json(StatusCode::INTERNAL_SERVER_ERROR, e),
        },
        (&Method::GET, "/ready") => {
            if supervisor.state() == BridgeState::Running {
                respond(StatusCode::OK, "text/plain", "OK")
            } else {
                respond(StatusCode::SERVICE_UNAVAILABLE, "text/plain", "Not ready")
            }
        }
        (&Method::GET, "/metrics") => match supervisor.metrics().encode() {
            Ok(text) => respond(StatusCode::OK, "text/plain; version=0.0.4", text),
            Err(e) => {
                error!("Failed to encode metrics: {}", e);
                respond(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "text/plain",
                    "Failed to encode metrics",
                )
            }
        },
        (&Method::POST, "/api/commands") => handle_command(req, &supervisor).await,
        (_, "/health" | "/ready" | "/metrics" | "/api/commands") => {
            respond(StatusCode::METHOD_NOT_ALLOWED, "text/plain", "Method Not Allowed")
        }
        _ => respond(StatusCode::NOT_FOUND, "text/plain", "Not Found"),
    };

    Ok(response)
}

async fn handle_command<B>(req: Request<B>, supervisor: &BridgeSupervisor) -> Response<Full<Bytes>>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    let body = match Limited::new(req.into_body(), MAX_BODY).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => return error_json(StatusCode::BAD_REQUEST, format!("Unreadable body: {}", e)),
    };

    let request: CommandRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => return error_json(StatusCode::BAD_REQUEST, format!("Invalid command: {}", e)),
    };

    let commands = match supervisor.commands() {
        Ok(commands) => commands,
        Err(e) => return error_json(StatusCode::SERVICE_UNAVAILABLE, e),
    };

    let cmd = request.into_command();
    match commands.send(&cmd) {
        Ok(()) => {
            debug!("Accepted '{}' command for '{}'", cmd.command, cmd.target_id);
            respond_json(
                StatusCode::ACCEPTED,
                &json!({
                    "status": "accepted",
                    "category": cmd.category,
                    "targetId": cmd.target_id,
                    "command": cmd.command,
                }),
            )
        }
        Err(e @ PublishError::NotConnected) | Err(e @ PublishError::QueueFull) => {
            error_json(StatusCode::SERVICE_UNAVAILABLE, e)
        }
        Err(e @ PublishError::InvalidTarget(_)) => error_json(StatusCode::BAD_REQUEST, e),
        Err(e) => error_json(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}
