//! WebSocket client session
//!
//! One session per dashboard client. The socket is split: a writer task
//! drains the client's frame queue into text messages while the reader
//! handles subscribe, unsubscribe and ping requests.

use std::io;
use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, trace};

use super::message::{self, valid_entity_id, ClientRequest};
use crate::fanout::{ClientId, FanoutPublisher};

fn reject(status: StatusCode, reason: String) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason));
    *response.status_mut() = status;
    response
}

/// Complete the handshake, refusing other paths and a full server
pub async fn accept(
    stream: TcpStream,
    expected_path: &str,
    full: bool,
) -> Result<WebSocketStream<TcpStream>, io::Error> {
    let expected_path = expected_path.to_string();
    tokio_tungstenite::accept_hdr_async(stream, move |req: &Request, response: Response| {
        let path = req.uri().path();
        if path != expected_path {
            return Err(reject(
                StatusCode::NOT_FOUND,
                format!("Invalid path: expected '{}', got '{}'", expected_path, path),
            ));
        }
        if full {
            return Err(reject(
                StatusCode::SERVICE_UNAVAILABLE,
                "Too many clients".to_string(),
            ));
        }
        Ok(response)
    })
    .await
    .map_err(io::Error::other)
}

/// Drive a client until it leaves or the server shuts down
pub async fn serve_client(
    ws: WebSocketStream<TcpStream>,
    addr: SocketAddr,
    fanout: FanoutPublisher,
    mut shutdown: broadcast::Receiver<()>,
) {
    let (id, mut frames) = fanout.connect();
    debug!("Client {} connected from {}", id, addr);

    let (mut sink, mut stream) = ws.split();

    let writer = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            if let Err(e) = sink.send(Message::Text(frame.to_string())).await {
                trace!("Client {} write failed: {}", id, e);
                return;
            }
        }
        // Queue closed: the client was removed
        let _ = sink.send(Message::Close(None)).await;
    });

    loop {
        let message = tokio::select! {
            biased;

            result = shutdown.recv() => match result {
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                _ => break,
            },
            message = stream.next() => message,
        };

        match message {
            Some(Ok(Message::Text(text))) => handle_request(&fanout, id, &text),
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!("Client {} read error: {}", id, e);
                break;
            }
        }
    }

    fanout.disconnect(id);
    let _ = writer.await;
    debug!("Client {} disconnected", id);
}

fn handle_request(fanout: &FanoutPublisher, id: ClientId, text: &str) {
    let request = match ClientRequest::parse(text) {
        Ok(request) => request,
        Err(e) => {
            fanout.reply(
                id,
                message::ERROR,
                json!({ "message": format!("Invalid request: {}", e) }),
            );
            return;
        }
    };

    match request {
        ClientRequest::Subscribe { entity_id } | ClientRequest::Unsubscribe { entity_id }
            if !valid_entity_id(&entity_id) =>
        {
            fanout.reply(
                id,
                message::ERROR,
                json!({ "message": format!("Invalid entityId '{}'", entity_id) }),
            );
        }
        ClientRequest::Subscribe { entity_id } => {
            fanout.join(id, &entity_id);
            debug!("Client {} subscribed to {}", id, entity_id);
            fanout.reply(id, message::SUBSCRIBED, json!({ "entityId": entity_id }));
        }
        ClientRequest::Unsubscribe { entity_id } => {
            fanout.leave(id, &entity_id);
            debug!("Client {} unsubscribed from {}", id, entity_id);
            fanout.reply(id, message::UNSUBSCRIBED, json!({ "entityId": entity_id }));
        }
        ClientRequest::Ping => {
            fanout.reply(id, message::PONG, json!({}));
        }
    }
}
