//! Network front end: the websocket session endpoint and the preset admin API.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;

use crate::defaults::{MAX_MESSAGE_SIZE, PASSWORD_HEADER};
use crate::error::{Error, Result};
use crate::outbound::{MessageSink, Outbound};
use crate::presets::Preset;
use crate::session::{self, SessionContext};

impl MessageSink for SplitSink<WebSocket, Message> {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.send(Message::Text(text))
            .await
            .map_err(|e| Error::connection_closed(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = SinkExt::close(self).await;
    }
}

pub fn router(ctx: Arc<SessionContext>) -> Router {
    Router::new()
        .route("/", get(handle_upgrade))
        .route(
            "/api/presets",
            get(list_presets).post(upsert_preset).put(upsert_preset),
        )
        .with_state(ctx)
}

/// Bind `port` on all interfaces and serve until ctrl-c.
pub async fn serve(ctx: Arc<SessionContext>, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("bind {}", addr)))
    })?;

    tracing::info!(
        addr = %addr,
        presets = %ctx.presets.path().display(),
        "server listening"
    );

    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| Error::internal_io(e.to_string(), Some("serve".to_string())))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

async fn handle_upgrade(
    ws: WebSocketUpgrade,
    State(ctx): State<Arc<SessionContext>>,
) -> Response {
    ws.max_frame_size(MAX_MESSAGE_SIZE)
        .max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, ctx))
}

async fn handle_socket(socket: WebSocket, ctx: Arc<SessionContext>) {
    tracing::info!("client connected");

    let (sink, mut stream) = socket.split();
    let outbound = Outbound::new(sink);

    let Some(request) = next_request(&mut stream).await else {
        tracing::info!("client left before sending a request");
        return;
    };

    // The session future owns the running step; dropping it kills the child.
    tokio::select! {
        outcome = session::run(&ctx, &request, &outbound) => match outcome {
            Ok(outcome) => tracing::info!(outcome = ?outcome, "session finished"),
            Err(err) => tracing::warn!(error = %err.reason(), "session aborted"),
        },
        _ = wait_for_close(&mut stream) => {
            tracing::info!("client disconnected, cancelling session");
        }
    }

    outbound.close().await;
}

/// First data frame of the connection. Control frames are skipped.
async fn next_request(stream: &mut SplitStream<WebSocket>) -> Option<String> {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => return Some(text),
            Ok(Message::Binary(bytes)) => return Some(String::from_utf8_lossy(&bytes).into_owned()),
            Ok(Message::Close(_)) => return None,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read request");
                return None;
            }
        }
    }
    None
}

/// Resolves once the peer closes or the connection breaks. Later data frames
/// are ignored; a session accepts exactly one request.
async fn wait_for_close(stream: &mut SplitStream<WebSocket>) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Close(_)) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

async fn list_presets(State(ctx): State<Arc<SessionContext>>) -> Json<Vec<Preset>> {
    Json(ctx.presets.list())
}

async fn upsert_preset(
    State(ctx): State<Arc<SessionContext>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let provided = headers
        .get(PASSWORD_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if ctx.config.check_credential(provided).is_err() {
        tracing::warn!("rejected preset update");
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    }

    let preset: Preset = match serde_json::from_slice(&body) {
        Ok(preset) => preset,
        Err(e) => {
            tracing::debug!(error = %e, "unparsable preset body");
            return (StatusCode::BAD_REQUEST, "bad request").into_response();
        }
    };

    // The store writes its file synchronously.
    let stored = preset.clone();
    let task_ctx = Arc::clone(&ctx);
    let saved = tokio::task::spawn_blocking(move || {
        let ctx = task_ctx;
        ctx.presets.set(stored, &ctx.config)
    })
    .await
    .unwrap_or_else(|e| Err(Error::internal_unexpected(e.to_string())));

    match saved {
        Ok(()) => {
            tracing::info!(preset = %preset.name, steps = preset.steps.len(), "preset stored");
            (StatusCode::OK, Json(preset)).into_response()
        }
        Err(err) => {
            tracing::warn!(preset = %preset.name, error = %err.reason(), "preset rejected");
            (StatusCode::BAD_REQUEST, err.reason()).into_response()
        }
    }
}
