use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use eeg_types::{ControlCommand, TelemetryEvent};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any as CorsAny, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::controller::ControllerHandle;
use crate::session::{SessionSnapshot, SessionState};
use crate::telemetry::Telemetry;

// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<SessionState>,
    pub telemetry: Telemetry,
    pub controller: ControllerHandle,
    /// Closes open sockets when the daemon shuts down
    pub shutdown: CancellationToken,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .route("/status", get(status_handler))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(CorsAny)
                .allow_methods(CorsAny)
                .allow_headers(CorsAny),
        )
        .layer(TraceLayer::new_for_http())
}

async fn status_handler(State(state): State<AppState>) -> Json<SessionSnapshot> {
    Json(state.session.snapshot())
}

async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let client_id = Uuid::new_v4();
    info!(%client_id, "Client connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    // Subscribe before sending the current status so nothing published in
    // between is missed.
    let mut telemetry_rx = state.telemetry.subscribe();

    let status = TelemetryEvent::ConnectionStatus {
        status: state.session.connection(),
    };
    if send_event(&mut ws_tx, &status).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            biased;
            _ = state.shutdown.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
            incoming = ws_rx.next() => match incoming {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ControlCommand>(&text) {
                    Ok(command) => {
                        debug!(%client_id, command = command.name(), "Received command");
                        if let Err(e) = state.controller.send(command).await {
                            error!(%client_id, "Dropping command: {}", e);
                            let _ = send_event(&mut ws_tx, &TelemetryEvent::log(e.to_string())).await;
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(%client_id, "Invalid command: {}", e);
                        let reply = TelemetryEvent::log(format!("Invalid command: {}", e));
                        if send_event(&mut ws_tx, &reply).await.is_err() {
                            break;
                        }
                    }
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(%client_id, "WebSocket error: {}", e);
                    break;
                }
            },
            event = telemetry_rx.recv() => match event {
                Ok(event) => {
                    if send_event(&mut ws_tx, &event).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(%client_id, skipped, "Client lagging, telemetry dropped");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    info!(%client_id, "Client disconnected");
}

async fn send_event(ws_tx: &mut SplitSink<WebSocket, Message>, event: &TelemetryEvent) -> Result<(), axum::Error> {
    match serde_json::to_string(event) {
        Ok(json) => ws_tx.send(Message::Text(json)).await,
        Err(e) => {
            error!("Failed to serialize {}: {}", event.event_type_name(), e);
            Ok(())
        }
    }
}

/// Serve the control endpoints on `listener` until `shutdown` is cancelled.
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    let shutdown = state.shutdown.clone();
    let app = create_router(state);

    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
