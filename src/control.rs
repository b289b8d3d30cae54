//! Control Endpoint (§2 "Control Endpoint", §B.4 of SPEC_FULL.md): accepts submission messages
//! over a websocket, builds the challenge and its task DAG, binds a reporter that streams reports
//! back down the same socket, and pushes the DAG onto the scheduler.
//!
//! One socket is the "persistent bidirectional control channel" of §1: several challenges can be
//! in flight on the same connection at once, multiplexed by `chal_id` as §5 requires.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use judge_exec::Scheduler;

use crate::challenge_builder::build_challenge;
use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub scheduler: Arc<Scheduler>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/judge", get(judge_handler))
        .with_state(state)
}

async fn judge_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<serde_json::Value>();

    let send_task = tokio::spawn(async move {
        while let Some(value) = out_rx.recv().await {
            let text = value.to_string();
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = ws_rx.next().await {
        let Message::Text(text) = message else {
            continue;
        };

        match crate::message::parse_submission(&text) {
            Ok(msg) => {
                let chal_id = msg.chal_id;
                let reporter_tx = out_tx.clone();
                let reporter: judge_exec::Reporter = Box::new(move |value| {
                    // The reporter is called from scheduler worker threads; handing off through
                    // the unbounded channel keeps the websocket write itself off the worker
                    // (§5 "the report is non-blocking to the worker").
                    let _ = reporter_tx.send(value);
                });

                match build_challenge(msg, &state.config, reporter) {
                    Ok((chal, dag)) => {
                        state.scheduler.push_dag(chal, dag);
                    }
                    Err(e) => {
                        log::warn!("challenge {chal_id}: failed to build: {e:#}");
                        let _ = out_tx.send(serde_json::json!({
                            "chal_id": chal_id,
                            "task": "summary",
                            "error": e.to_string(),
                        }));
                    }
                }
            }
            Err(e) => {
                log::warn!("rejected malformed submission message: {e}");
                let _ = out_tx.send(serde_json::json!({ "error": e.to_string() }));
            }
        }
    }

    drop(out_tx);
    let _ = send_task.await;
}
