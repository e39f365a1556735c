use axum::{
    body::Bytes,
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::warn;

use super::build_log::LogLine;
use super::models::*;

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

// ── WebSocket message types ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WsMessage {
    LogLine {
        line: LogLine,
    },
    LogCleared,
    ProjectUpdated {
        project: Project,
    },
    SettingsUpdated {
        settings: BuildSettings,
    },

    // Build cycle
    PublishStarted {
        cycle: u32,
        file_count: usize,
    },
    PublishCompleted {
        cycle: u32,
        written: Vec<String>,
        head_sha: Option<String>,
    },
    PublishFailed {
        cycle: u32,
        error: String,
    },
    BuildProgress {
        run_id: Option<u64>,
        phase: BuildPhase,
        percent: u8,
        sample: u32,
    },
    BuildSucceeded {
        run: BuildRun,
        artifact: Option<ArtifactRef>,
    },
    BuildFailed {
        run: BuildRun,
    },
    BuildTimedOut {
        samples: u32,
    },
    BuildCancelled,

    // Fix loop
    FixStarted {
        attempt: u32,
    },
    FixCompleted {
        attempt: u32,
        file_count: usize,
    },
    FixFailed {
        attempt: u32,
        error: String,
    },
    LoopStarted {
        state: LoopState,
    },
    LoopStopped {
        state: LoopState,
        reason: StopReason,
    },
}

// ── WebSocket handler ────────────────────────────────────────────────

/// WebSocket handler that accepts a broadcast sender directly (for use with server router).
pub async fn ws_handler_with_sender(
    ws: WebSocketUpgrade,
    tx: broadcast::Sender<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket_with_sender(socket, tx))
}

async fn handle_socket_with_sender(socket: WebSocket, tx: broadcast::Sender<String>) {
    let (sender, receiver) = socket.split();
    let rx = tx.subscribe();
    run_socket_loop(sender, receiver, rx).await;
}

/// Core WebSocket loop with ping/pong keepalive.
///
/// Combines broadcast forwarding, client message receiving, and periodic
/// ping/pong health checking into a single select loop. If no Pong is
/// received within [`PONG_TIMEOUT`] after a Ping is sent, the connection
/// is considered dead and the loop exits.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: broadcast::Receiver<String>,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately; consume it so the first real
    // ping fires after PING_INTERVAL has elapsed.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    break;
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            result = rx.recv() => {
                match result {
                    Ok(msg) => {
                        if sender.send(Message::Text(msg.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("[ws] client lagged, {} messages dropped", skipped);
                        continue;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    // Best-effort close frame
    let _ = sender.send(Message::Close(None)).await;
}

// ── Broadcast helper ─────────────────────────────────────────────────

/// Serialize and broadcast a WsMessage to all connected WebSocket clients.
/// Returns silently even if no clients are connected.
pub fn broadcast_message(tx: &broadcast::Sender<String>, msg: &WsMessage) {
    match serde_json::to_string(msg) {
        Ok(json) => {
            let _ = tx.send(json); // Ignore error if no receivers
        }
        Err(e) => {
            warn!("[ws] Failed to serialize WsMessage: {}", e);
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn failed_run() -> BuildRun {
        BuildRun {
            id: 12,
            status: RunStatus::Completed,
            conclusion: Some(RunConclusion::Failure),
            progress_percent: 100,
            html_url: Some("https://github.com/o/r/actions/runs/12".to_string()),
        }
    }

    #[test]
    fn test_ws_message_build_progress_serialization() {
        let msg = WsMessage::BuildProgress {
            run_id: Some(3),
            phase: BuildPhase::InProgress,
            percent: 42,
            sample: 7,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"BuildProgress\""));
        assert!(json.contains("\"data\""));
        assert!(json.contains("\"phase\":\"in_progress\""));
        assert!(json.contains("\"percent\":42"));
    }

    #[test]
    fn test_ws_message_build_failed_serialization() {
        let msg = WsMessage::BuildFailed { run: failed_run() };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"BuildFailed\""));
        assert!(json.contains("\"conclusion\":\"failure\""));
        assert!(json.contains("\"progress_percent\":100"));
    }

    #[test]
    fn test_ws_message_loop_stopped_serialization() {
        let msg = WsMessage::LoopStopped {
            state: LoopState {
                active: false,
                attempt_count: 3,
            },
            reason: StopReason::UserRequested,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"LoopStopped\""));
        assert!(json.contains("\"attempt_count\":3"));
        assert!(json.contains("\"reason\":\"user_requested\""));
    }

    #[test]
    fn test_ws_message_log_cleared_serialization() {
        let json = serde_json::to_string(&WsMessage::LogCleared).unwrap();
        assert_eq!(json, r#"{"type":"LogCleared"}"#);
    }

    #[test]
    fn test_ws_message_roundtrip() {
        let msg = WsMessage::FixStarted { attempt: 2 };
        let json = serde_json::to_string(&msg).unwrap();
        let back: WsMessage = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, WsMessage::FixStarted { attempt: 2 }));
    }

    #[test]
    fn test_broadcast_message_without_receivers_is_silent() {
        let (tx, rx) = broadcast::channel::<String>(4);
        drop(rx);
        broadcast_message(&tx, &WsMessage::LogCleared);
    }

    #[test]
    fn test_broadcast_message_delivers_json() {
        let (tx, mut rx) = broadcast::channel::<String>(4);
        broadcast_message(&tx, &WsMessage::BuildTimedOut { samples: 180 });
        let received = rx.try_recv().unwrap();
        assert!(received.contains("\"samples\":180"));
    }
}
