use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use easel_core::meta::PrivateMetaInfo;
use easel_core::task::TaskResult;
use easel_core::types::ProviderId;
use easel_core::validation::validate_provider_id;
use easel_engine::{NetworkConnection, Provider};

use crate::state::AppState;
use crate::ws::link::WsLink;
use crate::ws::protocol::NodeMessage;

/// HTTP handler that upgrades the connection to the node socket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Manage a single node session after upgrade.
///
/// Splits the socket into a sink (outbound) and stream (inbound), then:
///   1. Spawns a writer task draining the outbound channel into the sink.
///   2. Processes inbound frames on the current task; the first `register`
///      creates or restores the provider.
///   3. Reports the disconnect on exit so the grace timer starts.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (outbound, mut rx) = mpsc::unbounded_channel::<Message>();
    // One link per session; the provider tracks whichever link registered
    // last, which is how a stale session is told apart from the live one.
    let link = Arc::new(WsLink::new(outbound));

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if sink.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    let mut node_id: Option<ProviderId> = None;

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<NodeMessage>(&text) {
                Ok(message) => handle_node_message(&state, &link, &mut node_id, message),
                Err(error) => {
                    tracing::warn!(%error, "unparseable node frame dropped");
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(error) => {
                tracing::debug!(error = %error, "node socket error");
                break;
            }
        }
    }

    if let Some(provider_id) = &node_id {
        // A node that reconnected already handed the provider a fresh link;
        // the old session closing must not start the grace timer then.
        let session_link = link as Arc<dyn NetworkConnection>;
        match state.dispatcher.provider(provider_id) {
            Some(provider) if !provider.uses_connection(&session_link) => {
                tracing::info!(provider_id = %provider_id, "superseded node session closed");
            }
            _ => {
                tracing::info!(provider_id = %provider_id, "node socket closed");
                state.dispatcher.connection_lost(provider_id);
            }
        }
    }
    writer.abort();
}

/// Route one inbound frame.
///
/// `result`/`error` frames for a task the provider does not hold are logged
/// no-ops; nodes may report on work that was aborted or reassigned while
/// the report was in the pipe.
fn handle_node_message(
    state: &AppState,
    link: &Arc<WsLink>,
    node_id: &mut Option<ProviderId>,
    message: NodeMessage,
) {
    match message {
        NodeMessage::Register {
            node_id: id,
            metadata,
        } => {
            if let Err(error) = validate_provider_id(&id) {
                tracing::warn!(%error, "register rejected");
                return;
            }
            if let Some(previous) = node_id {
                if previous != &id {
                    tracing::warn!(previous = %previous, new = %id, "node re-registered under a different id");
                }
            }
            state.dispatcher.register_provider(
                id.clone(),
                metadata,
                PrivateMetaInfo::default(),
                Arc::clone(link) as Arc<dyn NetworkConnection>,
            );
            *node_id = Some(id);
        }
        NodeMessage::Result {
            task_id,
            results_url,
        } => {
            let Some(provider) = registered_provider(state, node_id, "result") else {
                return;
            };
            match provider.in_flight_task(&task_id) {
                Some(task) => {
                    provider.task_completed(
                        &task,
                        TaskResult {
                            images: results_url,
                        },
                    );
                }
                None => {
                    tracing::warn!(task_id = %task_id, "result for a task this node does not hold");
                }
            }
        }
        NodeMessage::Error { task_id, error } => {
            let Some(provider) = registered_provider(state, node_id, "error") else {
                return;
            };
            match provider.in_flight_task(&task_id) {
                Some(task) => {
                    provider.task_failed(&task, &error);
                }
                None => {
                    tracing::warn!(task_id = %task_id, "error for a task this node does not hold");
                }
            }
        }
    }
}

/// Look up the provider this session registered as.
fn registered_provider(
    state: &AppState,
    node_id: &Option<ProviderId>,
    frame: &'static str,
) -> Option<Arc<Provider>> {
    let Some(id) = node_id else {
        tracing::warn!(frame, "frame before register dropped");
        return None;
    };
    let provider = state.dispatcher.provider(id);
    if provider.is_none() {
        tracing::warn!(provider_id = %id, frame, "frame from an evicted provider dropped");
    }
    provider
}
