use async_trait::async_trait;
use axum::extract::ws::Message;
use tokio::sync::mpsc;

use easel_core::task::TaskSpec;
use easel_core::types::TaskId;
use easel_engine::{NetworkConnection, NetworkError};

use crate::ws::protocol::{AbortFrame, TaskFrame};

/// [`NetworkConnection`] over one node's WebSocket session.
///
/// Frames go through the session's unbounded outbound channel; the writer
/// task drains it into the socket. A dropped receiver means the session is
/// gone, reported as [`NetworkError::Closed`].
pub struct WsLink {
    outbound: mpsc::UnboundedSender<Message>,
}

impl WsLink {
    pub fn new(outbound: mpsc::UnboundedSender<Message>) -> Self {
        Self { outbound }
    }

    fn send_json<T: serde::Serialize>(&self, frame: &T) -> Result<(), NetworkError> {
        let text = serde_json::to_string(frame)
            .map_err(|error| NetworkError::Send(error.to_string()))?;
        self.outbound
            .send(Message::Text(text.into()))
            .map_err(|_| NetworkError::Closed)
    }
}

#[async_trait]
impl NetworkConnection for WsLink {
    async fn send_task(&self, task: &TaskSpec) -> Result<(), NetworkError> {
        self.send_json(&TaskFrame::from_spec(task))
    }

    async fn abort_task(&self, task_id: &TaskId) -> Result<(), NetworkError> {
        self.send_json(&AbortFrame::new(task_id))
    }

    async fn close(&self) {
        let _ = self.outbound.send(Message::Close(None));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use easel_core::task::{TaskOptions, TaskSpec};

    #[tokio::test]
    async fn task_frames_reach_the_channel() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let link = WsLink::new(tx);

        let spec = TaskSpec::with_id("t-1", 15, 1.0, TaskOptions::default());
        link.send_task(&spec).await.unwrap();

        let Some(Message::Text(text)) = rx.recv().await else {
            panic!("expected a text frame");
        };
        assert!(text.as_str().contains("\"taskId\":\"t-1\""));
    }

    #[tokio::test]
    async fn abort_frames_reach_the_channel() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let link = WsLink::new(tx);

        link.abort_task(&"t-2".to_string()).await.unwrap();

        let Some(Message::Text(text)) = rx.recv().await else {
            panic!("expected a text frame");
        };
        assert!(text.as_str().contains("\"type\":\"abort\""));
    }

    #[tokio::test]
    async fn dropped_session_reports_closed() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let link = WsLink::new(tx);

        let spec = TaskSpec::with_id("t-3", 15, 1.0, TaskOptions::default());
        assert!(matches!(
            link.send_task(&spec).await,
            Err(NetworkError::Closed)
        ));
    }

    #[tokio::test]
    async fn close_sends_a_close_frame() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let link = WsLink::new(tx);

        link.close().await;
        assert!(matches!(rx.recv().await, Some(Message::Close(None))));
    }
}
