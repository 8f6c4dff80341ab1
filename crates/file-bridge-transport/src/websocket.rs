//! WebSocket endpoint for agents.

use std::{future, sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket},
    },
    response::IntoResponse,
};
use file_bridge_core::{AgentLink, ConnectionHandler, Frame, LinkError};
use futures::{SinkExt, StreamExt, stream::BoxStream};
use tokio::sync::mpsc;

use crate::AppState;

/// How long the writer task gets to flush after the handler finishes.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Message queued for the socket writer task.
#[derive(Debug)]
enum Outbound {
    Frame(Frame),
    Close { code: u16, reason: String },
}

/// [`AgentLink`] backed by the writer task of an agent socket.
struct WsLink {
    tx: mpsc::UnboundedSender<Outbound>,
}

#[async_trait]
impl AgentLink for WsLink {
    async fn send(&self, frame: Frame) -> Result<(), LinkError> {
        self.tx
            .send(Outbound::Frame(frame))
            .map_err(|_| LinkError::Closed)
    }

    async fn close(&self, code: u16, reason: &str) -> Result<(), LinkError> {
        self.tx
            .send(Outbound::Close {
                code,
                reason: reason.to_string(),
            })
            .map_err(|_| LinkError::Closed)
    }
}

fn to_message(outbound: Outbound) -> Message {
    match outbound {
        Outbound::Frame(Frame::Text(text)) => Message::Text(text.into()),
        Outbound::Frame(Frame::Binary(data)) => Message::Binary(data),
        Outbound::Close { code, reason } => Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })),
    }
}

/// Inbound frames of an agent socket, ending at the first close message.
fn inbound_frames<S>(receiver: S) -> BoxStream<'static, Result<Frame, LinkError>>
where
    S: futures::Stream<Item = Result<Message, axum::Error>> + Send + 'static,
{
    receiver
        .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
        .filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.as_str().to_owned()))),
                Ok(Message::Binary(data)) => Some(Ok(Frame::Binary(data))),
                Ok(_) => None,
                Err(e) => Some(Err(LinkError::Transport(e.to_string()))),
            })
        })
        .boxed()
}

/// WebSocket upgrade handler for agents.
pub async fn agent_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_agent_socket(socket, state))
}

async fn handle_agent_socket(socket: WebSocket, state: AppState) {
    let (mut sender, receiver) = socket.split();

    // Channel for sending messages to the agent
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();

    // Spawn task to forward messages to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let closing = matches!(outbound, Outbound::Close { .. });
            if sender.send(to_message(outbound)).await.is_err() || closing {
                break;
            }
        }
    });

    let handler = ConnectionHandler::new(
        Arc::clone(state.correlator.registry()),
        Arc::new(WsLink { tx }),
        state.bridge.as_ref().clone(),
    );
    let id = handler.id();

    // `run` consumes the handler, releasing its end of the writer channel.
    if let Err(e) = handler.run(inbound_frames(receiver)).await {
        tracing::debug!(connection = %id, "Agent socket closed during handshake: {e}");
    }

    // Let the writer flush a queued close frame before the socket drops.
    let abort = send_task.abort_handle();
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, send_task).await.is_err() {
        tracing::debug!(connection = %id, "Agent socket writer did not drain in time");
        abort.abort();
    }
}
