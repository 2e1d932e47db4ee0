// Relay session - Pumps one peer's WebSocket through the relay hub
use crate::application::relay_hub::{RelayFrame, RelayHub};
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};

/// Drive a single peer connection until either side closes it.
pub async fn run_peer(socket: WebSocket, relay: RelayHub) {
    let (id, mut outbound) = relay.connect();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let send_task = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let message = match frame {
                RelayFrame::Text(text) => Message::Text(text),
                RelayFrame::Binary(bytes) => Message::Binary(bytes),
            };
            if let Err(e) = ws_sender.send(message).await {
                tracing::debug!("{}: write failed: {}", id, e);
                break;
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        let message = match result {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!("{}: receive error: {}", id, e);
                break;
            }
        };

        match message {
            Message::Text(text) => {
                tracing::debug!("Received from {}: {}", id, text);
                relay.publish(id, RelayFrame::Text(text));
            }
            Message::Binary(bytes) => {
                tracing::debug!("Received {} bytes from {}", bytes.len(), id);
                relay.publish(id, RelayFrame::Binary(bytes));
            }
            Message::Close(_) => break,
            // Ping/pong is answered by axum
            _ => {}
        }
    }

    relay.disconnect(id);
    send_task.abort();
}
