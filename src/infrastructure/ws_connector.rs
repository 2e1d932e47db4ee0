// WebSocket connector - tokio-tungstenite implementation of the transport port
use crate::application::transport::{Connector, Transport, TransportError, TransportFrame};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt, future};
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Transport, TransportError> {
        tracing::debug!("Connecting to {}", self.url);
        let (ws_stream, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let (ws_write, ws_read) = ws_stream.split();

        let sink = ws_write
            .sink_map_err(|e| TransportError::Send(e.to_string()))
            .with(|frame: TransportFrame| future::ready(Ok::<_, TransportError>(to_message(frame))));

        // Ping/pong is answered by tungstenite itself
        let stream = ws_read.filter_map(|result| future::ready(from_message(result)));

        Ok(Transport {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

fn to_message(frame: TransportFrame) -> Message {
    match frame {
        TransportFrame::Text(text) => Message::Text(text),
        TransportFrame::Binary(bytes) => Message::Binary(bytes),
        TransportFrame::Close => Message::Close(None),
    }
}

fn from_message(
    result: Result<Message, tokio_tungstenite::tungstenite::Error>,
) -> Option<Result<TransportFrame, TransportError>> {
    match result {
        Ok(Message::Text(text)) => Some(Ok(TransportFrame::Text(text))),
        Ok(Message::Binary(bytes)) => Some(Ok(TransportFrame::Binary(bytes))),
        Ok(Message::Close(_)) => Some(Ok(TransportFrame::Close)),
        Ok(_) => None,
        Err(e) => Some(Err(TransportError::Receive(e.to_string()))),
    }
}
