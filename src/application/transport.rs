// Transport port - How the supervisor reaches the relay
use async_trait::async_trait;
use futures::{Sink, Stream};
use std::pin::Pin;
use thiserror::Error;

/// A frame as seen by the pipeline, independent of the WebSocket library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFrame {
    Text(String),
    Binary(Vec<u8>),
    Close,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("receive failed: {0}")]
    Receive(String),
}

pub type FrameSink = Pin<Box<dyn Sink<TransportFrame, Error = TransportError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<TransportFrame, TransportError>> + Send>>;

/// An established connection, split into its write and read halves.
pub struct Transport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a fresh connection to the upstream relay
    async fn connect(&self) -> Result<Transport, TransportError>;
}
