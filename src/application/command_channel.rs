// Outbound command channel - Validates control tokens and writes them upstream
use crate::application::supervisor::SupervisorLink;
use crate::application::telemetry_sink::TelemetrySink;
use crate::domain::command::{CommandError, OutboundCommand};
use std::sync::Arc;

/// Outcome of a dispatch. There is no acknowledgement protocol, so this only
/// says whether the frame was handed to an open connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReceipt {
    pub command: OutboundCommand,
    pub written: bool,
}

#[derive(Clone)]
pub struct CommandChannel {
    link: SupervisorLink,
    sink: Arc<dyn TelemetrySink>,
}

impl CommandChannel {
    pub fn new(link: SupervisorLink, sink: Arc<dyn TelemetrySink>) -> Self {
        Self { link, sink }
    }

    /// Parse and send a raw token. Unknown tokens never reach the transport.
    pub fn dispatch(&self, token: &str) -> Result<DispatchReceipt, CommandError> {
        let command: OutboundCommand = token.parse()?;
        Ok(self.dispatch_command(command))
    }

    pub fn dispatch_command(&self, command: OutboundCommand) -> DispatchReceipt {
        let written = self.link.send(command.as_str());
        if written {
            tracing::info!("Sent command: {}", command);
        }
        // Confirmed locally even when the connection is down
        self.sink.on_command(command);
        DispatchReceipt { command, written }
    }
}
