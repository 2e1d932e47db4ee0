// Domain layer - Metrics, alert latches, commands and connection state
pub mod alert;
pub mod command;
pub mod connection;
pub mod telemetry;
