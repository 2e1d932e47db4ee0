// Application layer - Relay hub, connection supervision and the telemetry pipeline
pub mod command_channel;
pub mod normalizer;
pub mod obd_source;
pub mod pipeline;
pub mod relay_hub;
pub mod supervisor;
pub mod telemetry_sink;
pub mod transport;
