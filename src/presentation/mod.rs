// Presentation layer - Relay endpoints and the terminal viewer
pub mod app_state;
pub mod console;
pub mod handlers;
pub mod relay_server;
pub mod relay_session;
