// Application state for relay handlers
use crate::application::relay_hub::RelayHub;

#[derive(Clone)]
pub struct AppState {
    pub relay: RelayHub,
}
