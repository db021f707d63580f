//! WebSocket interfaces for UI clients

pub mod status;

pub use status::{ws_status_handler, StatusStreamQuery};
