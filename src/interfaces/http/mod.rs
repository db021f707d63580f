//! HTTP REST API
//!
//! - `common`: response envelopes and the validating JSON extractor
//! - `modules`: station commands, health, metrics
//! - `router`: route table and middleware stack

pub mod common;
pub mod modules;
pub mod router;
pub mod state;

pub use router::create_api_router;
pub use state::ApiState;
