//! HTTP and WebSocket surface of the bridge: JSON API over the session
//! registry plus the per-sector notification socket.

pub mod api;
pub mod server;
pub mod state;
pub mod ws;

pub use {server::{bootstrap, build_gateway_app, start_gateway, start_gateway_with}, state::GatewayState};
