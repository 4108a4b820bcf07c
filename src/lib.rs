//! Real-time two-party chess match coordination: authoritative match
//! state, per-side clocks, reconnection and rematch negotiation over
//! WebSocket push messages, plus the client-side mirror.

pub mod client;
pub mod game;
pub mod models;
pub mod routes;
pub mod websocket;
