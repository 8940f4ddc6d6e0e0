//! Pulsar Relay: a multi-tenant real-time message relay.
//!
//! JSON messages published to named topics over HTTP fan out to WebSocket
//! sessions and HTTP long-poll requests. Per-topic append-only logs allow
//! late joiners to replay recent history by cursor, and a cross-worker
//! relay channel makes a horizontally scaled deployment behave as one
//! logical broker.

pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod handlers;
pub mod hub;
pub mod models;
pub mod publish;
pub mod relay;
pub mod state;
pub mod store;
pub mod websocket;
