//! Transport-level handlers

pub mod websocket;
