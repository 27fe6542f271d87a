// ABOUTME: Async HTSP RPC client: handshake, sequence demultiplexing, EPG helpers, event dispatch

pub mod client;
pub mod epg;
pub mod events;
pub mod session;

pub use client::HtspClient;
pub use events::{EventHandler, HtspEvent};
