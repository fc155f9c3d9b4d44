//! TCP protocol server: framing, dispatch, fan-out, keepalive

pub mod connection;
pub mod manager;
pub mod message;

pub use manager::Server;
