//! GrihaIO - Home device control daemon
//!
//! This library provides the core components of a networked device-control
//! system: a binary packet codec, the module/device/feature tree, hardware
//! driver implementations, a TCP protocol server and a profile engine that
//! applies named scenes step by step with hardware confirmation.

pub mod config;
pub mod driver;
pub mod error;
pub mod model;
pub mod packet;
pub mod profile;
pub mod server;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use packet::Packet;
