pub mod config;
pub mod connection;
pub mod debugger;
pub mod logger;
pub mod packets;
pub mod server;
pub mod signal;
pub mod stub;
pub mod target;
