#![doc = include_str!("../README.md")]

pub mod broker;
pub mod client;
pub mod config;
pub mod poller;
pub mod pool;
pub mod server;
pub mod system;
pub mod telemetry;
pub mod transport;

pub use switchyard_core;
