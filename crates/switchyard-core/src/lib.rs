#![doc = include_str!("../README.md")]

mod address;
mod envelope;
mod error;
mod frame;
mod identity;
mod socket_type;

pub use crate::address::*;
pub use crate::envelope::*;
pub use crate::error::*;
pub use crate::frame::*;
pub use crate::identity::*;
pub use crate::socket_type::*;
// Public re-export so downstream crates can share the same `Bytes` type used
// by frames.
pub use bytes;
