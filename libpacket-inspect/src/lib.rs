//! Packet inspection stage
//!
//! For every packet of a frame, classify the IPv4 transport protocol, extract
//! ICMP length or TCP metadata (ports, sequence number, and a Modbus/TCP
//! transaction id and function code heuristic), optionally record a trace
//! entry, and forward the packet unchanged.
//!
//! All header access goes through the bounds-checked [`PacketView`].

#[macro_use]
extern crate log;

mod classifier;
mod config;
mod cursor;
mod error;
mod features;
mod headers;
mod modbus;
mod node;
pub mod periodic;
mod trace;
pub mod worker;

#[cfg(test)]
mod test_util;

pub use classifier::*;
pub use config::Config;
pub use cursor::{PacketView, WireHeader};
pub use error::{Error, ParseError};
pub use features::FeatureTable;
pub use headers::*;
pub use modbus::*;
pub use node::*;
pub use trace::*;
