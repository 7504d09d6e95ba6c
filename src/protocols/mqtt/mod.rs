//! MQTT responder protocol.
//!
//! Just enough of MQTT to keep a device client happy:
//! - Client sends CONNECT, server answers CONNACK (accepted)
//! - Client sends PUBLISH, server answers PUBACK
//! - Anything else is logged and ignored once connected
//!
//! ## Protocol Format
//!
//! ```text
//! Request:  10 ..            (CONNECT, first packet only)
//! Response: 20 02 00 00
//!
//! Request:  3x ll b2 b3 ...  (PUBLISH)
//! Response: 40 02 b2 b3      (40 02 00 01 when shorter than 5 bytes)
//! ```
//!
//! There is no routing, subscription tracking, or session state.

pub mod handler;
pub mod parser;

pub use handler::ConnectionHandler;
