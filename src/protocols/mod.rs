//! Protocol implementations.
//!
//! - `mqtt`: CONNECT/PUBLISH responder used for device bring-up

pub mod mqtt;
