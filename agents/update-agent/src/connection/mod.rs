//! Connection module
//!
//! This module handles all communication with the controller over the
//! message bus: the wire protocol and the Redis transport.

pub mod bus;
pub mod protocol;
pub mod transport;
