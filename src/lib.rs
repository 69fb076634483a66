//! Single-flight device pairing gateway.
//!
//! Turns the multi-stage link handshake of a messaging session into one
//! request/response: validate the target, admit at most one session, issue a
//! pairing code, then finish linking and deliver credentials in the
//! background.

pub mod cli;
pub mod config;
pub mod error;
pub mod http;
pub mod pairing;

pub use config::PairingConfig;
pub use error::{Error, Result};
