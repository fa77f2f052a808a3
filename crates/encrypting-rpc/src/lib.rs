//! Encrypting JSON-RPC gateway.
//!
//! The gateway sits in front of an execution node. Transactions sent through
//! `eth_sendRawTransaction` or `eth_sendTransaction` are validated, arbitrated
//! against competing submissions for the same sender and nonce, encrypted to
//! the keyper committee's eon key and handed to the sequencer contract. Every
//! other call is forwarded to the node untouched.
//!
//! Besides the ready-to-run [`Gateway`], the building blocks ([`RaceCache`],
//! [`Pipeline`], the [`crypto`] primitives) can be embedded directly.

pub mod cache;
pub mod config;
pub mod crypto;
pub mod error;
pub mod pipeline;
pub mod router;
pub mod sender_recovery;
pub mod server;
pub mod slot;
pub mod sweep;
pub mod upstream;
pub mod validation;

#[cfg(any(test, feature = "test"))]
pub mod test_utils;

pub use cache::RaceCache;
pub use config::GatewayConfig;
pub use error::{
    GatewayError,
    Result,
};
pub use pipeline::{
    EncryptingSubmitter,
    Pipeline,
    Submitter,
};
pub use server::{
    Gateway,
    GatewayBuilder,
};
