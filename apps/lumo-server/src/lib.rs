//! Lumo node binary internals: configuration, the feature-hashing
//! encoder, and the leader shell.

pub mod config;
pub mod encoder;
pub mod shell;
