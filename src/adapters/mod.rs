//! Adapters implementing domain ports.

pub mod transport;
