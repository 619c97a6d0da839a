//! Transport implementations.

pub mod loopback;
