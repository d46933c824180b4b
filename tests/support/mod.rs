//! Helpers shared by the integration test binaries.
#![allow(dead_code)]

pub mod ranged;
pub mod socket_guard;
