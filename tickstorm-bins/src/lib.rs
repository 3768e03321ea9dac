//! Shared setup for the tickstorm binaries

pub mod common;
