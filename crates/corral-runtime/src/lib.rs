//! # corral-runtime
//!
//! Runs one container: validates its configuration, spawns the isolated
//! child, confines it from the host side, releases it over the readiness
//! channel, waits for the command and tears down.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod confine;
pub mod container;
pub mod handshake;
pub mod process;

pub use config::ContainerConfig;
pub use container::{ChildHandle, Container};
