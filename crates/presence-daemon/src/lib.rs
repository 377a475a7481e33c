//! # presence-daemon
//!
//! Process wiring for the beacon-presence daemon: logging, start-up and
//! signal handling around the [`presence_core`] scan loop.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod logging;
pub mod shutdown;
pub mod startup;
