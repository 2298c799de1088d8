//! flowsweep library.
//!
//! Closed-loop flow control, experiment sequencing and network-analyzer
//! sweep orchestration for a dielectric-spectroscopy flow rig.  Exposes
//! every module for integration testing and for alternative front ends.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod control;
pub mod drivers;
pub mod error;
pub mod fsm;
pub mod vna;

pub use error::{Error, Result};
