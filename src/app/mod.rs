//! Application core — domain orchestration behind port traits.
//!
//! This module holds the batch runner, the outbound event vocabulary and
//! the port traits every adapter implements.  All interaction with
//! hardware and the instrument happens through [`ports`], keeping this
//! layer testable without a rig.

pub mod events;
pub mod ports;
pub mod service;
