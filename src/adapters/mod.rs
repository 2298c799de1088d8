//! Adapters — concrete implementations of the hexagonal port traits.
//!
//! | Adapter        | Implements          | Connects to                   |
//! |----------------|---------------------|-------------------------------|
//! | `config_file`  | ConfigPort          | JSON file on disk             |
//! | `hardware`     | FlowSensor          | any sensor driver             |
//! |                | PumpActuator        | any pump driver               |
//! |                | ValveDriver         | any valve driver              |
//! | `log_sink`     | EventSink           | `log` facade                  |
//! |                | ResultSink          | `log` facade                  |
//! | `result_file`  | ResultSink          | one JSON file per experiment  |
//! | `sim`          | (hardware parts)    | first-order flow model        |
//!
//! The instrument side of the hexagon ([`SweepRunner`](crate::app::ports::SweepRunner))
//! is implemented by [`crate::vna::sweep::InstrumentSweeper`].

pub mod config_file;
pub mod hardware;
pub mod log_sink;
pub mod result_file;
pub mod sim;
