//! Closed-loop flow control.

pub mod flow_loop;
