//! Fuzz target: `parse_trace`
//!
//! Feeds arbitrary text to the trace parser.  It must never panic, and
//! whatever it accepts must be one triple per `[...]` group.
//!
//! cargo fuzz run fuzz_trace_parser

#![no_main]

use flowsweep::vna::sweep::parse_trace;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(points) = parse_trace(text) {
        assert!(!points.is_empty());
        assert_eq!(points.len(), text.trim().matches("],[").count() + 1);
    }
});
