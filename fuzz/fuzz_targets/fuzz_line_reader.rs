//! Fuzz target: `LineReader::read_line`
//!
//! Splits arbitrary bytes into transport reads at data-chosen points and
//! checks that every returned line ends with exactly one terminator and
//! that no bytes are lost or duplicated.
//!
//! cargo fuzz run fuzz_line_reader

#![no_main]

use std::time::Duration;

use flowsweep::vna::codec::{LineReader, TERMINATOR};
use flowsweep::vna::transport::ScriptedTransport;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&chunk, payload)) = data.split_first() else {
        return;
    };
    let chunk = usize::from(chunk.max(1));

    let mut t = ScriptedTransport::new();
    for piece in payload.chunks(chunk) {
        t.push_bytes(piece);
    }

    let mut reader = LineReader::new();
    let mut seen = Vec::new();
    while let Ok(line) = reader.read_line(&mut t, Duration::from_secs(1)) {
        assert_eq!(line.last(), Some(&TERMINATOR));
        assert_eq!(line.iter().filter(|&&b| b == TERMINATOR).count(), 1);
        seen.extend_from_slice(&line);
    }
    seen.extend_from_slice(reader.buffered());
    assert_eq!(seen, payload);
});
