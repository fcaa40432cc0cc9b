//! Fuzz target for the multi-recipient response decoders
//!
//! Server bodies are untrusted. Every decoder must return an error for
//! malformed input and never panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use sealcast_sender::response::{decode_mismatched, decode_stale, decode_success};

fuzz_target!(|data: &[u8]| {
    let _ = decode_success(data);
    let _ = decode_mismatched(data);
    let _ = decode_stale(data);
});
