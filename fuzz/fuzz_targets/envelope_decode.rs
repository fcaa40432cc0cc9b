//! Fuzz target for envelope and distribution message decoding
//!
//! # Invariants
//!
//! - Decoding arbitrary bytes never panics
//! - An envelope that decodes and re-encodes decodes to the same value

#![no_main]

use libfuzzer_sys::fuzz_target;
use sealcast_crypto::{MultiRecipientEnvelope, SenderKeyDistributionMessage};

fuzz_target!(|data: &[u8]| {
    let _ = SenderKeyDistributionMessage::from_bytes(data);

    let Ok(envelope) = MultiRecipientEnvelope::decode(data) else {
        return;
    };
    if let Ok(encoded) = envelope.encode() {
        let decoded = MultiRecipientEnvelope::decode(&encoded);
        assert_eq!(decoded.as_ref(), Ok(&envelope), "re-encoded envelope changed");
    }
});
