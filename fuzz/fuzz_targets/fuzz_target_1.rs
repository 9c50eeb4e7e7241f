#![no_main]

use libfuzzer_sys::fuzz_target;
use wavelink::codec::{decode, DecodeOutcome};

// Feeds arbitrary bytes straight into the frame decoder. `decode` must never panic on
// any input, and `FrameReady`'s `consumed_bytes` must never exceed `data.len()` or leave
// the reported frame's payload pointing outside the buffer it was decoded from.
fuzz_target!(|data: &[u8]| {
    match decode(data) {
        Ok(DecodeOutcome::FrameReady(frame, consumed)) => {
            assert!(consumed <= data.len());
            assert!(frame.payload.len() <= data.len());
        }
        Ok(DecodeOutcome::Incomplete) | Err(_) => {}
    }
});
