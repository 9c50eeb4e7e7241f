//! Pure XOR masking (RFC 6455 §5.3). Kept out of the codec so it can be tested and
//! optimized in isolation, the way the teacher's `utils::fast_xor` was meant to but never
//! grew beyond a byte-at-a-time `itertools::cycle` in the Python source this crate learns
//! from (`aiowebsockets/utils.py`).

/// XORs `payload` in place against `key`, cycling the 4-byte key across the payload.
/// Processes 8 bytes at a time where the remaining payload is long enough, falling back
/// to a byte loop for the tail.
pub fn mask_in_place(payload: &mut [u8], key: [u8; 4]) {
    if payload.is_empty() {
        return;
    }

    // Repeat the 4-byte key to fill a u64 so a chunk of 8 payload bytes can be XORed
    // against it in one word-sized operation, independent of the chunk's alignment
    // relative to the key's own cycle (the key repeats every 4 bytes, so any 8-byte
    // chunk starting at a multiple of 4 sees the same repeated-key word).
    let key_u64 = u64::from_ne_bytes([
        key[0], key[1], key[2], key[3], key[0], key[1], key[2], key[3],
    ]);

    let len = payload.len();
    let mut chunks = payload.chunks_exact_mut(8);
    for chunk in &mut chunks {
        let word = u64::from_ne_bytes(chunk.try_into().unwrap());
        chunk.copy_from_slice(&(word ^ key_u64).to_ne_bytes());
    }

    let processed = len - chunks.into_remainder().len();
    for (i, byte) in payload[processed..].iter_mut().enumerate() {
        *byte ^= key[(processed + i) % 4];
    }
}
