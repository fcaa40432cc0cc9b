//! Message body padding.
//!
//! Bodies are padded to a multiple of [`PADDING_BLOCK`] bytes so that
//! ciphertext length leaks only a coarse size bucket. A single `0x80` byte
//! terminates the content; zeros fill the remainder.

use crate::error::CryptoError;

/// Padding granularity in bytes.
pub const PADDING_BLOCK: usize = 160;

/// Content terminator.
const TERMINATOR: u8 = 0x80;

/// Pad a message body for encryption.
pub fn pad_message_body(body: &[u8]) -> Vec<u8> {
    let unpadded = body.len() + 1;
    let padded_len = unpadded.div_ceil(PADDING_BLOCK) * PADDING_BLOCK;

    let mut padded = Vec::with_capacity(padded_len);
    padded.extend_from_slice(body);
    padded.push(TERMINATOR);
    padded.resize(padded_len, 0);
    padded
}

/// Strip padding added by [`pad_message_body`].
pub fn unpad_message_body(padded: &[u8]) -> Result<&[u8], CryptoError> {
    let end = padded.iter().rposition(|&b| b != 0).ok_or(CryptoError::MalformedPadding)?;
    if padded[end] != TERMINATOR {
        return Err(CryptoError::MalformedPadding);
    }
    Ok(&padded[..end])
}
