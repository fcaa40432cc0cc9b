//! Sealed-delivery access keys.
//!
//! Each recipient publishes a 16-byte access key. A multi-recipient request
//! is authorized by the XOR of the keys of every addressed recipient, so the
//! composite is independent of recipient order.

use std::{fmt, ops::BitXor};

use serde::{Deserialize, Serialize};

use crate::error::CryptoError;

/// Length of an access key in bytes.
pub const ACCESS_KEY_LEN: usize = 16;

/// Per-recipient access key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessKey([u8; ACCESS_KEY_LEN]);

impl AccessKey {
    /// The identity element for [`composite_access_key`].
    pub const ZERO: Self = Self([0; ACCESS_KEY_LEN]);

    /// Wrap raw bytes.
    pub fn from_bytes(bytes: [u8; ACCESS_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; ACCESS_KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessKey(..)")
    }
}

impl BitXor for AccessKey {
    type Output = Self;

    fn bitxor(self, rhs: Self) -> Self {
        let mut out = [0u8; ACCESS_KEY_LEN];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ rhs.0[i];
        }
        Self(out)
    }
}

/// Combine per-recipient keys into one composite key.
///
/// # Errors
///
/// `EmptyAccessKeySet` if `keys` yields nothing; a request with no
/// recipients has no meaningful credential.
pub fn composite_access_key(
    keys: impl IntoIterator<Item = AccessKey>,
) -> Result<AccessKey, CryptoError> {
    let mut keys = keys.into_iter();
    let first = keys.next().ok_or(CryptoError::EmptyAccessKeySet)?;
    Ok(keys.fold(first, BitXor::bitxor))
}
