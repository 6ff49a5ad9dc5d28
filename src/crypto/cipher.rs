/*!
 * AES-CTR streaming primitive with block-aligned seek
 */

use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use ctr::Ctr128BE;

use crate::error::{OssError, Result};

/// AES block length; all counter math is in these units
pub const BLOCK_LEN: usize = 16;
/// Content key length (AES-128)
pub const KEY_LEN: usize = 16;
/// IV length; interpreted as a 128-bit big-endian counter
pub const IV_LEN: usize = 16;

type Aes128Ctr = Ctr128BE<Aes128>;

/// AES-128-CTR keystream over object content.
///
/// The 16-byte IV is the initial counter value; byte offset `o` in the
/// object maps to counter `iv + o/16`. A part encrypted at file offset
/// `o` therefore produces the same ciphertext a single-stream pass over
/// the whole object would, which is what makes ranged reads and
/// multipart writes composable.
pub struct AesCtrCipher {
    inner: Aes128Ctr,
}

impl AesCtrCipher {
    pub fn new(key: &[u8], iv: &[u8]) -> Result<Self> {
        if key.len() != KEY_LEN {
            return Err(OssError::Crypto(format!(
                "content key must be {} bytes, got {}",
                KEY_LEN,
                key.len()
            )));
        }
        if iv.len() != IV_LEN {
            return Err(OssError::Crypto(format!(
                "IV must be {} bytes, got {}",
                IV_LEN,
                iv.len()
            )));
        }
        let inner = Aes128Ctr::new_from_slices(key, iv)
            .map_err(|e| OssError::Crypto(format!("cipher init failed: {}", e)))?;
        Ok(Self { inner })
    }

    /// Position the keystream at an absolute byte offset.
    ///
    /// The offset must be block-aligned; callers align a requested range
    /// down and discard the prefix after decryption.
    pub fn seek(&mut self, byte_offset: u64) -> Result<()> {
        if byte_offset % BLOCK_LEN as u64 != 0 {
            return Err(OssError::Client(format!(
                "cipher seek offset {} is not a multiple of {}",
                byte_offset, BLOCK_LEN
            )));
        }
        self.inner
            .try_seek(byte_offset)
            .map_err(|e| OssError::Crypto(format!("cipher seek failed: {}", e)))
    }

    /// XOR the keystream into `data` in place (encrypts and decrypts)
    pub fn apply(&mut self, data: &mut [u8]) {
        self.inner.apply_keystream(data);
    }
}

/// Largest block boundary not past `offset`
pub fn align_down(offset: u64) -> u64 {
    offset - offset % BLOCK_LEN as u64
}
