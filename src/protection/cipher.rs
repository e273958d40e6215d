//! Block-oriented AES-256 content encryption
//!
//! Content is split into cipher blocks of [`CipherMode::block_size`] bytes.
//! Each cipher block is an independent AES-CBC chain whose IV is derived from
//! the block's byte offset, so any aligned range can be encrypted or decrypted
//! without touching the rest of the content:
//!
//! ```text
//! IV(offset) = AES-ECB(K, LE64(offset) || 0^8)
//! ```
//!
//! [`CipherMode::Ecb`] encrypts 16-byte blocks independently with no IV. Only
//! [`CipherMode::Cbc4k`] pads (PKCS#7, final chunk only); every other mode
//! expects the caller to supply multiples of 16 bytes.
//!
//! This layout is specific to this crate and is not interoperable with other
//! protection SDKs.

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes256;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{MipError, Result};

/// AES block size in bytes
pub const AES_BLOCK_SIZE: usize = 16;

/// Content key length in bytes
pub const CONTENT_KEY_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CipherMode {
    #[default]
    Cbc4k,
    Ecb,
    Cbc512NoPadding,
    Cbc4kNoPadding,
}

impl CipherMode {
    pub fn block_size(self) -> usize {
        match self {
            CipherMode::Cbc4k | CipherMode::Cbc4kNoPadding => 4096,
            CipherMode::Cbc512NoPadding => 512,
            CipherMode::Ecb => AES_BLOCK_SIZE,
        }
    }

    pub fn is_padded(self) -> bool {
        self == CipherMode::Cbc4k
    }

    /// ECB is kept only for content published by old clients
    pub fn is_deprecated(self) -> bool {
        self == CipherMode::Ecb
    }

    /// Size of `unprotected_size` bytes once encrypted
    pub fn protected_content_length(self, unprotected_size: u64, includes_final_block: bool) -> u64 {
        if self.is_padded() && includes_final_block {
            (unprotected_size / AES_BLOCK_SIZE as u64 + 1) * AES_BLOCK_SIZE as u64
        } else {
            unprotected_size
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CipherMode::Cbc4k => "CBC4K",
            CipherMode::Ecb => "ECB",
            CipherMode::Cbc512NoPadding => "CBC512NOPADDING",
            CipherMode::Cbc4kNoPadding => "CBC4KNOPADDING",
        }
    }
}

impl std::fmt::Display for CipherMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CipherMode {
    type Err = MipError;

    fn from_str(s: &str) -> Result<Self> {
        [
            CipherMode::Cbc4k,
            CipherMode::Ecb,
            CipherMode::Cbc512NoPadding,
            CipherMode::Cbc4kNoPadding,
        ]
        .into_iter()
        .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
        .ok_or_else(|| MipError::bad_input(format!("Unknown cipher mode: {}", s)))
    }
}

/// AES-256 content key, zeroized on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ContentKey([u8; CONTENT_KEY_SIZE]);

impl ContentKey {
    pub fn generate() -> Self {
        let mut key = [0u8; CONTENT_KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        ContentKey(key)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != CONTENT_KEY_SIZE {
            return Err(MipError::bad_input(format!(
                "Content key must be {} bytes, got {}",
                CONTENT_KEY_SIZE,
                bytes.len()
            )));
        }
        let mut key = [0u8; CONTENT_KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(ContentKey(key))
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ContentKey(..)")
    }
}

/// Low-level cipher behind a protection handler
pub trait CryptoProvider: Send + Sync {
    fn cipher_mode(&self) -> CipherMode;

    fn block_size(&self) -> usize {
        self.cipher_mode().block_size()
    }

    fn protected_content_length(&self, unprotected_size: u64, includes_final_block: bool) -> u64 {
        self.cipher_mode()
            .protected_content_length(unprotected_size, includes_final_block)
    }

    /// Encrypt `input` found at `offset` of the plaintext; returns bytes written
    fn encrypt(&self, offset: u64, input: &[u8], output: &mut [u8], is_final: bool) -> Result<usize>;

    /// Decrypt `input` found at `offset` of the ciphertext; returns bytes written
    fn decrypt(&self, offset: u64, input: &[u8], output: &mut [u8], is_final: bool) -> Result<usize>;
}

/// [`CryptoProvider`] over the `aes` block cipher
pub struct AesCryptoProvider {
    mode: CipherMode,
    cipher: Aes256,
}

impl AesCryptoProvider {
    pub fn new(key: &ContentKey, mode: CipherMode) -> Result<Self> {
        let cipher = Aes256::new_from_slice(key.as_slice())
            .map_err(|_| MipError::internal("Invalid AES-256 key length"))?;
        Ok(Self { mode, cipher })
    }

    fn segment_iv(&self, offset: u64) -> [u8; AES_BLOCK_SIZE] {
        let mut iv = [0u8; AES_BLOCK_SIZE];
        iv[..8].copy_from_slice(&offset.to_le_bytes());
        self.cipher
            .encrypt_block(GenericArray::from_mut_slice(&mut iv));
        iv
    }

    /// Encrypt one cipher block in place
    fn encrypt_segment(&self, offset: u64, data: &mut [u8]) {
        if self.mode == CipherMode::Ecb {
            for chunk in data.chunks_exact_mut(AES_BLOCK_SIZE) {
                self.cipher
                    .encrypt_block(GenericArray::from_mut_slice(chunk));
            }
            return;
        }
        let mut previous = self.segment_iv(offset);
        for chunk in data.chunks_exact_mut(AES_BLOCK_SIZE) {
            for (byte, mask) in chunk.iter_mut().zip(previous.iter()) {
                *byte ^= mask;
            }
            self.cipher
                .encrypt_block(GenericArray::from_mut_slice(chunk));
            previous.copy_from_slice(chunk);
        }
    }

    /// Decrypt one cipher block in place
    fn decrypt_segment(&self, offset: u64, data: &mut [u8]) {
        if self.mode == CipherMode::Ecb {
            for chunk in data.chunks_exact_mut(AES_BLOCK_SIZE) {
                self.cipher
                    .decrypt_block(GenericArray::from_mut_slice(chunk));
            }
            return;
        }
        let mut previous = self.segment_iv(offset);
        for chunk in data.chunks_exact_mut(AES_BLOCK_SIZE) {
            let mut saved = [0u8; AES_BLOCK_SIZE];
            saved.copy_from_slice(chunk);
            self.cipher
                .decrypt_block(GenericArray::from_mut_slice(chunk));
            for (byte, mask) in chunk.iter_mut().zip(previous.iter()) {
                *byte ^= mask;
            }
            previous = saved;
        }
    }

    fn check_alignment(&self, offset: u64, input_len: usize, is_final: bool) -> Result<()> {
        let block_size = self.mode.block_size();
        if offset % block_size as u64 != 0 {
            return Err(MipError::bad_input(format!(
                "Offset {} is not aligned to the {} byte cipher block",
                offset, block_size
            )));
        }
        if !is_final && input_len % block_size != 0 {
            return Err(MipError::bad_input(format!(
                "Non-final chunk of {} bytes is not a whole number of {} byte blocks",
                input_len, block_size
            )));
        }
        segment_offset(offset, input_len)?;
        Ok(())
    }
}

/// Content position `delta` bytes past `offset`
fn segment_offset(offset: u64, delta: usize) -> Result<u64> {
    u64::try_from(delta)
        .ok()
        .and_then(|delta| offset.checked_add(delta))
        .ok_or_else(|| {
            MipError::bad_input(format!(
                "Chunk of {} bytes at offset {} runs past the end of addressable content",
                delta, offset
            ))
        })
}

impl CryptoProvider for AesCryptoProvider {
    fn cipher_mode(&self) -> CipherMode {
        self.mode
    }

    fn encrypt(&self, offset: u64, input: &[u8], output: &mut [u8], is_final: bool) -> Result<usize> {
        self.check_alignment(offset, input.len(), is_final)?;
        let padded = self.mode.is_padded() && is_final;
        if !padded && input.len() % AES_BLOCK_SIZE != 0 {
            return Err(MipError::bad_input(format!(
                "{} requires input in multiples of {} bytes, got {}",
                self.mode,
                AES_BLOCK_SIZE,
                input.len()
            )));
        }

        let required = self
            .mode
            .protected_content_length(input.len() as u64, is_final) as usize;
        if output.len() < required {
            return Err(MipError::insufficient_buffer(format!(
                "Output buffer holds {} bytes, {} required",
                output.len(),
                required
            )));
        }

        let block_size = self.mode.block_size();
        let whole = if padded {
            (input.len() / block_size) * block_size
        } else {
            input.len()
        };

        output[..whole].copy_from_slice(&input[..whole]);
        for (index, segment) in output[..whole].chunks_mut(block_size).enumerate() {
            self.encrypt_segment(segment_offset(offset, index * block_size)?, segment);
        }

        if padded {
            let tail = &input[whole..];
            let pad = AES_BLOCK_SIZE - tail.len() % AES_BLOCK_SIZE;
            let target = &mut output[whole..required];
            target[..tail.len()].copy_from_slice(tail);
            target[tail.len()..].fill(pad as u8);
            self.encrypt_segment(segment_offset(offset, whole)?, target);
        }

        Ok(required)
    }

    fn decrypt(&self, offset: u64, input: &[u8], output: &mut [u8], is_final: bool) -> Result<usize> {
        self.check_alignment(offset, input.len(), is_final)?;
        if input.len() % AES_BLOCK_SIZE != 0 {
            return Err(MipError::bad_input(format!(
                "Ciphertext length {} is not a multiple of {}",
                input.len(),
                AES_BLOCK_SIZE
            )));
        }
        let padded = self.mode.is_padded() && is_final;
        if padded && input.is_empty() {
            return Err(MipError::bad_input("Final chunk is missing its padding block"));
        }

        let block_size = self.mode.block_size();
        let last_start = if padded {
            ((input.len() - 1) / block_size) * block_size
        } else {
            input.len()
        };
        if output.len() < last_start {
            return Err(MipError::insufficient_buffer(format!(
                "Output buffer holds {} bytes, at least {} required",
                output.len(),
                last_start
            )));
        }

        output[..last_start].copy_from_slice(&input[..last_start]);
        for (index, segment) in output[..last_start].chunks_mut(block_size).enumerate() {
            self.decrypt_segment(segment_offset(offset, index * block_size)?, segment);
        }
        if !padded {
            return Ok(last_start);
        }

        let mut tail = input[last_start..].to_vec();
        self.decrypt_segment(segment_offset(offset, last_start)?, &mut tail);
        let pad = tail.last().copied().unwrap_or(0) as usize;
        if pad == 0
            || pad > AES_BLOCK_SIZE
            || pad > tail.len()
            || tail[tail.len() - pad..].iter().any(|b| *b as usize != pad)
        {
            tail.zeroize();
            return Err(MipError::bad_input("Invalid padding in final cipher block"));
        }
        let plain = tail.len() - pad;
        let total = last_start + plain;
        if output.len() < total {
            tail.zeroize();
            return Err(MipError::insufficient_buffer(format!(
                "Output buffer holds {} bytes, {} required",
                output.len(),
                total
            )));
        }
        output[last_start..total].copy_from_slice(&tail[..plain]);
        tail.zeroize();
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const MODES: [CipherMode; 4] = [
        CipherMode::Cbc4k,
        CipherMode::Ecb,
        CipherMode::Cbc512NoPadding,
        CipherMode::Cbc4kNoPadding,
    ];

    fn provider(mode: CipherMode) -> AesCryptoProvider {
        AesCryptoProvider::new(&ContentKey::from_slice(&[7u8; 32]).unwrap(), mode).unwrap()
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    fn encrypt_all(p: &AesCryptoProvider, plain: &[u8]) -> Result<Vec<u8>> {
        let mut out = vec![0u8; p.protected_content_length(plain.len() as u64, true) as usize];
        let written = p.encrypt(0, plain, &mut out, true)?;
        out.truncate(written);
        Ok(out)
    }

    fn decrypt_all(p: &AesCryptoProvider, cipher: &[u8]) -> Result<Vec<u8>> {
        let mut out = vec![0u8; cipher.len()];
        let written = p.decrypt(0, cipher, &mut out, true)?;
        out.truncate(written);
        Ok(out)
    }

    #[test]
    fn test_protected_length_never_shrinks() {
        for mode in MODES {
            for n in [0u64, 1, 15, 16, 17, 4095, 4096, 10_000] {
                assert!(mode.protected_content_length(n, true) >= n);
                assert_eq!(mode.protected_content_length(n, false), n);
            }
        }
        let cbc = CipherMode::Cbc4k;
        assert_eq!(cbc.protected_content_length(0, true), 16);
        assert_eq!(cbc.protected_content_length(15, true), 16);
        assert_eq!(cbc.protected_content_length(16, true), 32);
        assert_eq!(cbc.protected_content_length(4096, true), 4112);
        for n in 0..100u64 {
            let extra = cbc.protected_content_length(n, true) - n;
            assert!((1..=16).contains(&extra));
        }
    }

    #[test]
    fn test_roundtrip_every_mode() -> Result<()> {
        for mode in MODES {
            let p = provider(mode);
            let len = if mode.is_padded() { 10_001 } else { 8192 + 512 + 48 };
            let plain = sample(len);
            let cipher = encrypt_all(&p, &plain)?;
            assert_ne!(&cipher[..plain.len().min(cipher.len())], &plain[..]);
            assert_eq!(decrypt_all(&p, &cipher)?, plain, "{}", mode);
        }
        Ok(())
    }

    #[test]
    fn test_cbc4k_padding_edges() -> Result<()> {
        let p = provider(CipherMode::Cbc4k);
        for len in [0usize, 1, 16, 4095, 4096, 4097, 8192] {
            let plain = sample(len);
            let cipher = encrypt_all(&p, &plain)?;
            assert_eq!(cipher.len() as u64, p.protected_content_length(len as u64, true));
            assert_eq!(decrypt_all(&p, &cipher)?, plain, "len {}", len);
        }
        Ok(())
    }

    #[test]
    fn test_chunked_encryption_matches_whole() -> Result<()> {
        let p = provider(CipherMode::Cbc4k);
        let plain = sample(3 * 4096 + 100);
        let whole = encrypt_all(&p, &plain)?;

        let mut chunked = Vec::new();
        let mut first = vec![0u8; 8192];
        p.encrypt(0, &plain[..8192], &mut first, false)?;
        chunked.extend_from_slice(&first);
        let rest = &plain[8192..];
        let mut last = vec![0u8; p.protected_content_length(rest.len() as u64, true) as usize];
        let n = p.encrypt(8192, rest, &mut last, true)?;
        chunked.extend_from_slice(&last[..n]);
        assert_eq!(chunked, whole);

        let mut middle = vec![0u8; 4096];
        p.decrypt(4096, &whole[4096..8192], &mut middle, false)?;
        assert_eq!(&middle[..], &plain[4096..8192]);
        Ok(())
    }

    #[test]
    fn test_identical_blocks_at_different_offsets_differ() -> Result<()> {
        let p = provider(CipherMode::Cbc4kNoPadding);
        let plain = vec![0xAAu8; 8192];
        let cipher = encrypt_all(&p, &plain)?;
        assert_ne!(&cipher[..4096], &cipher[4096..]);
        Ok(())
    }

    #[test]
    fn test_misaligned_offset_and_partial_chunks_rejected() {
        let p = provider(CipherMode::Cbc4k);
        let mut out = vec![0u8; 8192];
        let err = p.encrypt(100, &[0u8; 4096], &mut out, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadInput);
        let err = p.encrypt(0, &[0u8; 100], &mut out, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadInput);

        let p = provider(CipherMode::Cbc512NoPadding);
        let err = p.encrypt(0, &[0u8; 100], &mut out, true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadInput);
    }

    #[test]
    fn test_offset_near_end_of_range_rejected() {
        let p = provider(CipherMode::Ecb);
        let mut out = vec![0u8; 64];
        let offset = u64::MAX - 15;
        let err = p.encrypt(offset, &[0u8; 32], &mut out, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadInput);
        let err = p.decrypt(offset, &[0u8; 32], &mut out, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadInput);

        let p = provider(CipherMode::Cbc4k);
        let offset = u64::MAX - 4095;
        let err = p.encrypt(offset, &[0u8; 4096], &mut vec![0u8; 8192], true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadInput);
    }

    #[test]
    fn test_small_output_is_insufficient_buffer() {
        let p = provider(CipherMode::Cbc4k);
        let mut out = vec![0u8; 16];
        let err = p.encrypt(0, &[1u8; 16], &mut out, true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientBuffer);
        assert!(err.is_a(ErrorKind::BadInput));
    }

    #[test]
    fn test_corrupt_padding_rejected() -> Result<()> {
        let p = provider(CipherMode::Cbc4k);
        let mut cipher = encrypt_all(&p, b"attack at dawn")?;
        let last = cipher.len() - 1;
        cipher[last] ^= 0x01;
        let err = decrypt_all(&p, &cipher).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadInput);
        Ok(())
    }

    #[test]
    fn test_wrong_key_length() {
        assert!(ContentKey::from_slice(&[0u8; 16]).is_err());
    }
}
