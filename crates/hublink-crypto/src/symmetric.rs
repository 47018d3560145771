//! Session encryption.
//!
//! AES-256-CBC over a buffer laid out as:
//!
//! ```text
//! [u32 LE plaintext length][plaintext][zero padding to a 16-byte boundary]
//! ```
//!
//! The embedded length replaces PKCS#7: decryption reads it back and slices
//! the plaintext out, ignoring whatever padding follows.

use aes::{
    Aes256,
    cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::NoPadding},
};

use crate::error::CryptoError;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Session key size in bytes.
pub const KEY_SIZE: usize = 32;

/// Initialization vector size in bytes.
pub const IV_SIZE: usize = 16;

const BLOCK_SIZE: usize = 16;

const LENGTH_PREFIX: usize = 4;

/// Round `len` up to the block size.
///
/// A length that is already a multiple of 16 is returned unchanged.
pub fn padded_size(len: usize) -> usize {
    let size = (len / BLOCK_SIZE) * BLOCK_SIZE;
    if size < len { size + BLOCK_SIZE } else { size }
}

/// Encrypt `plaintext` under `key` with the caller-chosen `iv`.
pub fn encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    check_key_and_iv(key, iv)?;
    let len = u32::try_from(plaintext.len())
        .map_err(|_| CryptoError::PlaintextTooLarge { len: plaintext.len() })?;

    let mut buffer = vec![0u8; padded_size(LENGTH_PREFIX + plaintext.len())];
    buffer[..LENGTH_PREFIX].copy_from_slice(&len.to_le_bytes());
    buffer[LENGTH_PREFIX..LENGTH_PREFIX + plaintext.len()].copy_from_slice(plaintext);

    let total = buffer.len();
    Aes256CbcEnc::new_from_slices(key, iv)
        .map_err(|_| CryptoError::InvalidKeyLength { expected: KEY_SIZE, actual: key.len() })?
        .encrypt_padded_mut::<NoPadding>(&mut buffer, total)
        .map_err(|_| CryptoError::InvalidCiphertext { len: total })?;

    Ok(buffer)
}

/// Decrypt a ciphertext produced by [`encrypt`].
pub fn decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    check_key_and_iv(key, iv)?;
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::InvalidCiphertext { len: ciphertext.len() });
    }

    let mut buffer = ciphertext.to_vec();
    Aes256CbcDec::new_from_slices(key, iv)
        .map_err(|_| CryptoError::InvalidKeyLength { expected: KEY_SIZE, actual: key.len() })?
        .decrypt_padded_mut::<NoPadding>(&mut buffer)
        .map_err(|_| CryptoError::InvalidCiphertext { len: ciphertext.len() })?;

    let mut prefix = [0u8; LENGTH_PREFIX];
    prefix.copy_from_slice(&buffer[..LENGTH_PREFIX]);
    let size = u32::from_le_bytes(prefix) as usize;

    let available = buffer.len() - LENGTH_PREFIX;
    if size > available {
        return Err(CryptoError::LengthOutOfBounds { size, available });
    }

    buffer.truncate(LENGTH_PREFIX + size);
    buffer.drain(..LENGTH_PREFIX);
    Ok(buffer)
}

fn check_key_and_iv(key: &[u8], iv: &[u8]) -> Result<(), CryptoError> {
    if key.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKeyLength { expected: KEY_SIZE, actual: key.len() });
    }
    if iv.len() != IV_SIZE {
        return Err(CryptoError::InvalidIvLength { expected: IV_SIZE, actual: iv.len() });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const KEY: [u8; KEY_SIZE] = [0x42; KEY_SIZE];
    const IV: [u8; IV_SIZE] = [0x07; IV_SIZE];

    #[test]
    fn padded_size_keeps_exact_multiples() {
        assert_eq!(padded_size(0), 0);
        assert_eq!(padded_size(1), 16);
        assert_eq!(padded_size(15), 16);
        assert_eq!(padded_size(16), 16);
        assert_eq!(padded_size(17), 32);
        assert_eq!(padded_size(32), 32);
        assert_eq!(padded_size(33), 48);
    }

    #[test]
    fn ciphertext_length_includes_length_prefix() {
        // 12 + 4 fills exactly one block
        assert_eq!(encrypt(&KEY, &IV, &[1; 12]).expect("encrypt").len(), 16);
        // 13 + 4 spills into a second block
        assert_eq!(encrypt(&KEY, &IV, &[1; 13]).expect("encrypt").len(), 32);
        assert_eq!(encrypt(&KEY, &IV, &[]).expect("encrypt").len(), 16);
    }

    #[test]
    fn block_aligned_plaintexts_round_trip() {
        for len in [0usize, 12, 16, 28, 32, 64, 4096] {
            let plaintext: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let ciphertext = encrypt(&KEY, &IV, &plaintext).expect("encrypt");
            assert_eq!(decrypt(&KEY, &IV, &ciphertext).expect("decrypt"), plaintext);
        }
    }

    #[test]
    fn encryption_is_deterministic_for_fixed_iv() {
        let a = encrypt(&KEY, &IV, b"same input").expect("encrypt");
        let b = encrypt(&KEY, &IV, b"same input").expect("encrypt");
        let c = encrypt(&KEY, &[0x08; IV_SIZE], b"same input").expect("encrypt");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn wrong_key_length_is_rejected() {
        let result = encrypt(&[0u8; 16], &IV, b"data");
        assert_eq!(result, Err(CryptoError::InvalidKeyLength { expected: 32, actual: 16 }));
    }

    #[test]
    fn wrong_iv_length_is_rejected() {
        let result = decrypt(&KEY, &[0u8; 12], &[0u8; 16]);
        assert_eq!(result, Err(CryptoError::InvalidIvLength { expected: 16, actual: 12 }));
    }

    #[test]
    fn partial_block_is_rejected() {
        assert_eq!(decrypt(&KEY, &IV, &[0u8; 20]), Err(CryptoError::InvalidCiphertext { len: 20 }));
        assert_eq!(decrypt(&KEY, &IV, &[]), Err(CryptoError::InvalidCiphertext { len: 0 }));
    }

    #[test]
    fn oversized_embedded_length_is_rejected() {
        let mut block = [0u8; 16];
        block[..4].copy_from_slice(&100u32.to_le_bytes());
        Aes256CbcEnc::new_from_slices(&KEY, &IV)
            .expect("cipher")
            .encrypt_padded_mut::<NoPadding>(&mut block, 16)
            .expect("encrypt");

        let result = decrypt(&KEY, &IV, &block);
        assert_eq!(result, Err(CryptoError::LengthOutOfBounds { size: 100, available: 12 }));
    }

    proptest! {
        #[test]
        fn prop_round_trip(
            key in prop::array::uniform32(any::<u8>()),
            iv in prop::array::uniform16(any::<u8>()),
            plaintext in prop::collection::vec(any::<u8>(), 0..4096),
        ) {
            let ciphertext = encrypt(&key, &iv, &plaintext).expect("encrypt");
            prop_assert_eq!(ciphertext.len(), padded_size(plaintext.len() + 4));
            prop_assert_eq!(decrypt(&key, &iv, &ciphertext).expect("decrypt"), plaintext);
        }

        #[test]
        fn prop_padded_size_is_smallest_block_multiple(n in 0usize..100_000) {
            let size = padded_size(n);
            prop_assert_eq!(size % 16, 0);
            prop_assert!(size >= n);
            prop_assert!(size < n + 16);
        }
    }
}
