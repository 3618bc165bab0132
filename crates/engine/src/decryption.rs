//! AES-128 CBC segment decryption.
//!
//! Segments are decrypted whole with no padding removed; the ciphertext
//! must already be a multiple of the block size.

use aes::Aes128;
use bytes::Bytes;
use cipher::block_padding::NoPadding;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hls::MediaKey;

use crate::{EngineError, Result};

type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes128CbcEnc = cbc::Encryptor<Aes128>;

const BLOCK_SIZE: usize = 16;

/// IV used when the key declaration has none: the media sequence number as a
/// big-endian 128-bit integer.
pub fn derive_iv(sequence: u64) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[8..].copy_from_slice(&sequence.to_be_bytes());
    iv
}

fn iv_for(key: &MediaKey, sequence: u64) -> [u8; 16] {
    key.iv.unwrap_or_else(|| derive_iv(sequence))
}

pub fn decrypt_segment(data: Bytes, key: &MediaKey, sequence: u64) -> Result<Bytes> {
    if data.len() % BLOCK_SIZE != 0 {
        return Err(EngineError::UnalignedCiphertext(data.len()));
    }
    let iv = iv_for(key, sequence);
    let mut buffer = data.to_vec();
    Aes128CbcDec::new(&key.key.into(), &iv.into())
        .decrypt_padded_mut::<NoPadding>(&mut buffer)
        .map_err(|_| EngineError::UnalignedCiphertext(data.len()))?;
    Ok(Bytes::from(buffer))
}

/// Inverse of [`decrypt_segment`]; `plaintext` must be block aligned.
pub fn encrypt_segment(plaintext: &[u8], key: &MediaKey, sequence: u64) -> Result<Bytes> {
    if plaintext.len() % BLOCK_SIZE != 0 {
        return Err(EngineError::UnalignedCiphertext(plaintext.len()));
    }
    let iv = iv_for(key, sequence);
    let mut buffer = plaintext.to_vec();
    let len = buffer.len();
    Aes128CbcEnc::new(&key.key.into(), &iv.into())
        .encrypt_padded_mut::<NoPadding>(&mut buffer, len)
        .map_err(|_| EngineError::UnalignedCiphertext(len))?;
    Ok(Bytes::from(buffer))
}

#[cfg(test)]
mod tests {
    use hls::KeyMethod;

    use super::*;

    fn key(iv: Option<[u8; 16]>) -> MediaKey {
        MediaKey {
            method: KeyMethod::Aes128,
            key: *b"0123456789abcdef",
            iv,
        }
    }

    #[test]
    fn derives_iv_from_sequence() {
        let iv = derive_iv(0x0102);
        assert_eq!(iv[..14], [0; 14]);
        assert_eq!(iv[14..], [0x01, 0x02]);
    }

    #[test]
    fn decrypt_then_encrypt_reproduces_ciphertext() {
        let key = key(Some(hls::parse_iv("0x000102030405060708090a0b0c0d0e0f").unwrap()));
        let ciphertext: Vec<u8> = (0..=255u8).cycle().take(188 * 16).collect();

        let plaintext = decrypt_segment(Bytes::from(ciphertext.clone()), &key, 7).unwrap();
        assert_eq!(plaintext.len(), ciphertext.len());
        assert_ne!(&plaintext[..], &ciphertext[..]);

        let again = encrypt_segment(&plaintext, &key, 7).unwrap();
        assert_eq!(&again[..], &ciphertext[..]);
    }

    #[test]
    fn sequence_iv_only_applies_without_explicit_iv() {
        let plaintext = [0x47u8; 64];
        let derived = key(None);
        let a = encrypt_segment(&plaintext, &derived, 1).unwrap();
        let b = encrypt_segment(&plaintext, &derived, 2).unwrap();
        assert_ne!(a, b);
        assert_eq!(&decrypt_segment(a, &derived, 1).unwrap()[..], &plaintext[..]);

        let explicit = key(Some([9; 16]));
        assert_eq!(
            encrypt_segment(&plaintext, &explicit, 1).unwrap(),
            encrypt_segment(&plaintext, &explicit, 2).unwrap()
        );
    }

    #[test]
    fn rejects_unaligned_ciphertext() {
        let err = decrypt_segment(Bytes::from_static(&[0; 30]), &key(None), 0).unwrap_err();
        assert!(matches!(err, EngineError::UnalignedCiphertext(30)));
    }
}
