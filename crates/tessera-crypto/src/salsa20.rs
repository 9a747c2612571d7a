//! Salsa20 stream cipher construction for encrypted chunks.

use cipher::{KeyIvInit, StreamCipher};
use salsa20::Salsa20;

use crate::Result;

/// Build the Salsa20 cipher for one chunk.
///
/// The 16-byte content key is doubled to the 32 bytes Salsa20 wants, and
/// the chunk index is XORed into the low bytes of the 8-byte IV so every
/// chunk of a file gets a distinct keystream.
pub fn init_salsa20(key: &[u8; 16], iv: &[u8; 8], chunk_index: u64) -> Salsa20 {
    let mut extended_key = [0u8; 32];
    extended_key[..16].copy_from_slice(key);
    extended_key[16..].copy_from_slice(key);

    let mut nonce = *iv;
    for (n, i) in nonce.iter_mut().zip(chunk_index.to_le_bytes()) {
        *n ^= i;
    }

    Salsa20::new(&extended_key.into(), &nonce.into())
}

/// Decrypt a chunk payload in-place with Salsa20.
pub fn decrypt_salsa20(
    data: &mut [u8],
    key: &[u8; 16],
    iv: &[u8; 8],
    chunk_index: u64,
) -> Result<()> {
    let mut cipher = init_salsa20(key, iv, chunk_index);
    cipher.try_apply_keystream(data)?;
    Ok(())
}

/// Encrypt a buffer in-place; Salsa20 is symmetric, so this is
/// [`decrypt_salsa20`] under another name. Used by tests and tooling.
pub fn encrypt_salsa20(
    data: &mut [u8],
    key: &[u8; 16],
    iv: &[u8; 8],
    chunk_index: u64,
) -> Result<()> {
    decrypt_salsa20(data, key, iv, chunk_index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let key = [0x01u8; 16];
        let iv = [0x02, 0x03, 0x04, 0x05, 0, 0, 0, 0];
        let plaintext = *b"the quick brown fox";

        let mut buf = plaintext;
        encrypt_salsa20(&mut buf, &key, &iv, 0).unwrap();
        assert_ne!(buf, plaintext);

        decrypt_salsa20(&mut buf, &key, &iv, 0).unwrap();
        assert_eq!(buf, plaintext);
    }

    #[test]
    fn chunk_index_changes_keystream() {
        let key = [0xAAu8; 16];
        let iv = [0x10, 0x20, 0x30, 0x40, 0, 0, 0, 0];
        let plaintext = *b"same bytes";

        let mut a = plaintext;
        let mut b = plaintext;
        encrypt_salsa20(&mut a, &key, &iv, 0).unwrap();
        encrypt_salsa20(&mut b, &key, &iv, 1).unwrap();
        assert_ne!(a, b);

        decrypt_salsa20(&mut a, &key, &iv, 0).unwrap();
        decrypt_salsa20(&mut b, &key, &iv, 1).unwrap();
        assert_eq!(a, plaintext);
        assert_eq!(b, plaintext);
    }
}
