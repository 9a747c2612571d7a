//! ARC4 stream cipher construction for encrypted chunks.

use cipher::consts::U32;
use cipher::{KeyInit, StreamCipher};
use rc4::Rc4;

use crate::Result;

/// Build the ARC4 cipher for one chunk.
///
/// The RC4 key is `key ‖ iv` zero-padded to 32 bytes, where `iv` already
/// has the chunk index folded into its low bytes.
pub fn init_arc4(key: &[u8; 16], iv: &[u8; 8], chunk_index: u64) -> Rc4<U32> {
    let mut nonce = *iv;
    for (n, i) in nonce.iter_mut().zip(chunk_index.to_le_bytes()) {
        *n ^= i;
    }

    let mut rc4_key = [0u8; 32];
    rc4_key[..16].copy_from_slice(key);
    rc4_key[16..24].copy_from_slice(&nonce);

    Rc4::new(&rc4_key.into())
}

/// Decrypt a chunk payload in-place with ARC4.
pub fn decrypt_arc4(data: &mut [u8], key: &[u8; 16], iv: &[u8; 8], chunk_index: u64) -> Result<()> {
    let mut cipher = init_arc4(key, iv, chunk_index);
    cipher.try_apply_keystream(data)?;
    Ok(())
}

/// Encrypt a buffer in-place; ARC4 is symmetric. Used by tests and tooling.
pub fn encrypt_arc4(data: &mut [u8], key: &[u8; 16], iv: &[u8; 8], chunk_index: u64) -> Result<()> {
    decrypt_arc4(data, key, iv, chunk_index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let key = [0x11u8; 16];
        let iv = [0x0A, 0x0B, 0x0C, 0x0D, 0, 0, 0, 0];
        let plaintext = *b"arc4 payload bytes";

        let mut buf = plaintext;
        encrypt_arc4(&mut buf, &key, &iv, 3).unwrap();
        assert_ne!(buf, plaintext);

        decrypt_arc4(&mut buf, &key, &iv, 3).unwrap();
        assert_eq!(buf, plaintext);
    }

    #[test]
    fn different_keys_differ() {
        let iv = [0u8; 8];
        let plaintext = *b"payload";

        let mut a = plaintext;
        let mut b = plaintext;
        encrypt_arc4(&mut a, &[0x01; 16], &iv, 0).unwrap();
        encrypt_arc4(&mut b, &[0x02; 16], &iv, 0).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn empty_buffer() {
        let mut empty: [u8; 0] = [];
        decrypt_arc4(&mut empty, &[0x01; 16], &[0u8; 8], 0).unwrap();
    }
}
