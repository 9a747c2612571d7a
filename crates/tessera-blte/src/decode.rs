//! BLTE decoding: chunk iteration, digest checks, and the per-mode
//! payload transforms.

use flate2::read::ZlibDecoder;
use std::io::{Cursor, Read};
use tracing::{trace, warn};

use crate::{BlteHeader, Error, Result};
use tessera_crypto::{KeyService, arc4::decrypt_arc4, salsa20::decrypt_salsa20};

/// Chunk mode bytes.
const MODE_RAW: u8 = b'N';
const MODE_ZLIB: u8 = b'Z';
const MODE_FRAME: u8 = b'F';
const MODE_ENCRYPTED: u8 = b'E';

/// Encryption type bytes inside an `E` chunk.
const ENC_SALSA20: u8 = b'S';
const ENC_ARC4: u8 = b'A';

/// Decode a complete BLTE blob into the original bytes.
///
/// `expected_decoded_size` is the caller's knowledge of the output length
/// (from the encoding table); pass 0 when unknown. For framed blobs each
/// chunk's MD5 is verified against its table entry before decoding; for
/// unframed blobs the expected size is the only check available.
///
/// Decoding is a pure function of the input: the same blob and size
/// always produce the same bytes or the same error.
pub fn decode(
    data: &[u8],
    expected_decoded_size: u64,
    keys: Option<&KeyService>,
) -> Result<Vec<u8>> {
    let header = BlteHeader::parse(&mut Cursor::new(data))?;

    let mut out = Vec::with_capacity(if header.is_unframed() {
        expected_decoded_size as usize
    } else {
        header.total_decoded_size() as usize
    });

    if header.is_unframed() {
        let chunk = &data[header.data_offset()..];
        out.extend_from_slice(&decode_chunk(chunk, 0, keys)?);
    } else {
        let mut offset = header.data_offset();
        for (index, info) in header.chunks().iter().enumerate() {
            let end = offset + info.encoded_size as usize;
            if end > data.len() {
                return Err(Error::Truncated {
                    chunk: index,
                    expected: info.encoded_size as usize,
                    actual: data.len().saturating_sub(offset),
                });
            }
            let chunk = &data[offset..end];
            offset = end;

            // The digest covers the encoded chunk, mode byte included.
            let actual = md5::compute(chunk).0;
            if actual != info.checksum {
                return Err(Error::CorruptChunk {
                    chunk: index,
                    expected: hex::encode(info.checksum),
                    actual: hex::encode(actual),
                });
            }

            out.extend_from_slice(&decode_chunk(chunk, index as u64, keys)?);
        }
    }

    if expected_decoded_size != 0 && out.len() as u64 != expected_decoded_size {
        return Err(Error::DecodedSizeMismatch {
            expected: expected_decoded_size,
            actual: out.len() as u64,
        });
    }

    Ok(out)
}

/// Decode one mode-prefixed chunk.
fn decode_chunk(chunk: &[u8], index: u64, keys: Option<&KeyService>) -> Result<Vec<u8>> {
    let (&mode, payload) = chunk.split_first().ok_or(Error::Truncated {
        chunk: index as usize,
        expected: 1,
        actual: 0,
    })?;

    trace!("chunk {index}: mode {:?}", mode as char);

    match mode {
        MODE_RAW => Ok(payload.to_vec()),
        MODE_ZLIB => {
            let mut decoder = ZlibDecoder::new(payload);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| Error::Decompress(format!("zlib: {e}")))?;
            Ok(out)
        }
        // The payload is a complete nested blob; its own table carries the
        // integrity data, so no outer size hint is passed down.
        MODE_FRAME => decode(payload, 0, keys),
        MODE_ENCRYPTED => decode_encrypted(payload, index, keys),
        other => Err(Error::UnknownMode(other)),
    }
}

/// Decrypt an `E` chunk and decode the plaintext it wraps.
///
/// Layout: keyNameLen (must be 8), keyName, ivLen (at most 8), IV,
/// encryption type, ciphertext. The plaintext is itself a mode-prefixed
/// chunk and is decoded recursively.
fn decode_encrypted(payload: &[u8], index: u64, keys: Option<&KeyService>) -> Result<Vec<u8>> {
    let mut f = Cursor::new(payload);

    let mut byte = [0u8; 1];
    f.read_exact(&mut byte)
        .map_err(|_| Error::InvalidEncryptedChunk("missing key name length".into()))?;
    if byte[0] != 8 {
        return Err(Error::InvalidEncryptedChunk(format!(
            "key name length {} (expected 8)",
            byte[0]
        )));
    }

    let mut key_name_bytes = [0u8; 8];
    f.read_exact(&mut key_name_bytes)?;
    let key_name = u64::from_le_bytes(key_name_bytes);

    f.read_exact(&mut byte)?;
    let iv_len = byte[0] as usize;
    if iv_len > 8 {
        return Err(Error::InvalidEncryptedChunk(format!("IV length {iv_len}")));
    }
    let mut iv = [0u8; 8];
    f.read_exact(&mut iv[..iv_len])?;

    f.read_exact(&mut byte)?;
    let enc_type = byte[0];

    let key = keys
        .and_then(|k| k.get_key(key_name))
        .ok_or(Error::KeyNotFound(key_name))?;

    let mut plaintext = payload[f.position() as usize..].to_vec();
    match enc_type {
        ENC_SALSA20 => decrypt_salsa20(&mut plaintext, key, &iv, index)?,
        ENC_ARC4 => decrypt_arc4(&mut plaintext, key, &iv, index)?,
        other => return Err(Error::UnsupportedEncryptionType(other)),
    }

    if plaintext.is_empty() {
        warn!("chunk {index}: empty encrypted payload");
        return Ok(plaintext);
    }

    decode_chunk(&plaintext, index, keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framed(chunks: &[&[u8]]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(b"BLTE");
        let header_size = 8 + 4 + 24 * chunks.len() as u32;
        data.extend_from_slice(&header_size.to_be_bytes());
        data.push(0x0F);
        data.extend_from_slice(&(chunks.len() as u32).to_be_bytes()[1..]);
        for chunk in chunks {
            data.extend_from_slice(&(chunk.len() as u32).to_be_bytes());
            // Decoded size assumes raw mode; tests with other modes
            // override expectations through `decode`'s size argument.
            data.extend_from_slice(&((chunk.len() - 1) as u32).to_be_bytes());
            data.extend_from_slice(&md5::compute(chunk).0);
        }
        for chunk in chunks {
            data.extend_from_slice(chunk);
        }
        data
    }

    #[test]
    fn unframed_raw() {
        let mut blob = Vec::new();
        blob.extend_from_slice(b"BLTE");
        blob.extend_from_slice(&0u32.to_be_bytes());
        blob.push(b'N');
        blob.extend_from_slice(b"hello");

        assert_eq!(decode(&blob, 5, None).unwrap(), b"hello");
    }

    #[test]
    fn framed_two_chunks() {
        let blob = framed(&[b"Nfoo", b"Nbar"]);
        assert_eq!(decode(&blob, 6, None).unwrap(), b"foobar");
    }

    #[test]
    fn flipped_chunk_byte_is_corrupt() {
        let blob = framed(&[b"Nfoo", b"Nbar"]);
        for i in 60..blob.len() {
            let mut bad = blob.clone();
            bad[i] ^= 0x01;
            let err = decode(&bad, 6, None).unwrap_err();
            assert!(
                matches!(err, Error::CorruptChunk { .. }),
                "byte {i}: {err:?}"
            );
        }
    }

    #[test]
    fn zlib_chunk() {
        use flate2::{Compression, write::ZlibEncoder};
        use std::io::Write as _;

        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"compressed contents").unwrap();
        let mut chunk = vec![b'Z'];
        chunk.extend_from_slice(&enc.finish().unwrap());

        let blob = framed(&[&chunk]);
        assert_eq!(decode(&blob, 19, None).unwrap(), b"compressed contents");
    }

    #[test]
    fn nested_frame_chunk() {
        let mut inner = Vec::new();
        inner.extend_from_slice(b"BLTE");
        inner.extend_from_slice(&0u32.to_be_bytes());
        inner.push(b'N');
        inner.extend_from_slice(b"nested");

        let mut chunk = vec![b'F'];
        chunk.extend_from_slice(&inner);
        let blob = framed(&[&chunk]);
        assert_eq!(decode(&blob, 6, None).unwrap(), b"nested");
    }

    #[test]
    fn unknown_mode() {
        let mut blob = Vec::new();
        blob.extend_from_slice(b"BLTE");
        blob.extend_from_slice(&0u32.to_be_bytes());
        blob.push(b'Q');
        blob.extend_from_slice(b"???");

        let err = decode(&blob, 0, None).unwrap_err();
        assert!(matches!(err, Error::UnknownMode(b'Q')));
    }

    #[test]
    fn size_mismatch() {
        let blob = framed(&[b"Nfoo"]);
        let err = decode(&blob, 5, None).unwrap_err();
        assert!(matches!(
            err,
            Error::DecodedSizeMismatch {
                expected: 5,
                actual: 3
            }
        ));
    }

    fn encrypted_chunk(key: &[u8; 16], key_name: u64, plaintext: &[u8]) -> Vec<u8> {
        let iv = [0x61, 0x62, 0x63, 0x64];
        let mut iv8 = [0u8; 8];
        iv8[..4].copy_from_slice(&iv);

        let mut ciphertext = plaintext.to_vec();
        tessera_crypto::salsa20::encrypt_salsa20(&mut ciphertext, key, &iv8, 0).unwrap();

        let mut chunk = vec![b'E', 8];
        chunk.extend_from_slice(&key_name.to_le_bytes());
        chunk.push(4);
        chunk.extend_from_slice(&iv);
        chunk.push(b'S');
        chunk.extend_from_slice(&ciphertext);
        chunk
    }

    #[test]
    fn encrypted_chunk_round_trip() {
        let key = [0x5Au8; 16];
        let key_name = 0x1122334455667788;
        let chunk = encrypted_chunk(&key, key_name, b"Nsecret");
        let blob = framed(&[&chunk]);

        let mut keys = KeyService::new();
        keys.add_key(key_name, key);
        assert_eq!(decode(&blob, 6, Some(&keys)).unwrap(), b"secret");
    }

    #[test]
    fn missing_key_is_soft() {
        let chunk = encrypted_chunk(&[0x5A; 16], 0xDEADBEEF, b"Nsecret");
        let blob = framed(&[&chunk]);

        // No key service at all.
        let err = decode(&blob, 6, None).unwrap_err();
        assert!(err.is_missing_key());

        // A key service without the named key.
        let keys = KeyService::new();
        let err = decode(&blob, 6, Some(&keys)).unwrap_err();
        assert!(matches!(err, Error::KeyNotFound(0xDEADBEEF)));
    }

    #[test]
    fn decode_is_deterministic() {
        let blob = framed(&[b"Nfoo", b"Nbar"]);
        assert_eq!(
            decode(&blob, 6, None).unwrap(),
            decode(&blob, 6, None).unwrap()
        );
    }
}
