//! Key derivation and DES encryption for the DRM storage streams.
//!
//! Books are written without real protection: the book key is all zeros,
//! and the sealed key only proves the metadata was not altered.

use des::Des;
use des::cipher::generic_array::GenericArray;
use des::cipher::{BlockEncrypt, KeyInit};

/// Key used for the encrypted sections of an unprotected book.
pub const BOOK_KEY: [u8; 8] = [0; 8];

/// `"Free as in freedom\0"` in UTF-16LE.
pub fn drm_source() -> Vec<u8> {
    "Free as in freedom\0"
        .encode_utf16()
        .flat_map(u16::to_le_bytes)
        .collect()
}

/// Derive an 8-byte DES key from a list of buffers.
///
/// The first buffer gets two leading zero bytes. Each buffer is zero-padded
/// to a multiple of 64 bytes, the concatenation is hashed with SHA-1, and
/// the digest is folded into 8 bytes with XOR.
///
/// The digest is standard SHA-1. Microsoft Reader itself hashes with a
/// modified SHA-1, so a sealed key derived here is not guaranteed to
/// validate in the reader.
pub fn derive_key(buffers: &[&[u8]]) -> [u8; 8] {
    let mut hasher = sha1_smol::Sha1::new();
    for (i, buffer) in buffers.iter().enumerate() {
        let mut data = Vec::with_capacity(buffer.len() + 66);
        if i == 0 {
            data.extend_from_slice(&[0, 0]);
        }
        data.extend_from_slice(buffer);
        let rem = data.len() % 64;
        if rem != 0 {
            data.resize(data.len() + 64 - rem, 0);
        }
        hasher.update(&data);
    }

    let digest = hasher.digest().bytes();
    let mut key = [0u8; 8];
    for (i, byte) in digest.iter().enumerate() {
        key[i % 8] ^= byte;
    }
    key
}

/// Encrypt with single DES in ECB mode.
///
/// Input that is not a multiple of 8 bytes is zero-padded first; aligned
/// input is encrypted as-is.
pub fn des_encrypt(key: &[u8; 8], data: &[u8]) -> Vec<u8> {
    let cipher = Des::new(GenericArray::from_slice(key));
    let mut out = data.to_vec();
    let rem = out.len() % 8;
    if rem != 0 {
        out.resize(out.len() + 8 - rem, 0);
    }
    for block in out.chunks_exact_mut(8) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    out
}
