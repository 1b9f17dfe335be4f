//! Encryption filter — key-cycled XOR behind a fixed header.
//!
//! Payload layout: `"ENCRYPTED"` (9 ASCII bytes, no terminator) followed by
//! the input XORed with the key bytes cycled modulo the key length.
//!
//! This is obfuscation, not cryptography: XOR with a repeating key offers
//! no confidentiality against analysis.  The format is kept byte-exact for
//! compatibility; callers who need real secrecy should encrypt elsewhere.
//!
//! The filter operates on byte slices and is independent of any codec; the
//! combined compress-and-encrypt path runs LZ77 into a buffer first and
//! encrypts that buffer (see the pipeline).

use crate::error::{Error, Result};

/// Fixed header preceding every encrypted payload.
pub const ENCRYPTION_MAGIC: &[u8; 9] = b"ENCRYPTED";

fn check_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(Error::invalid_config("encryption key must not be empty"));
    }
    Ok(())
}

/// XOR `data` in place with `key` cycled from `phase`.
#[inline]
fn xor_cycle(key: &[u8], data: &mut [u8], phase: usize) {
    for (i, b) in data.iter_mut().enumerate() {
        *b ^= key[(phase + i) % key.len()];
    }
}

/// Encrypt: magic header plus the XORed payload.
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    check_key(key)?;
    let mut out = Vec::with_capacity(ENCRYPTION_MAGIC.len() + plaintext.len());
    out.extend_from_slice(ENCRYPTION_MAGIC);
    out.extend_from_slice(plaintext);
    xor_cycle(key, &mut out[ENCRYPTION_MAGIC.len()..], 0);
    Ok(out)
}

/// Decrypt: verify the magic header, then reverse the XOR.
pub fn decrypt(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    check_key(key)?;
    if data.len() < ENCRYPTION_MAGIC.len() || &data[..ENCRYPTION_MAGIC.len()] != ENCRYPTION_MAGIC {
        return Err(Error::BadFormat { expected: "ENCRYPTED" });
    }
    let mut out = data[ENCRYPTION_MAGIC.len()..].to_vec();
    xor_cycle(key, &mut out, 0);
    Ok(out)
}

/// True when `data` starts with the encryption header.
pub fn is_encrypted(data: &[u8]) -> bool {
    data.len() >= ENCRYPTION_MAGIC.len() && &data[..ENCRYPTION_MAGIC.len()] == ENCRYPTION_MAGIC
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_is_identity() {
        let keys: [&[u8]; 3] = [b"k", b"secret", b"a longer key than the payload itself"];
        for key in keys {
            let data = b"some plaintext worth hiding";
            let enc = encrypt(key, data).unwrap();
            assert!(is_encrypted(&enc));
            assert_eq!(decrypt(key, &enc).unwrap(), data);
        }
    }

    #[test]
    fn header_is_literal_ascii() {
        let enc = encrypt(b"key", b"").unwrap();
        assert_eq!(enc, b"ENCRYPTED");
    }

    #[test]
    fn key_cycles_modulo_length() {
        let enc = encrypt(b"ab", &[0u8; 4]).unwrap();
        assert_eq!(&enc[9..], &[b'a', b'b', b'a', b'b']);
    }

    #[test]
    fn empty_key_rejected() {
        assert!(matches!(encrypt(b"", b"data").unwrap_err(), Error::InvalidConfig(_)));
        assert!(matches!(decrypt(b"", b"ENCRYPTEDxx").unwrap_err(), Error::InvalidConfig(_)));
    }

    #[test]
    fn missing_magic_rejected() {
        assert!(matches!(
            decrypt(b"key", b"not encrypted data").unwrap_err(),
            Error::BadFormat { .. }
        ));
    }

    #[test]
    fn wrong_key_garbles_but_decrypts() {
        // XOR has no integrity; a wrong key yields garbage that downstream
        // codecs reject as corrupt.
        let enc = encrypt(b"right", b"payload").unwrap();
        let garbled = decrypt(b"wrong", &enc).unwrap();
        assert_ne!(garbled, b"payload");
    }
}
