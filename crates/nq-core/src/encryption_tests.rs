//! Tests for the encryption gateway.

use super::*;

fn cipher() -> AesGcmCipher {
    AesGcmCipher::new(&[7u8; 32]).unwrap()
}

#[test]
fn test_round_trip_small_payload() {
    let cipher = cipher();
    let plaintext = r#"{"source_id":"A1","short_description":"héllo ✓"}"#;

    let sealed = cipher.encrypt(plaintext.as_bytes()).unwrap();

    assert!(!String::from_utf8_lossy(&sealed).contains("A1"));
    assert_eq!(cipher.decrypt(&sealed).unwrap(), plaintext.as_bytes());
}

/// Verify 1 KiB and 1 MiB payloads decrypt to the original bytes.
#[test]
fn test_round_trip_large_payloads() {
    let cipher = cipher();
    for size in [1024usize, 1024 * 1024] {
        let plaintext = "x".repeat(size);
        let sealed = cipher.encrypt(plaintext.as_bytes()).unwrap();
        assert_eq!(cipher.decrypt(&sealed).unwrap().len(), size);
    }
}

#[test]
fn test_fresh_nonce_per_message() {
    let cipher = cipher();
    let a = cipher.encrypt(b"same").unwrap();
    let b = cipher.encrypt(b"same").unwrap();
    assert_ne!(a, b);
}

mod failures {
    use super::*;

    #[test]
    fn test_plain_bytes_fail_to_decrypt() {
        let result = cipher().decrypt(b"{\"not\":\"encrypted\"}");
        assert!(matches!(result, Err(EncryptionError::Decrypt { .. })));
    }

    #[test]
    fn test_short_payload_fails() {
        let short = base64::engine::general_purpose::STANDARD.encode([0u8; 10]);
        let result = cipher().decrypt(short.as_bytes());
        assert!(matches!(result, Err(EncryptionError::Decrypt { .. })));
    }

    /// Verify a payload sealed under another key is rejected.
    #[test]
    fn test_wrong_key_fails() {
        let sealed = cipher().encrypt(b"secret").unwrap();
        let other = AesGcmCipher::new(&[9u8; 32]).unwrap();

        assert!(matches!(
            other.decrypt(&sealed),
            Err(EncryptionError::Decrypt { .. })
        ));
    }

    #[test]
    fn test_key_length_enforced() {
        assert!(matches!(
            AesGcmCipher::new(&[1u8; 16]),
            Err(EncryptionError::InvalidKey { .. })
        ));
    }
}

mod key_encoding {
    use super::*;

    #[test]
    fn test_hex_and_base64_keys_are_equivalent() {
        let raw = [3u8; 32];
        let hex_key = SecretValue::from_string(hex::encode(raw));
        let b64_key =
            SecretValue::from_string(base64::engine::general_purpose::STANDARD.encode(raw));

        let from_hex = AesGcmCipher::from_encoded_key(&hex_key).unwrap();
        let from_b64 = AesGcmCipher::from_encoded_key(&b64_key).unwrap();

        let sealed = from_hex.encrypt(b"payload").unwrap();
        assert_eq!(from_b64.decrypt(&sealed).unwrap(), b"payload");
    }

    #[test]
    fn test_debug_redacts_key() {
        let debug = format!("{:?}", cipher());
        assert!(debug.contains("[REDACTED]"));
    }
}
