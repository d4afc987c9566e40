use ring::hmac;

/// Signs a payload with HMAC-SHA256 and returns the signature as a hex
/// string.
pub fn sign(payload: &str, key: &[u8]) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    let tag = hmac::sign(&key, payload.as_bytes());
    hex::encode(tag.as_ref())
}

/// Verifies a hex-encoded HMAC-SHA256 signature in constant time.
pub fn verify(payload: &str, signature: &str, key: &[u8]) -> bool {
    let Ok(sig_bytes) = hex::decode(signature) else {
        return false;
    };
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    hmac::verify(&key, payload.as_bytes(), &sig_bytes).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify() {
        let key = b"test-signing-key";
        let sig = sign("payload", key);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(verify("payload", &sig, key));
    }

    #[test]
    fn rejects_tampered_payload_and_bad_hex() {
        let key = b"test-signing-key";
        let sig = sign("payload", key);
        assert!(!verify("payload2", &sig, key));
        assert!(!verify("payload", "zz-not-hex", key));
        assert!(!verify("payload", &sig, b"other-key"));
    }
}
