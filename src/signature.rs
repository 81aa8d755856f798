//! HMAC-SHA256 signatures and constant-time comparisons.

#[cfg(test)]
use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 of `payload` under `secret`.
#[cfg(test)]
pub fn sign(secret: &str, payload: &[u8]) -> Result<String, InvalidLength> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Check a hex signature over the raw payload. The digest comparison is
/// constant time; malformed hex is simply a mismatch.
pub fn verify(secret: &str, payload: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// Constant-time string comparison for bearer tokens.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (a_byte, b_byte) in a.bytes().zip(b.bytes()) {
        result |= a_byte ^ b_byte;
    }

    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";
    const BODY: &[u8] = br#"{"event":"payment.captured","payload":{}}"#;

    #[test]
    fn signature_is_hex_sha256() {
        let sig = sign(SECRET, BODY).unwrap();
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn known_vector() {
        // RFC 4231 test case 2
        assert_eq!(
            sign("Jefe", b"what do ya want for nothing?").unwrap(),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn matching_signature_verifies() {
        let sig = sign(SECRET, BODY).unwrap();
        assert!(verify(SECRET, BODY, &sig));
        assert!(verify(SECRET, BODY, &sig.to_uppercase()));
    }

    #[test]
    fn any_single_byte_mutation_is_rejected() {
        let sig = sign(SECRET, BODY).unwrap();
        for i in 0..BODY.len() {
            let mut mutated = BODY.to_vec();
            mutated[i] ^= 0x01;
            assert!(!verify(SECRET, &mutated, &sig), "mutation at byte {i} verified");
        }
    }

    #[test]
    fn foreign_signature_is_rejected() {
        let other = sign("another-secret", BODY).unwrap();
        assert!(!verify(SECRET, BODY, &other));
        assert!(!verify(SECRET, BODY, "not-hex"));
        assert!(!verify(SECRET, BODY, ""));
    }

    #[test]
    fn constant_time_eq_cases() {
        assert!(constant_time_eq("token", "token"));
        assert!(!constant_time_eq("token", "tokeN"));
        assert!(!constant_time_eq("short", "longer-token"));
        assert!(constant_time_eq("", ""));
    }
}
