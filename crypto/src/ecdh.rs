//! ECDH P-256 key agreement and the raw-digest ECDSA verification the SDCP
//! claim is checked with (§4.4 step 5).

use common::errors::{err_msg, Result};
use ecdsa::signature::hazmat::PrehashVerifier;
use p256::ecdh::EphemeralSecret;
use p256::ecdsa::{Signature, VerifyingKey};
use p256::{EncodedPoint, PublicKey};
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};

/// The host's ephemeral P-256 keypair for one connect attempt.
pub struct HostKeypair {
    secret: EphemeralSecret,
    public_point: [u8; 65],
}

impl HostKeypair {
    /// Generates a fresh ephemeral keypair, as required at the start of
    /// every full connect (§4.4 step 1).
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random(&mut OsRng);
        let public_point: [u8; 65] = secret
            .public_key()
            .to_encoded_point(false)
            .as_bytes()
            .try_into()
            .expect("uncompressed P-256 point is always 65 bytes");
        Self { secret, public_point }
    }

    /// The 65-byte uncompressed SEC1 encoding of the host's public point,
    /// `pk_h` in the spec.
    pub fn public_point(&self) -> &[u8; 65] {
        &self.public_point
    }

    /// Computes `ECDH(sk_h, pk_f)`, the shared x-coordinate, against a
    /// peer's 65-byte uncompressed point.
    pub fn shared_secret(&self, peer_point: &[u8]) -> Result<Vec<u8>> {
        let point = decode_point(peer_point)?;
        let shared = self.secret.diffie_hellman(&point);
        Ok(shared.raw_secret_bytes().to_vec())
    }
}

pub fn decode_point(bytes: &[u8]) -> Result<PublicKey> {
    if bytes.len() != 65 {
        return Err(err_msg("expected a 65-byte uncompressed P-256 point"));
    }
    let encoded = EncodedPoint::from_bytes(bytes).map_err(|_| err_msg("malformed P-256 point"))?;
    PublicKey::from_encoded_point(&encoded)
        .into_option()
        .ok_or_else(|| err_msg("P-256 point is not on the curve"))
}

/// 32 bytes of host randomness for a connect/identify round (`r_h` in the
/// spec). Exposed here so callers never need to depend on `rand_core`
/// directly just to open a session.
pub fn random_host_random() -> [u8; 32] {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

pub fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Verifies a raw 64-byte (r || s) ECDSA-P256 signature over an
/// already-computed SHA-256 digest - the form every SDCP claim signature
/// takes (§4.4 step 5.f).
pub fn verify_prehashed(public_key: &PublicKey, digest: &[u8; 32], signature: &[u8]) -> Result<()> {
    let sig = Signature::from_slice(signature).map_err(|_| err_msg("malformed ECDSA signature"))?;
    let verifying_key = VerifyingKey::from(public_key);
    verifying_key
        .verify_prehash(digest, &sig)
        .map_err(|_| err_msg("ECDSA signature verification failed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::{signature::hazmat::PrehashSigner, SigningKey};

    #[test]
    fn ecdh_agrees_on_both_sides() {
        let host = HostKeypair::generate();
        let device = HostKeypair::generate();

        let host_shared = host.shared_secret(device.public_point()).unwrap();
        let device_shared = device.shared_secret(host.public_point()).unwrap();
        assert_eq!(host_shared, device_shared);
    }

    #[test]
    fn prehashed_signature_round_trips() {
        let signing_key = SigningKey::random(&mut OsRng);
        let verifying_key = *signing_key.verifying_key();
        let digest = sha256(&[b"hello"]);
        let sig: Signature = signing_key.sign_prehash(&digest).unwrap();

        let public_key = PublicKey::from(verifying_key);
        verify_prehashed(&public_key, &digest, sig.to_bytes().as_slice()).unwrap();
    }

    #[test]
    fn flipped_digest_byte_fails_verification() {
        let signing_key = SigningKey::random(&mut OsRng);
        let public_key = PublicKey::from(*signing_key.verifying_key());
        let mut digest = sha256(&[b"hello"]);
        let sig: Signature = signing_key.sign_prehash(&digest).unwrap();

        digest[0] ^= 0x01;
        assert!(verify_prehashed(&public_key, &digest, sig.to_bytes().as_slice()).is_err());
    }
}
