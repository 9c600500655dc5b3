//! The SDCP claim (§3 "Print" sibling data, §4.4 step 3-4): the
//! device-signed bundle that attests to device identity and firmware
//! integrity, and the logic that verifies it.

use crate::ecdh::{decode_point, sha256, verify_prehashed};
use common::errors::{err_msg, Result};
use p256::ecdsa::{Signature as DerSignature, VerifyingKey};
use p256::PublicKey;
use signature::Verifier;
use x509_parser::prelude::{FromDer, X509Certificate};

/// `c = (cert_m, pk_d, pk_f, h_f, s_m, s_d)` (§4.4 step 3).
#[derive(Debug, Clone)]
pub struct Claim {
    /// Per-model X.509 DER certificate.
    pub cert_m: Vec<u8>,
    /// Device public key, 65-byte uncompressed P-256 point.
    pub pk_d: Vec<u8>,
    /// Firmware public key, 65-byte uncompressed P-256 point.
    pub pk_f: Vec<u8>,
    /// Firmware hash.
    pub h_f: Vec<u8>,
    /// Signature over `SHA-256(pk_d)` under the model key, 64 bytes.
    pub s_m: Vec<u8>,
    /// Signature over `SHA-256(0xC001 || h_f || pk_f)` under the device
    /// key, 64 bytes.
    pub s_d: Vec<u8>,
}

impl Claim {
    pub fn is_well_formed(&self) -> bool {
        !self.cert_m.is_empty()
            && self.pk_d.len() == 65
            && self.pk_f.len() == 65
            && !self.h_f.is_empty()
            && self.s_m.len() == 64
            && self.s_d.len() == 64
    }

    /// `H(c) = SHA-256(cert_m || pk_d || pk_f || h_f || s_m || s_d)`
    /// (§4.4 step 4.d).
    pub fn hash(&self) -> [u8; 32] {
        sha256(&[
            &self.cert_m,
            &self.pk_d,
            &self.pk_f,
            &self.h_f,
            &self.s_m,
            &self.s_d,
        ])
    }
}

/// Validates `cert_m` against the configured intermediate-CA list and
/// returns the model public key `pk_m` it certifies (§4.4 step 5.e).
///
/// The reference implementation chains to a system trust root; this device
/// usage is narrower ("any CA" in the SDCP sense - the driver supplies
/// exactly the small, fixed CA set that is allowed to vouch for a sensor
/// model), so verifying `cert_m`'s signature directly against one of the
/// configured CA public keys is sufficient and avoids depending on a host
/// trust store. See DESIGN.md for the full rationale.
pub fn validate_model_certificate(cert_m_der: &[u8], intermediate_cas: &[Vec<u8>]) -> Result<PublicKey> {
    if intermediate_cas.is_empty() {
        return Err(err_msg("no intermediate CAs configured"));
    }

    let (_, cert) =
        X509Certificate::from_der(cert_m_der).map_err(|_| err_msg("malformed model certificate"))?;

    let tbs_bytes = cert.tbs_certificate.as_ref();
    let sig_bytes = cert.signature_value.data.as_ref();
    let signature =
        DerSignature::from_der(sig_bytes).map_err(|_| err_msg("malformed certificate signature"))?;

    let mut issuer_verified = false;
    for ca_der in intermediate_cas {
        let (_, ca_cert) = match X509Certificate::from_der(ca_der) {
            Ok(parsed) => parsed,
            Err(_) => continue,
        };
        let ca_key_bytes = ca_cert.public_key().subject_public_key.data.as_ref();
        let ca_key = match PublicKey::from_sec1_bytes(ca_key_bytes) {
            Ok(k) => k,
            Err(_) => continue,
        };
        let verifying_key = VerifyingKey::from(&ca_key);
        if verifying_key.verify(tbs_bytes, &signature).is_ok() {
            issuer_verified = true;
            break;
        }
    }

    if !issuer_verified {
        return Err(err_msg("model certificate not signed by a configured intermediate CA"));
    }

    let model_key_bytes = cert.public_key().subject_public_key.data.as_ref();
    PublicKey::from_sec1_bytes(model_key_bytes).map_err(|_| err_msg("malformed model public key"))
}

/// Runs the full SDCP claim verification described in §4.4 step 5,
/// returning the model public key `pk_m` once every check has passed.
pub fn verify_claim(
    claim: &Claim,
    intermediate_cas: &[Vec<u8>],
) -> Result<()> {
    if !claim.is_well_formed() {
        return Err(err_msg("claim is missing required fields"));
    }

    let pk_m = validate_model_certificate(&claim.cert_m, intermediate_cas)?;

    // Verify(pk_m, H(pk_d), s_m).
    let pk_d_hash = sha256(&[&claim.pk_d]);
    verify_prehashed(&pk_m, &pk_d_hash, &claim.s_m)?;

    // Verify(pk_d, H(0xC001 || h_f || pk_f), s_d).
    let pk_d = decode_point(&claim.pk_d)?;
    let boot_hash = sha256(&[&[0xC0, 0x01], claim.h_f.as_slice(), claim.pk_f.as_slice()]);
    verify_prehashed(&pk_d, &boot_hash, &claim.s_d)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecdh::HostKeypair;
    use p256::ecdsa::{signature::hazmat::PrehashSigner, SigningKey};
    use rand_core::OsRng;
    use sha2::{Digest, Sha256};

    fn der_sequence(tag_contents: &[u8]) -> Vec<u8> {
        let mut out = vec![0x30];
        encode_len(&mut out, tag_contents.len());
        out.extend_from_slice(tag_contents);
        out
    }

    fn encode_len(out: &mut Vec<u8>, len: usize) {
        if len < 0x80 {
            out.push(len as u8);
        } else {
            let bytes = len.to_be_bytes();
            let first_nonzero = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
            let trimmed = &bytes[first_nonzero..];
            out.push(0x80 | trimmed.len() as u8);
            out.extend_from_slice(trimmed);
        }
    }

    // Hand-built minimal ECDSA-P256 X.509v3 certificate, enough for
    // x509-parser to walk the structure and for our own verifier to check
    // the signature - not a general-purpose certificate builder.
    fn build_self_signed_like_cert(
        issuer_signing_key: &SigningKey,
        subject_public_key: &PublicKey,
        subject_cn: &str,
    ) -> Vec<u8> {
        let version = der_sequence_explicit(0xA0, &der_integer(2));
        let serial = der_integer(1);
        let sig_alg = der_sequence(&der_oid(&[1, 2, 840, 10045, 4, 3, 2]));
        let name = der_sequence(&der_rdn_sequence(subject_cn));
        let validity = der_sequence(&[der_utc_time(b"240101000000Z"), der_utc_time(b"340101000000Z")].concat());
        let spki = der_sequence(&{
            let alg = der_sequence(&[
                der_oid(&[1, 2, 840, 10045, 2, 1]),
                der_oid(&[1, 2, 840, 10045, 3, 1, 7]),
            ].concat());
            let point = subject_public_key.to_encoded_point(false);
            let bitstring = der_bitstring(point.as_bytes());
            [alg, bitstring].concat()
        });

        let tbs = der_sequence(
            &[
                version,
                serial,
                sig_alg.clone(),
                name.clone(),
                validity,
                name,
                spki,
            ]
            .concat(),
        );

        let digest: [u8; 32] = Sha256::digest(&tbs).into();
        let sig: ecdsa::Signature<p256::NistP256> = issuer_signing_key.sign_prehash(&digest).unwrap();
        let sig_der = der_bitstring(sig.to_der().as_bytes());

        der_sequence(&[tbs, sig_alg, sig_der].concat())
    }

    fn der_sequence_explicit(tag: u8, contents: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        encode_len(&mut out, contents.len());
        out.extend_from_slice(contents);
        out
    }

    fn der_integer(v: i64) -> Vec<u8> {
        let bytes = v.to_be_bytes();
        let first_nonzero = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
        let mut trimmed = bytes[first_nonzero..].to_vec();
        if trimmed[0] & 0x80 != 0 {
            trimmed.insert(0, 0);
        }
        let mut out = vec![0x02];
        encode_len(&mut out, trimmed.len());
        out.extend_from_slice(&trimmed);
        out
    }

    fn der_oid(arcs: &[u64]) -> Vec<u8> {
        let mut body = vec![(arcs[0] * 40 + arcs[1]) as u8];
        for &arc in &arcs[2..] {
            if arc < 128 {
                body.push(arc as u8);
            } else {
                let mut chunks = Vec::new();
                let mut v = arc;
                chunks.push((v & 0x7f) as u8);
                v >>= 7;
                while v > 0 {
                    chunks.push(((v & 0x7f) as u8) | 0x80);
                    v >>= 7;
                }
                chunks.reverse();
                body.extend_from_slice(&chunks);
            }
        }
        let mut out = vec![0x06];
        encode_len(&mut out, body.len());
        out.extend_from_slice(&body);
        out
    }

    fn der_bitstring(raw_point: &[u8]) -> Vec<u8> {
        let mut body = vec![0u8];
        body.extend_from_slice(raw_point);
        let mut out = vec![0x03];
        encode_len(&mut out, body.len());
        out.extend_from_slice(&body);
        out
    }

    fn der_utc_time(s: &[u8]) -> Vec<u8> {
        let mut out = vec![0x17];
        encode_len(&mut out, s.len());
        out.extend_from_slice(s);
        out
    }

    fn der_rdn_sequence(cn: &str) -> Vec<u8> {
        let cn_oid = der_oid(&[2, 5, 4, 3]);
        let cn_value = {
            let mut out = vec![0x0C]; // UTF8String
            encode_len(&mut out, cn.len());
            out.extend_from_slice(cn.as_bytes());
            out
        };
        let atv = der_sequence(&[cn_oid, cn_value].concat());
        let rdn = {
            let mut out = vec![0x31]; // SET
            encode_len(&mut out, atv.len());
            out.extend_from_slice(&atv);
            out
        };
        der_sequence(&rdn)
    }

    #[test]
    fn cert_signed_by_configured_ca_validates() {
        let ca_key = SigningKey::random(&mut OsRng);
        let ca_cert = build_self_signed_like_cert(&ca_key, &PublicKey::from(*ca_key.verifying_key()), "test-ca");

        let model_key = SigningKey::random(&mut OsRng);
        let model_cert = build_self_signed_like_cert(&ca_key, &PublicKey::from(*model_key.verifying_key()), "test-model");

        let pk_m = validate_model_certificate(&model_cert, &[ca_cert]).unwrap();
        assert_eq!(pk_m, PublicKey::from(*model_key.verifying_key()));
    }

    #[test]
    fn cert_signed_by_unconfigured_ca_is_rejected() {
        let ca_key = SigningKey::random(&mut OsRng);
        let other_ca_key = SigningKey::random(&mut OsRng);
        let other_ca_cert = build_self_signed_like_cert(
            &other_ca_key,
            &PublicKey::from(*other_ca_key.verifying_key()),
            "other-ca",
        );

        let model_key = SigningKey::random(&mut OsRng);
        let model_cert = build_self_signed_like_cert(&ca_key, &PublicKey::from(*model_key.verifying_key()), "test-model");

        assert!(validate_model_certificate(&model_cert, &[other_ca_cert]).is_err());
    }

    #[test]
    fn full_claim_verification_succeeds_for_well_formed_claim() {
        let ca_key = SigningKey::random(&mut OsRng);
        let ca_cert = build_self_signed_like_cert(&ca_key, &PublicKey::from(*ca_key.verifying_key()), "test-ca");

        let model_key = SigningKey::random(&mut OsRng);
        let model_cert = build_self_signed_like_cert(&ca_key, &PublicKey::from(*model_key.verifying_key()), "test-model");

        // The device key needs its private half on hand to produce s_d, so
        // it is minted directly rather than through HostKeypair (which only
        // exposes the public point of an ECDH secret).
        let device_signing_key = SigningKey::random(&mut OsRng);
        let pk_d: [u8; 65] = device_signing_key
            .verifying_key()
            .to_encoded_point(false)
            .as_bytes()
            .try_into()
            .unwrap();

        let firmware = HostKeypair::generate();
        let pk_f = firmware.public_point().to_vec();
        let h_f = vec![0xAA; 32];

        let pk_d_hash = sha256(&[&pk_d.to_vec()]);
        let s_m: ecdsa::Signature<p256::NistP256> = model_key.sign_prehash(&pk_d_hash).unwrap();

        let boot_hash = sha256(&[&[0xC0, 0x01], h_f.as_slice(), pk_f.as_slice()]);
        let s_d: ecdsa::Signature<p256::NistP256> = device_signing_key.sign_prehash(&boot_hash).unwrap();

        let claim = Claim {
            cert_m: model_cert,
            pk_d: pk_d.to_vec(),
            pk_f,
            h_f,
            s_m: s_m.to_bytes().to_vec(),
            s_d: s_d.to_bytes().to_vec(),
        };

        verify_claim(&claim, &[ca_cert]).unwrap();
    }

    #[test]
    fn tampered_claim_hash_changes_with_any_field() {
        let device = HostKeypair::generate();
        let firmware = HostKeypair::generate();
        let claim = Claim {
            cert_m: vec![1, 2, 3],
            pk_d: device.public_point().to_vec(),
            pk_f: firmware.public_point().to_vec(),
            h_f: vec![0xAA; 32],
            s_m: vec![0u8; 64],
            s_d: vec![0u8; 64],
        };
        let original = claim.hash();

        let mut tampered = claim.clone();
        tampered.h_f[0] ^= 0x01;
        assert_ne!(original, tampered.hash());
    }
}
