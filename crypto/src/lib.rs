//! Cryptographic primitives for the SDCP session: ECDH key agreement, the
//! SP 800-108 KDF, HMAC tagging, and device claim verification (§4.4).
//!
//! Replaces the home-grown, bignum-backed crypto stack this workspace is
//! otherwise patterned on with the RustCrypto ecosystem - see DESIGN.md for
//! why.

pub mod claim;
pub mod ecdh;
pub mod kdf;
pub mod mac;

pub use claim::{validate_model_certificate, verify_claim, Claim};
pub use ecdh::{decode_point, random_host_random, sha256, verify_prehashed, HostKeypair};
pub use kdf::{derive, derive_application_keys, derive_master_secret};
pub use mac::{tag as mac_tag, verify as mac_verify};
