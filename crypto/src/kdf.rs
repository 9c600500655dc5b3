//! NIST SP 800-108 counter-mode key derivation with HMAC-SHA-256 as the PRF
//! (§4.4 "KDF / MAC primitives"). Mirrors the shape of `crypto::hkdf::HKDF`
//! in the home-grown crypto library this is patterned on (an `extract`-like
//! keyed PRF plus an `expand`-like counter loop), but built directly on
//! `hmac`/`sha2` rather than a hand-rolled big-integer/hash stack.

use common::errors::{err_msg, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const OUTPUT_LEN: usize = 32;

/// Runs one SP 800-108 counter-mode derivation, producing `output_len`
/// bytes of keying material.
///
/// Each 32-byte block is `HMAC(key, counter_be32 || label || 0x00 || context)`
/// with `counter` starting at 1 and incrementing per block; the blocks are
/// concatenated and truncated to `output_len`.
pub fn derive(key: &[u8], label: &str, context: &[u8], output_len: usize) -> Result<Vec<u8>> {
    let blocks = (output_len + OUTPUT_LEN - 1) / OUTPUT_LEN;
    if blocks > u32::MAX as usize {
        return Err(err_msg("KDF output length overflow"));
    }

    let mut out = Vec::with_capacity(blocks * OUTPUT_LEN);
    for i in 1..=blocks as u32 {
        let mut mac =
            HmacSha256::new_from_slice(key).map_err(|_| err_msg("KDF: invalid key length"))?;
        mac.update(&i.to_be_bytes());
        mac.update(label.as_bytes());
        mac.update(&[0u8]);
        mac.update(context);
        out.extend_from_slice(&mac.finalize().into_bytes());
    }
    out.truncate(output_len);
    Ok(out)
}

/// Derives the 32-byte SDCP master secret: `KDF(a, "master secret", r_h ||
/// r_d)`.
pub fn derive_master_secret(shared_secret: &[u8], host_random: &[u8], device_random: &[u8]) -> Result<Vec<u8>> {
    let mut context = Vec::with_capacity(host_random.len() + device_random.len());
    context.extend_from_slice(host_random);
    context.extend_from_slice(device_random);
    derive(shared_secret, "master secret", &context, OUTPUT_LEN)
}

/// Derives the SDCP application keys from the master secret: `(enc,
/// mac_secret) = KDF(master, "application keys")`, a single 64-byte counter
/// stream split into two 32-byte halves. Only `mac_secret` (the second
/// half) is ever retained by a session (§3 "SDCP session").
pub fn derive_application_keys(master_secret: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    let okm = derive(master_secret, "application keys", &[], 2 * OUTPUT_LEN)?;
    let (enc, mac) = okm.split_at(OUTPUT_LEN);
    Ok((enc.to_vec(), mac.to_vec()))
}
