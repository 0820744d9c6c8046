//! Coinbase transaction assembly (spec.md §4.1).
//!
//! A stratum coinbase is built, then split in two around the miner-supplied
//! extranonce: `coinb1` (everything up to the extranonce) and `coinb2`
//! (everything after it, through the locktime). The full serialized
//! transaction a submitted share reconstructs is
//! `coinb1 ++ enonce1 ++ enonce2 ++ coinb2`; this module only ever produces
//! that split, never a single blob, matching spec.md §3/§6.
//!
//! Raw consensus encoding (varints, little-endian integers) is hand-rolled
//! rather than routed through `bitcoin::consensus::encode`, because this
//! module needs to cut the serialized bytes at an exact, non-field-aligned
//! offset (inside the scriptSig, between the BIP34 height push and the
//! extranonce placeholder) that the `bitcoin` crate's `Transaction` encoder
//! has no hook for. `pool_common::address` still does all scriptPubKey
//! construction, so the `bitcoin` dependency is doing the part it's actually
//! good at.

use pool_common::address::address_to_script_pubkey;
use pool_common::config::clamp_donation_percent;
use pool_common::error::DecodeError;

/// The two halves of a coinbase transaction around the extranonce field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinbaseParts {
    pub coinb1: Vec<u8>,
    pub coinb2: Vec<u8>,
}

/// Minimal BIP34 height encoding: a scriptSig push of the block height as a
/// minimally-sized little-endian integer, MSB-clear (i.e. script "number"
/// encoding), preceded by its own push-length byte.
pub fn bip34_height_push(height: u64) -> Vec<u8> {
    let mut le = Vec::new();
    let mut h = height;
    if h == 0 {
        le.push(0);
    } else {
        while h > 0 {
            le.push((h & 0xff) as u8);
            h >>= 8;
        }
        // Minimal script-number encoding: if the high bit of the last byte
        // is set, a zero padding byte disambiguates it from a sign bit.
        if le.last().copied().unwrap_or(0) & 0x80 != 0 {
            le.push(0);
        }
    }
    let mut out = Vec::with_capacity(le.len() + 1);
    out.push(le.len() as u8);
    out.extend_from_slice(&le);
    out
}

fn write_varint(buf: &mut Vec<u8>, n: u64) {
    if n < 0xfd {
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(0xfd);
        buf.extend_from_slice(&(n as u16).to_le_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(0xfe);
        buf.extend_from_slice(&(n as u32).to_le_bytes());
    } else {
        buf.push(0xff);
        buf.extend_from_slice(&n.to_le_bytes());
    }
}

/// One coinbase payout output: a destination address and its value in
/// satoshis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payout {
    pub address: String,
    pub value_sat: u64,
}

/// Build the payout output set for a coinbase worth `coinbase_value_sat`,
/// splitting `donation_percent` off to `donation_address` (spec.md §4.1).
///
/// `donation_percent` must already have passed through
/// [`clamp_donation_percent`] (the config layer does this at validation
/// time); a value of exactly `0.0` omits the donation output entirely rather
/// than emitting a dust output.
pub fn split_payouts(
    coinbase_value_sat: u64,
    pool_address: &str,
    donation_address: &str,
    donation_percent: f64,
) -> Vec<Payout> {
    let donation_percent = clamp_donation_percent(donation_percent);
    if donation_percent <= 0.0 {
        return vec![Payout {
            address: pool_address.to_string(),
            value_sat: coinbase_value_sat,
        }];
    }
    let donation_sat =
        ((coinbase_value_sat as f64) * donation_percent / 100.0).round() as u64;
    let pool_sat = coinbase_value_sat.saturating_sub(donation_sat);
    vec![
        Payout {
            address: pool_address.to_string(),
            value_sat: pool_sat,
        },
        Payout {
            address: donation_address.to_string(),
            value_sat: donation_sat,
        },
    ]
}

/// Assemble the `coinb1`/`coinb2` split for a fresh workbase.
///
/// `enonce_total_len` is `enonce1_len + enonce2_len` (spec.md §3: the two
/// extranonce components always sum to a fixed width the scriptSig push
/// length is computed from once, at workbase build time).
pub fn build_coinbase(
    height: u64,
    coinbase_value_sat: u64,
    pool_address: &str,
    donation_address: &str,
    donation_percent: f64,
    enonce_total_len: usize,
) -> Result<CoinbaseParts, DecodeError> {
    let payouts = split_payouts(coinbase_value_sat, pool_address, donation_address, donation_percent);
    // Resolve scriptPubKeys up front so a malformed payout address fails the
    // whole ingest rather than silently producing an unspendable coinbase.
    let mut script_pubkeys = Vec::with_capacity(payouts.len());
    for payout in &payouts {
        script_pubkeys.push(address_to_script_pubkey(&payout.address)?);
    }

    let height_push = bip34_height_push(height);
    // scriptSig = BIP34 height push, then the extranonce placeholder. The
    // placeholder's own length byte is fixed at ingest time; the bytes
    // themselves are supplied per-client at submit time and never live in
    // either half produced here.
    let scriptsig_len = height_push.len() + enonce_total_len;

    let mut coinb1 = Vec::new();
    coinb1.extend_from_slice(&1u32.to_le_bytes()); // tx version
    write_varint(&mut coinb1, 1); // one input
    coinb1.extend_from_slice(&[0u8; 32]); // null prevout hash
    coinb1.extend_from_slice(&0xffff_ffffu32.to_le_bytes()); // null prevout index
    write_varint(&mut coinb1, scriptsig_len as u64);
    coinb1.extend_from_slice(&height_push);
    // coinb1 ends here; the miner's enonce1||enonce2 bytes are inserted next.

    let mut coinb2 = Vec::new();
    coinb2.extend_from_slice(&0xffff_ffffu32.to_le_bytes()); // sequence
    write_varint(&mut coinb2, payouts.len() as u64);
    for (payout, script_pubkey) in payouts.iter().zip(script_pubkeys.iter()) {
        coinb2.extend_from_slice(&payout.value_sat.to_le_bytes());
        write_varint(&mut coinb2, script_pubkey.len() as u64);
        coinb2.extend_from_slice(script_pubkey.as_bytes());
    }
    coinb2.extend_from_slice(&0u32.to_le_bytes()); // locktime

    Ok(CoinbaseParts { coinb1, coinb2 })
}
