//! Pool difficulty: the scalar §3 of spec.md stores as a 64-bit IEEE float,
//! and its conversions to/from a 256-bit network [`Target`].
//!
//! Grounded in `tos_common::difficulty`'s shape (a type alias over the
//! numeric representation, `check_difficulty_against_target`,
//! `difficulty_from_hash`) but using `f64` rather than `VarUint` — spec.md §3
//! is explicit that pool difficulty must hold fractional values down to
//! `10⁻⁵`, which the teacher's big-integer `VarUint` difficulty cannot
//! represent and a float can.

use crate::error::DifficultyError;
use crate::hash::{Hash, Target, HASH_SIZE};

/// A pool/worker difficulty value. Kept as a bare `f64` (per spec.md §3)
/// rather than a newtype, matching how the original implementation and the
/// spec's numeric contracts (`normalize_pool_diff`, `dsps`, ...) treat it as
/// plain floating point throughout.
pub type Diff = f64;

/// Tolerance used anywhere the spec calls for "within epsilon of" a diff
/// comparison (suggest-diff no-op check, vardiff no-op check).
pub const EPSILON: f64 = 1e-6;

/// The conventional "difficulty 1" target: `0x00000000ffff0000...0000`,
/// 32 bytes big-endian. This is the same reference target ckpool and every
/// other Bitcoin stratum pool anchors its difficulty scale to.
const DIFF1_TARGET: [u8; HASH_SIZE] = {
    let mut bytes = [0u8; HASH_SIZE];
    bytes[4] = 0xff;
    bytes[5] = 0xff;
    bytes
};

/// Render a big-endian 256-bit byte array as an `f64` approximation.
///
/// This necessarily loses precision below the `f64` mantissa (~53 bits) once
/// the value needs more than ~7 significant bytes; that is acceptable here
/// because every target/difficulty consumer in this crate already tolerates
/// the 0.1%-relative / 1e-6-absolute error spec.md §8 allows for diff<->target
/// round trips — pool software has always computed difficulty in floating
/// point, never exact bigint, for this reason.
fn bytes_be_to_f64(bytes: &[u8; HASH_SIZE]) -> f64 {
    let mut value = 0f64;
    for &b in bytes.iter() {
        value = value * 256.0 + b as f64;
    }
    value
}

/// Inverse of [`bytes_be_to_f64`]: render a non-negative `f64` back into a
/// big-endian 256-bit byte array, saturating at all-0xff if it overflows.
fn f64_to_bytes_be(mut value: f64) -> [u8; HASH_SIZE] {
    if value < 0.0 || !value.is_finite() {
        value = 0.0;
    }
    let mut bytes = [0u8; HASH_SIZE];
    for i in (0..HASH_SIZE).rev() {
        let quotient = (value / 256.0).floor();
        let remainder = value - quotient * 256.0;
        bytes[i] = remainder as u8;
        value = quotient;
    }
    bytes
}

fn diff1_target_f64() -> f64 {
    bytes_be_to_f64(&DIFF1_TARGET)
}

/// The core numeric contract of §4.1: fractional diffs below 1.0 pass through
/// unchanged (so low-hashrate USB/FPGA devices keep a usable sub-1 target);
/// diffs at or above 1.0 are rounded to the nearest whole number.
///
/// Idempotent: `normalize_pool_diff(normalize_pool_diff(x)) == normalize_pool_diff(x)`.
pub fn normalize_pool_diff(x: f64) -> f64 {
    if x < 1.0 {
        x
    } else {
        x.round()
    }
}

/// Clamp a freshly computed network difficulty to the operator's
/// `allow_low_diff` policy (§4.1): below 1.0 is only allowed on networks
/// (e.g. regtest) that opted in.
pub fn clamp_network_diff(network_diff: f64, allow_low_diff: bool) -> f64 {
    if !allow_low_diff && network_diff < 1.0 {
        1.0
    } else {
        network_diff
    }
}

/// Convert a difficulty value into the 256-bit target a header hash must be
/// at or below to satisfy it.
pub fn target_from_diff(diff: Diff) -> Result<Target, DifficultyError> {
    if !diff.is_finite() || diff <= 0.0 {
        return Err(DifficultyError::Invalid(diff));
    }
    let target = diff1_target_f64() / diff;
    Ok(Target::new(f64_to_bytes_be(target)))
}

/// Convert a 256-bit target back into its equivalent difficulty value.
pub fn diff_from_target(target: &Target) -> Diff {
    let t = bytes_be_to_f64(target.as_bytes());
    if t <= 0.0 {
        return f64::INFINITY;
    }
    diff1_target_f64() / t
}

/// Compute the difficulty a header hash itself represents, i.e. the
/// difficulty for which this hash would be exactly the boundary solution.
/// Used to decide whether a share is a block candidate against the network
/// target, independent of the client's share target.
pub fn difficulty_from_hash(hash: &Hash) -> Diff {
    let h = bytes_be_to_f64(&hash.as_u256_be());
    if h <= 0.0 {
        return f64::INFINITY;
    }
    diff1_target_f64() / h
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_preserves_fractional_below_one() {
        assert_eq!(normalize_pool_diff(0.333), 0.333);
        assert_eq!(normalize_pool_diff(0.01), 0.01);
    }

    #[test]
    fn normalize_rounds_at_or_above_one() {
        assert_eq!(normalize_pool_diff(1.0), 1.0);
        assert_eq!(normalize_pool_diff(1.4), 1.0);
        assert_eq!(normalize_pool_diff(1.5), 2.0);
        assert_eq!(normalize_pool_diff(200.6), 201.0);
    }

    #[test]
    fn normalize_is_idempotent() {
        for x in [0.0001, 0.5, 0.999, 1.0, 1.5, 42.0, 200.6, 1_000_000.3] {
            let once = normalize_pool_diff(x);
            let twice = normalize_pool_diff(once);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn network_diff_boundary_behaviour() {
        assert_eq!(clamp_network_diff(1.0, false), 1.0);
        assert_eq!(clamp_network_diff(1.0, true), 1.0);
        assert_eq!(clamp_network_diff(0.0, false), 1.0);
        assert_eq!(clamp_network_diff(0.0, true), 0.0);
        assert_eq!(clamp_network_diff(0.3, true), 0.3);
    }

    #[test]
    fn diff_target_round_trip_within_tolerance() {
        for d in [0.00001, 0.1, 1.0, 42.0, 200.0, 1_000.0, 1_000_000.0, 1e10] {
            let target = target_from_diff(d).unwrap();
            let back = diff_from_target(&target);
            let rel_err = ((back - d) / d).abs();
            assert!(
                rel_err < 0.001 || (back - d).abs() < 1e-6,
                "diff {d} round-tripped to {back} (rel err {rel_err})"
            );
        }
    }

    #[test]
    fn target_from_diff_rejects_non_positive_and_non_finite() {
        assert!(target_from_diff(0.0).is_err());
        assert!(target_from_diff(-1.0).is_err());
        assert!(target_from_diff(f64::NAN).is_err());
        assert!(target_from_diff(f64::INFINITY).is_err());
    }

    #[test]
    fn higher_diff_yields_smaller_target() {
        let low = target_from_diff(1.0).unwrap();
        let high = target_from_diff(1000.0).unwrap();
        assert!(high.as_bytes() < low.as_bytes());
    }

    proptest::proptest! {
        #[test]
        fn normalize_idempotent_prop(x in 0.0f64..1.0e12) {
            let once = normalize_pool_diff(x);
            let twice = normalize_pool_diff(once);
            proptest::prop_assert_eq!(once, twice);
        }
    }
}
