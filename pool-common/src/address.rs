//! Username/address validation (spec.md §4.2, §4.6).
//!
//! A stratum username is an address — Base58 P2PKH (25 bytes), Base58 P2SH
//! (23 bytes), or a Bech32/Bech32m segwit program — optionally followed by
//! `.workername`. Address decoding and `address_to_txn`'s scriptPubKey
//! construction are both delegated to the `bitcoin` crate (as
//! `rust-bitcoin-corepc` does throughout its `types`/`client` crates) rather
//! than hand-rolled Base58Check/Bech32, since that is the idiomatic choice
//! once a real `bitcoin` dependency is in the stack: `bitcoin::Address`
//! already encodes the script/segwit dispatch spec.md §4.6 describes as two
//! booleans, as a closed enum matched on the address payload.

use bitcoin::{Address, ScriptBuf};

use crate::error::DecodeError;

/// A validated stratum username: the payout address plus an optional
/// worker name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUsername {
    pub address: String,
    pub worker: Option<String>,
}

/// Parse `address[.workername]` (spec.md §4.2).
///
/// The workername, if present, must be non-empty, must not contain `/`, and
/// must not be one of the literal single-character names `.` or `_` — both
/// of which are used in the wild as placeholder/typo worker names and are
/// rejected rather than silently accepted.
pub fn parse_username(raw: &str) -> Result<ParsedUsername, DecodeError> {
    let (address, worker) = match raw.split_once('.') {
        Some((addr, worker)) => (addr, Some(worker)),
        None => (raw, None),
    };

    validate_address(address)?;

    let worker = match worker {
        None => None,
        Some(w) => {
            if w.is_empty() || w.contains('/') || w == "." || w == "_" {
                return Err(DecodeError::InvalidWorkerName);
            }
            Some(w.to_string())
        }
    };

    Ok(ParsedUsername {
        address: address.to_string(),
        worker,
    })
}

/// Validate that `address` decodes to a Base58 P2PKH/P2SH or Bech32(m)
/// segwit payout address, on any network (a pool may serve several chains'
/// worth of testnets under one binary, so the network is not pinned here).
pub fn validate_address(address: &str) -> Result<(), DecodeError> {
    address_to_script_pubkey(address).map(|_| ())
}

/// The pool-side equivalent of ckpool's `address_to_txn`: turn a payout
/// address into the scriptPubKey its coinbase output should carry.
pub fn address_to_script_pubkey(address: &str) -> Result<ScriptBuf, DecodeError> {
    // The pool does not pin a single network here: it routes coinbase
    // construction per-workbase using whichever chain the template came
    // from, so only the address *shape* (Base58 P2PKH/P2SH length, or a
    // valid Bech32(m) program) is validated at admission time.
    // `assume_checked` is sound because the string already round-tripped
    // through `Address::from_str`, which rejects anything that isn't one of
    // those three encodings.
    let parsed = address
        .parse::<Address<_>>()
        .map_err(|_| DecodeError::UnknownAddress)?
        .assume_checked();
    Ok(parsed.script_pubkey())
}

#[cfg(test)]
mod tests {
    use super::*;

    const P2PKH: &str = "1BoatSLRHtKNngkdXEeobR76b53LETtpyT";
    const P2SH: &str = "3P14159f73E4gFr7JterCCQh9QjiTjiZrG";
    const BECH32: &str = "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq";

    #[test]
    fn plain_p2pkh_username_has_no_worker() {
        let parsed = parse_username(P2PKH).unwrap();
        assert_eq!(parsed.address, P2PKH);
        assert_eq!(parsed.worker, None);
    }

    #[test]
    fn username_with_worker_splits_on_first_dot() {
        let parsed = parse_username(&format!("{P2PKH}.rig1")).unwrap();
        assert_eq!(parsed.address, P2PKH);
        assert_eq!(parsed.worker.as_deref(), Some("rig1"));
    }

    #[test]
    fn p2sh_and_bech32_addresses_validate() {
        assert!(validate_address(P2SH).is_ok());
        assert!(validate_address(BECH32).is_ok());
    }

    #[test]
    fn garbage_address_is_rejected() {
        assert!(validate_address("not-an-address").is_err());
    }

    #[test]
    fn worker_name_with_slash_is_rejected() {
        assert!(parse_username(&format!("{P2PKH}.ri/g1")).is_err());
    }

    #[test]
    fn empty_worker_name_is_rejected() {
        assert!(parse_username(&format!("{P2PKH}.")).is_err());
    }

    #[test]
    fn single_char_placeholder_worker_names_are_rejected() {
        assert!(parse_username(&format!("{P2PKH}..")).is_err());
        assert!(parse_username(&format!("{P2PKH}._")).is_err());
    }
}
