//! Stratum wire message shapes (spec.md §6).
//!
//! Grounded in `tos_daemon::core::mining::stratum`'s `StratumJob`/
//! `StratumNotification`/`StratumShare` split (serde structs named after the
//! JSON-RPC method they carry), generalised from that module's
//! TOS-specific, coinbase-less job shape to the full ckpool-style
//! `mining.notify` payload spec.md §6 specifies (`coinb1`/`coinb2`, merkle
//! branches, `clean_jobs`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ShareReject;

/// Parameters of a `mining.submit` call (spec.md §4.3): at minimum five
/// positional items.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitParams {
    pub workername: String,
    pub job_id: String,
    pub enonce2_hex: String,
    pub ntime_hex: String,
    pub nonce_hex: String,
}

impl SubmitParams {
    /// Parse the positional JSON array ckpool-style stratum submits as.
    pub fn from_json_array(params: &[Value]) -> Result<Self, ShareReject> {
        if params.len() < 5 {
            return Err(ShareReject::InvalidParameters);
        }
        let as_str = |v: &Value| v.as_str().map(str::to_string);
        let workername = as_str(&params[0]).ok_or(ShareReject::InvalidParameters)?;
        let job_id = as_str(&params[1]).ok_or(ShareReject::InvalidParameters)?;
        let enonce2_hex = as_str(&params[2]).ok_or(ShareReject::InvalidParameters)?;
        let ntime_hex = as_str(&params[3]).ok_or(ShareReject::InvalidParameters)?;
        let nonce_hex = as_str(&params[4]).ok_or(ShareReject::InvalidParameters)?;

        if nonce_hex.len() < 8 {
            return Err(ShareReject::InvalidParameters);
        }

        Ok(SubmitParams {
            workername,
            job_id,
            enonce2_hex,
            ntime_hex,
            nonce_hex,
        })
    }
}

/// `mining.notify` parameters (spec.md §6), in the order ckpool's wire
/// protocol sends them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotifyParams {
    pub job_id: String,
    pub prev_hash: String,
    pub coinb1: String,
    pub coinb2: String,
    pub merkle_branches: Vec<String>,
    pub version: String,
    pub nbits: String,
    pub ntime: String,
    pub clean_jobs: bool,
}

/// `mining.subscribe` response: `[[["mining.set_difficulty", id], ["mining.notify", id]], enonce1_hex, enonce2_len]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscribeResponse {
    pub subscription_id: String,
    pub enonce1_hex: String,
    pub enonce2_len: usize,
}

impl SubscribeResponse {
    pub fn to_json(&self) -> Value {
        serde_json::json!([
            [
                ["mining.set_difficulty", self.subscription_id],
                ["mining.notify", self.subscription_id],
            ],
            self.enonce1_hex,
            self.enonce2_len,
        ])
    }
}

/// Parse a `mining.suggest_difficulty` (or password-embedded `diff=`)
/// numeric argument through the "number value" path spec.md §6 and §9
/// mandate: both JSON integer and JSON float must parse, never only one.
pub fn parse_diff_number(value: &Value) -> Option<f64> {
    value.as_f64()
}

/// An outbound notification the dispatcher/vardiff controller emits toward
/// one client. Kept as an enum rather than raw `Value` so call sites can't
/// accidentally reorder `set_difficulty`/`notify` (spec.md §5: "Within a
/// client, `mining.set_difficulty` is emitted before the `mining.notify`
/// whose job it first applies to").
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    SetDifficulty(f64),
    Notify(NotifyParams),
    SubscribeResult(SubscribeResponse),
    SubmitResult(Result<(), ShareReject>),
    AuthorizeResult(bool),
    Disconnect,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_params_parses_minimum_five_fields() {
        let params = vec![
            Value::String("alice.rig1".into()),
            Value::String("100".into()),
            Value::String("deadbeef".into()),
            Value::String("5f5e1234".into()),
            Value::String("deadbeef".into()),
        ];
        let parsed = SubmitParams::from_json_array(&params).unwrap();
        assert_eq!(parsed.workername, "alice.rig1");
        assert_eq!(parsed.job_id, "100");
    }

    #[test]
    fn submit_params_rejects_short_nonce() {
        let params = vec![
            Value::String("alice.rig1".into()),
            Value::String("100".into()),
            Value::String("deadbeef".into()),
            Value::String("5f5e1234".into()),
            Value::String("abcd".into()),
        ];
        assert_eq!(
            SubmitParams::from_json_array(&params),
            Err(ShareReject::InvalidParameters)
        );
    }

    #[test]
    fn submit_params_rejects_too_few_fields() {
        let params = vec![Value::String("alice".into())];
        assert_eq!(
            SubmitParams::from_json_array(&params),
            Err(ShareReject::InvalidParameters)
        );
    }

    #[test]
    fn diff_number_accepts_integer_and_float() {
        assert_eq!(parse_diff_number(&serde_json::json!(1)), Some(1.0));
        assert_eq!(parse_diff_number(&serde_json::json!(1.0)), Some(1.0));
        assert_eq!(parse_diff_number(&serde_json::json!(200.5)), Some(200.5));
    }
}
