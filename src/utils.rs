//! Identifier helpers for records, settlements and shipments

use bech32::Bech32m;
use uuid7::uuid7;

// construct a unique record id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Settlement reference stamped on a single processed payment.
pub fn new_transaction_id() -> String {
    format!("TXN-{}", hex::encode_upper(uuid7().as_bytes()))
}

/// Shared prefix for every payment settled in one bulk run.
///
/// Digest over the batch members plus a fresh uuid so two runs over the same
/// ids never share a prefix.
pub fn batch_transaction_prefix(ids: &[String]) -> String {
    let digest = sha256::digest(format!("{}:{}", uuid7(), ids.join(",")));
    format!("TXN-BULK-{}", digest[..12].to_uppercase())
}

pub fn new_tracking_id() -> String {
    // tail bytes of a uuid7 are random, the head is the clock
    format!("TRK-{}", hex::encode_upper(&uuid7().as_bytes()[8..]))
}
