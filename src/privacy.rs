//! Caller number protection.
//!
//! Raw MSISDNs never reach the store or the logs: the queue keeps a
//! peppered SHA-256 digest, and diagnostics show only the last digits.

use sha2::{Digest, Sha256};

/// Hash an MSISDN with the deployment pepper. Returns 64 lowercase hex chars.
pub fn hash_msisdn(msisdn: &str, pepper: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(msisdn.as_bytes());
    hasher.update(pepper.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Mask an MSISDN for log output, keeping the last three digits.
pub fn mask_msisdn(msisdn: &str) -> String {
    let chars: Vec<char> = msisdn.chars().collect();
    if chars.len() < 3 {
        return "***".to_string();
    }
    let tail: String = chars[chars.len() - 3..].iter().collect();
    format!("***{tail}")
}
