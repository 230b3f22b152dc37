use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Build the message PayTR signs: reference, salt, status and amount,
/// concatenated exactly as the gateway sent them.
pub fn canonical_message(
    order_reference: &str,
    salt: &str,
    status_token: &str,
    amount_token: &str,
) -> String {
    let mut message = String::with_capacity(
        order_reference.len() + salt.len() + status_token.len() + amount_token.len(),
    );
    message.push_str(order_reference);
    message.push_str(salt);
    message.push_str(status_token);
    message.push_str(amount_token);
    message
}

fn keyed_mac(key: &[u8], message: &str) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(message.as_bytes());
    mac
}

/// Compute the base64-encoded HMAC-SHA256 the gateway would attach to a
/// notification with these fields.
pub fn compute_signature(
    key: &[u8],
    salt: &str,
    order_reference: &str,
    status_token: &str,
    amount_token: &str,
) -> String {
    let message = canonical_message(order_reference, salt, status_token, amount_token);
    let digest = keyed_mac(key, &message).finalize().into_bytes();
    base64::engine::general_purpose::STANDARD.encode(digest)
}

/// Verify a notification signature.
///
/// The salt must already be cleaned (see [`clean_salt`]). Undecodable
/// signatures are compared against a zero digest so the failure path costs
/// the same as a mismatch.
pub fn verify(
    order_reference: &str,
    status_token: &str,
    amount_token: &str,
    signature: &str,
    key: &[u8],
    salt: &str,
) -> bool {
    let message = canonical_message(order_reference, salt, status_token, amount_token);
    let mac = keyed_mac(key, &message);

    let expected = base64::engine::general_purpose::STANDARD
        .decode(signature.trim())
        .unwrap_or_else(|_| vec![0u8; 32]);

    // verify_slice compares in constant time
    mac.verify_slice(&expected).is_ok()
}

/// Normalize a provisioned salt: surrounding whitespace and any leading `=`
/// picked up from a mangled `KEY==value` line are removed.
pub fn clean_salt(raw: &str) -> String {
    raw.trim().trim_start_matches('=').to_string()
}
