//! Telegram Mini-App `initData` validation.
//!
//! Telegram signs the init data with HMAC-SHA256: the secret key is
//! HMAC-SHA256("WebAppData", bot_token) and the signature covers the
//! sorted `key=value` pairs joined with newlines, excluding `hash` itself.
//! Without a configured bot token the data is parsed but not verified,
//! which is the local-development mode the original client relies on.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::error::ApiError;

type HmacSha256 = Hmac<Sha256>;

/// The `user` payload embedded in initData.
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

/// Parse the urlencoded initData string and, when a bot token is configured,
/// verify its signature. Returns the embedded Telegram user.
pub fn parse_and_verify(
    init_data: &str,
    bot_token: Option<&str>,
) -> Result<TelegramUser, ApiError> {
    let mut pairs: Vec<(String, String)> = Vec::new();
    let mut hash: Option<String> = None;

    for part in init_data.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = part.split_once('=').unwrap_or((part, ""));
        let key = urlencoding::decode(key)
            .map_err(|_| ApiError::InvalidTelegramData)?
            .into_owned();
        let value = urlencoding::decode(value)
            .map_err(|_| ApiError::InvalidTelegramData)?
            .into_owned();
        if key == "hash" {
            hash = Some(value);
        } else {
            pairs.push((key, value));
        }
    }

    if let Some(token) = bot_token {
        let hash = hash.ok_or(ApiError::InvalidTelegramData)?;
        if !constant_eq(&signature(&pairs, token), &hash) {
            return Err(ApiError::InvalidTelegramData);
        }
    }

    let user_json = pairs
        .iter()
        .find(|(key, _)| key == "user")
        .map(|(_, value)| value.as_str())
        .ok_or(ApiError::InvalidTelegramData)?;

    serde_json::from_str(user_json).map_err(|_| ApiError::InvalidTelegramData)
}

fn signature(pairs: &[(String, String)], bot_token: &str) -> String {
    let mut sorted: Vec<&(String, String)> = pairs.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    let check_string = sorted
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("\n");

    let secret = HmacSha256::new_from_slice(b"WebAppData")
        .expect("HMAC accepts any key length")
        .chain_update(bot_token.as_bytes())
        .finalize()
        .into_bytes();

    let mut mac = HmacSha256::new_from_slice(&secret).expect("HMAC accepts any key length");
    mac.update(check_string.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Hex digests have a fixed length, so a simple constant-time fold suffices.
fn constant_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOT_TOKEN: &str = "12345:test-token";

    /// Build a signed initData string the way Telegram would.
    fn signed_init_data(user_json: &str) -> String {
        let pairs = vec![
            ("auth_date".to_string(), "1700000000".to_string()),
            ("query_id".to_string(), "AAE1".to_string()),
            ("user".to_string(), user_json.to_string()),
        ];
        let hash = signature(&pairs, BOT_TOKEN);
        format!(
            "auth_date=1700000000&query_id=AAE1&user={}&hash={}",
            urlencoding::encode(user_json),
            hash
        )
    }

    #[test]
    fn valid_signature_yields_user() {
        let data = signed_init_data(r#"{"id":42,"first_name":"Ana","username":"ana42"}"#);
        let user = parse_and_verify(&data, Some(BOT_TOKEN)).unwrap();
        assert_eq!(user.id, 42);
        assert_eq!(user.first_name, "Ana");
        assert_eq!(user.username.as_deref(), Some("ana42"));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let data = signed_init_data(r#"{"id":42,"first_name":"Ana"}"#);
        let tampered = data.replace("auth_date=1700000000", "auth_date=1700009999");
        assert!(parse_and_verify(&tampered, Some(BOT_TOKEN)).is_err());
    }

    #[test]
    fn wrong_bot_token_is_rejected() {
        let data = signed_init_data(r#"{"id":42,"first_name":"Ana"}"#);
        assert!(parse_and_verify(&data, Some("999:other-token")).is_err());
    }

    #[test]
    fn missing_hash_fails_when_verification_is_on() {
        let user = urlencoding::encode(r#"{"id":42,"first_name":"Ana"}"#).into_owned();
        let data = format!("auth_date=1&user={user}");
        assert!(parse_and_verify(&data, Some(BOT_TOKEN)).is_err());
        // ...but parses in dev mode without a bot token.
        let parsed = parse_and_verify(&data, None).unwrap();
        assert_eq!(parsed.id, 42);
    }

    #[test]
    fn missing_user_field_is_invalid() {
        assert!(parse_and_verify("auth_date=1&query_id=x", None).is_err());
    }
}
