use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::error::ManualEntryError;

/// Token bundle minted by the admin UI.
///
/// Both delivery paths carry this exact record: the callback posts it as a
/// JSON body, the manual path pastes it as base64 of the same JSON. Fields
/// beyond the ones the CLI reads are kept in `extra` so nothing the provider
/// sends is lost on the way to storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialPayload {
    pub access_token: String,
    pub id_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Unix seconds.
    pub expires_at: i64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CredentialPayload {
    pub fn expires_at_utc(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.expires_at, 0).single()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at_utc() {
            Some(expires_at) => now >= expires_at,
            None => true,
        }
    }
}

/// Decode a token pasted from the browser: base64 of the JSON record.
pub fn decode_pasted(text: &str) -> Result<CredentialPayload, ManualEntryError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ManualEntryError::Empty);
    }

    let bytes = STANDARD.decode(text)?;
    let payload = serde_json::from_slice(&bytes)?;
    Ok(payload)
}

pub fn encode_pasted(payload: &CredentialPayload) -> Result<String, serde_json::Error> {
    let json = serde_json::to_vec(payload)?;
    Ok(STANDARD.encode(json))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample() -> CredentialPayload {
        CredentialPayload {
            access_token: "abc".into(),
            id_token: "def".into(),
            refresh_token: None,
            expires_at: 1234567890,
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn decode_known_paste() {
        let pasted = STANDARD.encode(r#"{"accessToken":"abc","idToken":"def","expiresAt":1234567890}"#);
        let payload = decode_pasted(&pasted).unwrap();
        assert_eq!(payload, sample());
    }

    #[test]
    fn decode_tolerates_surrounding_whitespace() {
        let pasted = format!("  {}\n", encode_pasted(&sample()).unwrap());
        assert_eq!(decode_pasted(&pasted).unwrap(), sample());
    }

    #[test]
    fn decode_rejects_invalid_base64() {
        let err = decode_pasted("not-base64!!").unwrap_err();
        assert!(matches!(err, ManualEntryError::Decode(_)));
    }

    #[test]
    fn decode_rejects_non_record_json() {
        let pasted = STANDARD.encode(r#"{"accessToken":"abc"}"#);
        let err = decode_pasted(&pasted).unwrap_err();
        assert!(matches!(err, ManualEntryError::Parse(_)));

        let pasted = STANDARD.encode("definitely not json");
        let err = decode_pasted(&pasted).unwrap_err();
        assert!(matches!(err, ManualEntryError::Parse(_)));
    }

    #[test]
    fn decode_rejects_blank_input() {
        assert!(matches!(
            decode_pasted("   \n").unwrap_err(),
            ManualEntryError::Empty
        ));
    }

    #[test]
    fn provider_fields_survive_reencoding() {
        let json = r#"{"accessToken":"a","idToken":"i","refreshToken":"r","expiresAt":42,"IdentityId":"us-east-1:xyz","region":"us-east-1"}"#;
        let payload: CredentialPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.refresh_token.as_deref(), Some("r"));
        assert_eq!(payload.extra["IdentityId"], "us-east-1:xyz");

        let decoded = decode_pasted(&encode_pasted(&payload).unwrap()).unwrap();
        assert_eq!(decoded, payload);
        assert_eq!(
            serde_json::to_value(&decoded).unwrap(),
            serde_json::from_str::<serde_json::Value>(json).unwrap()
        );
    }

    #[test]
    fn missing_refresh_token_is_not_serialized() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert!(!json.contains("refreshToken"));
    }

    #[test]
    fn expiry_window() {
        let now = Utc::now();
        let mut payload = sample();
        payload.expires_at = (now + Duration::hours(1)).timestamp();
        assert!(!payload.is_expired_at(now));

        payload.expires_at = (now - Duration::seconds(1)).timestamp();
        assert!(payload.is_expired_at(now));
    }
}
