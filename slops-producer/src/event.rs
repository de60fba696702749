use serde::{Deserialize, Serialize};

/// Maximum accepted request body size, in bytes.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// `POST /new` request body. Unknown fields are rejected outright so a
/// caller gets a clear 400 instead of silently-ignored fields.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct NewMessageRequest {
    pub key: String,
    pub body: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_fields() {
        let raw = r#"{"key": "a", "body": "b", "extra": 1}"#;
        let parsed: Result<NewMessageRequest, _> = serde_json::from_str(raw);
        assert!(parsed.is_err());
    }

    #[test]
    fn accepts_well_formed_request() {
        let raw = r#"{"key": "a", "body": "b"}"#;
        let parsed: NewMessageRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.key, "a");
        assert_eq!(parsed.body, "b");
    }
}
