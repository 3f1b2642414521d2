//! Security tokens issued by an identity authority.
//!
//! This module provides:
//! - [`TokenType`] - The kind of token, with its stable numeric value
//! - [`Token`] - A typed token value bound to a target identity
//! - [`TokenPair`] - The access/refresh pair returned by a token endpoint
//! - [`TokenError`] - Validation, conversion and parse failures
//!
//! # Binary Format
//!
//! Tokens persisted to an OS keychain use a 20 byte preamble followed by
//! the UTF-8 value:
//!
//! ```text
//! [type: i32 little-endian][target identity: 16 byte GUID layout][value...]
//! ```
//!
//! Payloads written before the preamble existed are the bare UTF-8 value,
//! so decoding falls back to that form whenever the preamble does not fit.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::model::{Credential, PASSWORD_MAX_LENGTH};

const SIZEOF_TOKEN_TYPE: usize = 4;
const SIZEOF_GUID: usize = 16;
const PREAMBLE: usize = SIZEOF_TOKEN_TYPE + SIZEOF_GUID;

/// Error type for token operations.
#[derive(Debug, Error)]
pub enum TokenError {
    /// The token value is blank.
    #[error("the value of the token cannot be empty")]
    EmptyValue,

    /// The token value exceeds the storage limit.
    #[error("the value of the token cannot be longer than {max} characters")]
    TooLong { max: usize },

    /// Only personal access tokens can stand in for a password.
    #[error("tokens of type {token_type} cannot be converted to credentials")]
    NotConvertible { token_type: TokenType },

    /// A token type name or number was not recognized.
    #[error("unexpected token type {name:?}")]
    UnknownType { name: String },

    /// A token endpoint response could not be parsed.
    #[error("invalid token response: {message}")]
    InvalidResponse { message: String },

    /// JSON decoding failed.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// The kind of a security token.
///
/// The discriminants are part of the persisted binary format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum TokenType {
    Unknown = 0,
    /// Short-lived OAuth access token.
    Access = 1,
    /// OAuth refresh token.
    Refresh = 2,
    /// Personal access token generated by the hosting service.
    Personal = 3,
    /// Token issued by a federated identity provider.
    Federated = 4,
    Test = 5,
}

impl TokenType {
    pub const ALL: [TokenType; 6] = [
        TokenType::Unknown,
        TokenType::Access,
        TokenType::Refresh,
        TokenType::Personal,
        TokenType::Federated,
        TokenType::Test,
    ];

    pub fn value(self) -> i32 {
        self as i32
    }

    pub fn from_value(value: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.value() == value)
    }

    /// Human readable description, if the type has one.
    pub fn description(self) -> Option<&'static str> {
        match self {
            Self::Unknown => None,
            Self::Access => Some("Azure Directory Access Token"),
            Self::Refresh => Some("Azure Directory Refresh Token"),
            Self::Personal => Some("Personal Access Token"),
            Self::Federated => Some("Federated Authentication Token"),
            Self::Test => Some("Test-only Token"),
        }
    }

    /// The description, or the variant name when there is none.
    pub fn friendly_name(self) -> &'static str {
        self.description().unwrap_or_else(|| self.name())
    }

    /// Variant name, as written to the XML store.
    pub fn name(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Access => "Access",
            Self::Refresh => "Refresh",
            Self::Personal => "Personal",
            Self::Federated => "Federated",
            Self::Test => "Test",
        }
    }

    /// Reverse of [`TokenType::friendly_name`], case-insensitive.
    pub fn from_friendly_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.friendly_name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TokenType {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| TokenError::UnknownType {
                name: s.to_string(),
            })
    }
}

/// A security token.
///
/// Equality compares type, value and target identity. The value never
/// appears in `Debug` output.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Token {
    token_type: TokenType,
    value: String,
    target_identity: Uuid,
}

impl Token {
    /// Create a token with a nil target identity.
    pub fn new(value: impl Into<String>, token_type: TokenType) -> Self {
        Self {
            token_type,
            value: value.into(),
            target_identity: Uuid::nil(),
        }
    }

    /// Bind the token to the identity of the resource it was issued for.
    pub fn with_target_identity(mut self, target_identity: Uuid) -> Self {
        self.target_identity = target_identity;
        self
    }

    pub fn token_type(&self) -> TokenType {
        self.token_type
    }

    /// Expose the raw token value. Never log the result.
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn target_identity(&self) -> Uuid {
        self.target_identity
    }

    /// Check the value is present and within the storage limit.
    pub fn validate(&self) -> Result<(), TokenError> {
        if self.value.trim().is_empty() {
            return Err(TokenError::EmptyValue);
        }
        if self.value.chars().count() > PASSWORD_MAX_LENGTH {
            return Err(TokenError::TooLong {
                max: PASSWORD_MAX_LENGTH,
            });
        }
        Ok(())
    }

    /// Convert a personal access token into a credential git can send.
    ///
    /// The username is the token type's friendly name; the password is the value.
    pub fn to_credential(&self) -> Result<Credential, TokenError> {
        match self.token_type {
            TokenType::Personal => Ok(Credential::new(
                self.token_type.friendly_name(),
                self.value.clone(),
            )),
            other => Err(TokenError::NotConvertible { token_type: other }),
        }
    }

    /// Encode as `[type][target identity][utf-8 value]`.
    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(PREAMBLE + self.value.len());
        bytes.extend_from_slice(&self.token_type.value().to_le_bytes());
        bytes.extend_from_slice(&self.target_identity.to_bytes_le());
        bytes.extend_from_slice(self.value.as_bytes());
        bytes
    }

    /// Decode a payload expected to hold a token of `expected` type.
    ///
    /// The structured form is used only when the payload is longer than the
    /// preamble, its type field equals `expected` and the value is not blank.
    /// Anything else is decoded as a legacy payload: the whole buffer is the
    /// value and the target identity is nil. Returns `None` when the result
    /// would be blank.
    pub fn deserialize(bytes: &[u8], expected: TokenType) -> Option<Token> {
        if bytes.len() > PREAMBLE {
            let mut type_bytes = [0u8; SIZEOF_TOKEN_TYPE];
            type_bytes.copy_from_slice(&bytes[..SIZEOF_TOKEN_TYPE]);
            let read_type = TokenType::from_value(i32::from_le_bytes(type_bytes));

            if read_type == Some(expected) {
                let mut guid_bytes = [0u8; SIZEOF_GUID];
                guid_bytes.copy_from_slice(&bytes[SIZEOF_TOKEN_TYPE..PREAMBLE]);
                let value = String::from_utf8_lossy(&bytes[PREAMBLE..]);

                if !value.trim().is_empty() {
                    return Some(
                        Token::new(value.into_owned(), expected)
                            .with_target_identity(Uuid::from_bytes_le(guid_bytes)),
                    );
                }
            }
        }

        let value = String::from_utf8_lossy(bytes);
        if value.trim().is_empty() {
            None
        } else {
            Some(Token::new(value.into_owned(), expected))
        }
    }

    /// Read the type field of a structured payload, if one is present.
    pub fn peek_type(bytes: &[u8]) -> Option<TokenType> {
        if bytes.len() <= PREAMBLE {
            return None;
        }
        let mut type_bytes = [0u8; SIZEOF_TOKEN_TYPE];
        type_bytes.copy_from_slice(&bytes[..SIZEOF_TOKEN_TYPE]);
        TokenType::from_value(i32::from_le_bytes(type_bytes))
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("token_type", &self.token_type)
            .field("value", &"[REDACTED]")
            .field("target_identity", &self.target_identity)
            .finish()
    }
}

/// Access and refresh tokens returned together by a token endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: Token,
    pub refresh_token: Token,
    /// Every other member of the response, stringified.
    pub parameters: HashMap<String, String>,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: Token::new(access_token, TokenType::Access),
            refresh_token: Token::new(refresh_token, TokenType::Refresh),
            parameters: HashMap::new(),
        }
    }

    /// Parse a token endpoint response body.
    pub fn from_json(body: &str) -> Result<Self, TokenError> {
        let members: serde_json::Map<String, serde_json::Value> = serde_json::from_str(body)?;

        let mut access_token = None;
        let mut refresh_token = None;
        let mut parameters = HashMap::new();

        for (name, value) in members {
            let text = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            match name.as_str() {
                "access_token" => access_token = Some(text),
                "refresh_token" => refresh_token = Some(text),
                _ => {
                    parameters.insert(name, text);
                }
            }
        }

        let access_token = access_token.ok_or_else(|| TokenError::InvalidResponse {
            message: "missing access_token".to_string(),
        })?;
        let refresh_token = refresh_token.ok_or_else(|| TokenError::InvalidResponse {
            message: "missing refresh_token".to_string(),
        })?;

        let mut pair = TokenPair::new(access_token, refresh_token);
        pair.parameters = parameters;
        Ok(pair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> Uuid {
        Uuid::parse_str("6e8b1b1e-0b4f-4c31-9a3e-2f0c4b7f2d11").unwrap()
    }

    #[test]
    fn test_serialize_layout() {
        let token = Token::new("abc", TokenType::Personal).with_target_identity(identity());
        let bytes = token.serialize();

        assert_eq!(bytes.len(), 23);
        assert_eq!(&bytes[..4], &[3, 0, 0, 0]);
        assert_eq!(&bytes[4..20], &identity().to_bytes_le());
        assert_eq!(&bytes[20..], b"abc");
    }

    #[test]
    fn test_round_trip_preserves_identity() {
        for token_type in [TokenType::Access, TokenType::Refresh, TokenType::Personal] {
            let token = Token::new("token-value", token_type).with_target_identity(identity());
            let decoded = Token::deserialize(&token.serialize(), token_type).unwrap();
            assert_eq!(decoded, token);
        }
    }

    #[test]
    fn test_legacy_payload_decodes_whole_buffer() {
        let legacy = b"a-legacy-refresh-token-value-without-preamble";
        let decoded = Token::deserialize(legacy, TokenType::Refresh).unwrap();

        assert_eq!(decoded.value(), "a-legacy-refresh-token-value-without-preamble");
        assert_eq!(decoded.token_type(), TokenType::Refresh);
        assert!(decoded.target_identity().is_nil());
    }

    #[test]
    fn test_short_payload_is_legacy() {
        let decoded = Token::deserialize(b"short", TokenType::Personal).unwrap();
        assert_eq!(decoded.value(), "short");
        assert!(decoded.target_identity().is_nil());
    }

    #[test]
    fn test_type_mismatch_falls_back_to_legacy() {
        let token = Token::new("value", TokenType::Access);
        let bytes = token.serialize();

        let decoded = Token::deserialize(&bytes, TokenType::Refresh).unwrap();
        assert_eq!(decoded.token_type(), TokenType::Refresh);
        assert!(decoded.target_identity().is_nil());
        assert_eq!(decoded.value().as_bytes(), bytes.as_slice());
    }

    #[test]
    fn test_blank_payload_is_none() {
        assert!(Token::deserialize(b"   ", TokenType::Personal).is_none());
    }

    #[test]
    fn test_peek_type() {
        let bytes = Token::new("value", TokenType::Federated).serialize();
        assert_eq!(Token::peek_type(&bytes), Some(TokenType::Federated));
        assert_eq!(Token::peek_type(b"tiny"), None);
    }

    #[test]
    fn test_validate() {
        assert!(Token::new("ok", TokenType::Access).validate().is_ok());
        assert!(matches!(
            Token::new("  ", TokenType::Access).validate(),
            Err(TokenError::EmptyValue)
        ));
        assert!(matches!(
            Token::new("x".repeat(PASSWORD_MAX_LENGTH + 1), TokenType::Access).validate(),
            Err(TokenError::TooLong { .. })
        ));
    }

    #[test]
    fn test_to_credential_personal_only() {
        let pat = Token::new("pat-value", TokenType::Personal);
        let credential = pat.to_credential().unwrap();
        assert_eq!(credential.username(), "Personal Access Token");
        assert_eq!(credential.password(), "pat-value");

        let access = Token::new("access", TokenType::Access);
        assert!(matches!(
            access.to_credential(),
            Err(TokenError::NotConvertible {
                token_type: TokenType::Access
            })
        ));
    }

    #[test]
    fn test_equality_includes_identity() {
        let a = Token::new("v", TokenType::Personal);
        let b = Token::new("v", TokenType::Personal).with_target_identity(identity());
        assert_ne!(a, b);
        assert_eq!(a, Token::new("v", TokenType::Personal));
    }

    #[test]
    fn test_type_names() {
        assert_eq!("Personal".parse::<TokenType>().unwrap(), TokenType::Personal);
        assert!("personal".parse::<TokenType>().is_err());
        assert_eq!(
            TokenType::from_friendly_name("azure directory refresh token"),
            Some(TokenType::Refresh)
        );
        assert_eq!(TokenType::Unknown.friendly_name(), "Unknown");
    }

    #[test]
    fn test_token_pair_from_json() {
        let body = r#"{
            "token_type": "Bearer",
            "expires_in": 3599,
            "access_token": "access-value",
            "refresh_token": "refresh-value",
            "resource": "499b84ac-1321-427f-aa17-267ca6975798"
        }"#;
        let pair = TokenPair::from_json(body).unwrap();

        assert_eq!(pair.access_token, Token::new("access-value", TokenType::Access));
        assert_eq!(pair.refresh_token, Token::new("refresh-value", TokenType::Refresh));
        assert_eq!(pair.parameters.get("expires_in").unwrap(), "3599");
        assert_eq!(pair.parameters.get("token_type").unwrap(), "Bearer");
    }

    #[test]
    fn test_token_pair_requires_both_tokens() {
        let result = TokenPair::from_json(r#"{"access_token": "only"}"#);
        assert!(matches!(result, Err(TokenError::InvalidResponse { .. })));
    }
}
