//! User identity and the session credential.
//!
//! A [`Credential`] is the opaque bearer token handed out by the auth
//! endpoints. The same token authorizes REST calls and the realtime
//! handshake.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Profile fields announced in the `setup` handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(alias = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostel: Option<String>,
}

impl UserProfile {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: String::new(),
            room_number: None,
            hostel: None,
        }
    }

    /// Name of the per-user channel the server pushes to.
    pub fn channel(&self) -> String {
        format!("user:{}", self.id)
    }
}

/// An opaque bearer token.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Credential(String);

impl Credential {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Value for an `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

// Tokens end up in logs through `{:?}` far too easily.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(..)")
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Credential {
    type Err = CredentialParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim();
        if token.is_empty() {
            return Err(CredentialParseError::Empty);
        }
        if token.chars().any(char::is_whitespace) {
            return Err(CredentialParseError::Whitespace);
        }
        Ok(Self(token.to_string()))
    }
}

impl TryFrom<String> for Credential {
    type Error = CredentialParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Credential> for String {
    fn from(c: Credential) -> Self {
        c.0
    }
}

/// Error parsing a credential string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialParseError {
    #[error("credential cannot be empty")]
    Empty,
    #[error("credential cannot contain whitespace")]
    Whitespace,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_trims_surrounding_space() {
        let c: Credential = "  abc.def.ghi\n".parse().unwrap();
        assert_eq!(c.as_str(), "abc.def.ghi");
        assert_eq!(c.bearer(), "Bearer abc.def.ghi");
    }

    #[test]
    fn rejects_empty_and_inner_whitespace() {
        assert_eq!("   ".parse::<Credential>(), Err(CredentialParseError::Empty));
        assert_eq!("a b".parse::<Credential>(), Err(CredentialParseError::Whitespace));
    }

    #[test]
    fn debug_hides_token() {
        let c: Credential = "secret".parse().unwrap();
        assert_eq!(format!("{c:?}"), "Credential(..)");
    }

    #[test]
    fn profile_accepts_mongo_style_id() {
        let p: UserProfile =
            serde_json::from_str(r#"{"_id":"u1","name":"Asha","roomNumber":"B-204"}"#).unwrap();
        assert_eq!(p.id, "u1");
        assert_eq!(p.room_number.as_deref(), Some("B-204"));
        assert_eq!(p.channel(), "user:u1");
    }
}
