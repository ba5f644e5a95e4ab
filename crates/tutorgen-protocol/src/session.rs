//! Session and identity types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Backend user identifier.
///
/// The backend emits integer ids while newer endpoints use UUID strings, so
/// both forms are accepted and kept as text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(i64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(text) => Self(text),
            Raw::Number(number) => Self(number.to_string()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub email: String,
    #[serde(default, alias = "display_name", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl UserProfile {
    /// Name to greet the user with; falls back to the email address.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.email)
    }
}

/// Current authenticated identity and credential.
///
/// `is_authenticated` is true exactly when `access_token` is present. Only
/// the session store builds authenticated values; everyone else holds
/// snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub is_authenticated: bool,
    pub user: Option<UserProfile>,
    pub access_token: Option<String>,
    pub token_expiry: Option<DateTime<Utc>>,
}

impl Session {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn authenticated(
        user: UserProfile,
        access_token: impl Into<String>,
        token_expiry: DateTime<Utc>,
    ) -> Self {
        Self {
            is_authenticated: true,
            user: Some(user),
            access_token: Some(access_token.into()),
            token_expiry: Some(token_expiry),
        }
    }

    /// Whether the flag and the credential agree.
    pub fn is_consistent(&self) -> bool {
        self.is_authenticated == self.access_token.is_some()
    }

    /// True when the session holds a credential that has not expired at `now`.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.is_authenticated
            && self.is_consistent()
            && self
                .access_token
                .as_deref()
                .is_some_and(|token| !token.is_empty())
            && self.token_expiry.is_some_and(|expiry| expiry > now)
    }

    /// Bearer credential, if any.
    pub fn bearer(&self) -> Option<&str> {
        self.access_token.as_deref()
    }
}
