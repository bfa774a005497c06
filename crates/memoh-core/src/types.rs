use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// User role: admins manage users, bots and schedules; members own their
/// personal bots and may be granted access to shared ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    #[default]
    Member,
}

impl UserRole {
    pub fn is_admin(&self) -> bool {
        matches!(self, UserRole::Admin)
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserRole::Admin => f.write_str("admin"),
            UserRole::Member => f.write_str("member"),
        }
    }
}

impl FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "admin" => Ok(UserRole::Admin),
            "member" => Ok(UserRole::Member),
            other => Err(format!("unknown user role: {other}")),
        }
    }
}

/// Bot ownership model: personal bots serve only their owner; shared bots
/// may be read by any active member when the route policy allows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BotKind {
    #[default]
    Personal,
    Shared,
}

impl fmt::Display for BotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BotKind::Personal => f.write_str("personal"),
            BotKind::Shared => f.write_str("shared"),
        }
    }
}

impl FromStr for BotKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "personal" => Ok(BotKind::Personal),
            "shared" => Ok(BotKind::Shared),
            other => Err(format!("unknown bot kind: {other}")),
        }
    }
}

/// The closed set of provider client types the agent gateway understands.
///
/// Anything a model/settings row carries is normalized into one of these
/// before the envelope is composed; an unrecognized tag is a config error
/// surfaced by the resolver, not silently passed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Openai,
    Anthropic,
    Google,
}

impl Provider {
    /// Case-insensitive parse with common alias folding ("gemini" is the
    /// tag several upstream model lists use for Google models).
    pub fn normalize(tag: &str) -> Option<Provider> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "openai" => Some(Provider::Openai),
            "anthropic" => Some(Provider::Anthropic),
            "google" | "gemini" => Some(Provider::Google),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Openai => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Google => "google",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_normalize_is_case_insensitive() {
        assert_eq!(Provider::normalize("Anthropic"), Some(Provider::Anthropic));
        assert_eq!(Provider::normalize(" OPENAI "), Some(Provider::Openai));
        assert_eq!(Provider::normalize("gemini"), Some(Provider::Google));
        assert_eq!(Provider::normalize("cohere"), None);
    }

    #[test]
    fn role_round_trips_through_display() {
        for role in [UserRole::Admin, UserRole::Member] {
            assert_eq!(role.to_string().parse::<UserRole>().unwrap(), role);
        }
    }
}
