use serde::{Deserialize, Serialize};

/// The durable handle for a person as seen on one external platform.
///
/// Uniqueness is (platform, external_subject_id); the optional `user_id`
/// link is set at most once to a non-conflicting target, either by the
/// bind-code flow or by an admin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelIdentity {
    pub id: String,
    /// Lowercase platform tag (e.g. "feishu", "telegram", "webchat").
    pub platform: String,
    /// Platform-native subject id (chat member id, open id, …).
    pub external_subject_id: String,
    /// Weak reference to the internal user, once linked.
    pub user_id: Option<String>,
    pub display_name: String,
    pub created_at: String,
    pub updated_at: String,
}

/// A one-time token that links a channel identity to its issuer user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindCode {
    pub id: String,
    /// 8-character uppercase alphanumeric, unique.
    pub token: String,
    pub issuer_user_id: String,
    /// When set, only identities on this platform may consume the code.
    pub platform: Option<String>,
    pub expires_at: String,
    pub used_at: Option<String>,
    pub used_by_identity_id: Option<String>,
    pub created_at: String,
}

impl BindCode {
    pub fn is_used(&self) -> bool {
        self.used_at.is_some()
    }

    pub fn is_expired_at(&self, now_rfc3339: &str) -> bool {
        self.expires_at.as_str() <= now_rfc3339
    }
}
