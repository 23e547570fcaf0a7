use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Caller identity as vouched for by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
    pub email_verified: bool,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            email_verified: true,
        }
    }
}

/// Local view of a user; only `banned_until` is owned by this service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub display_name: String,
    pub banned_until: Option<DateTime<Utc>>,
}

impl User {
    /// Returns the ban expiry if the ban is still in force at `now`.
    pub fn active_ban(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.banned_until.filter(|until| *until > now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn ban_expires_at_its_deadline() {
        let now = Utc::now();
        let mut user = User {
            id: "u1".into(),
            display_name: "Linh".into(),
            banned_until: None,
        };
        assert_eq!(user.active_ban(now), None);

        user.banned_until = Some(now + Duration::days(1));
        assert_eq!(user.active_ban(now), user.banned_until);

        // a ban ending exactly now no longer applies
        user.banned_until = Some(now);
        assert_eq!(user.active_ban(now), None);
    }
}
