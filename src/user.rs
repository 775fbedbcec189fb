//! Local account types and persistence contracts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::directory::DirectoryUser;
use crate::error::Result;

/// User as saved on the local store.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalUser {
    pub id: String,
    pub username: String,
    pub email: String,
    pub locale: String,
    /// Whether the account may log in.
    pub active: bool,
}

impl LocalUser {
    /// Mark the account active.
    pub fn activate(&mut self) {
        self.active = true;
    }

    /// Mark the account inactive.
    pub fn deactivate(&mut self) {
        self.active = false;
    }
}

/// Directory profile ready to be copied into the local store.
///
/// Built once per login from the validation outcome and handed to the
/// [`UserSynchronizer`] by value.
#[derive(Clone, PartialEq)]
pub struct AuthenticatedUserRecord {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub institution: String,
    pub title: String,
    pub password: String,
    pub language: String,
    pub timezone: String,
    /// Group DNs in directory order.
    pub groups: Vec<String>,
}

impl AuthenticatedUserRecord {
    /// Assemble a record from a directory profile.
    pub fn from_profile(
        username: impl Into<String>,
        profile: &DirectoryUser,
        password: impl Into<String>,
        language: impl Into<String>,
        timezone: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            email: profile.email.clone(),
            first_name: profile.first_name.clone(),
            last_name: profile.last_name.clone(),
            phone: profile.phone.clone(),
            institution: profile.institution.clone(),
            title: profile.title.clone(),
            password: password.into(),
            language: language.into(),
            timezone: timezone.into(),
            groups: profile.groups.clone(),
        }
    }
}

impl std::fmt::Debug for AuthenticatedUserRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("AuthenticatedUserRecord")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .field("phone", &self.phone)
            .field("institution", &self.institution)
            .field("title", &self.title)
            .field("password", &"<redacted>")
            .field("language", &self.language)
            .field("timezone", &self.timezone)
            .field("groups", &self.groups)
            .finish()
    }
}

/// Port for copying directory profiles into the local store.
///
/// Implementations must be idempotent: create the account when missing,
/// update it otherwise.
#[async_trait]
pub trait UserSynchronizer: Send + Sync {
    async fn synchronize(&self, record: AuthenticatedUserRecord)
    -> Result<()>;
}

/// Port for the local account store.
#[async_trait]
pub trait LocalUserStore: Send + Sync {
    /// Find an account using its `username` field.
    async fn load_by_username(
        &self,
        username: &str,
    ) -> Result<Option<LocalUser>>;

    /// Update an account.
    async fn update(&self, user: &LocalUser) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activation_flag() {
        let mut user = LocalUser::default();
        assert!(!user.active);
        user.activate();
        assert!(user.active);
        user.deactivate();
        assert!(!user.active);
    }

    #[test]
    fn test_record_debug_redacts_password() {
        let profile = DirectoryUser {
            email: "alice@example.org".to_owned(),
            ..Default::default()
        };
        let record = AuthenticatedUserRecord::from_profile(
            "alice",
            &profile,
            "hunter2",
            "en",
            "UTC",
        );

        let printed = format!("{record:?}");
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("alice@example.org"));
    }
}
