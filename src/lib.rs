//! Auxiliary services for the Reserva room-booking API: directory-backed
//! authentication with local fallback, and mail dispatch.

#![forbid(unsafe_code)]

pub mod auth;
pub mod config;
pub mod directory;
pub mod error;
pub mod mail;
pub mod telemetry;
pub mod user;

pub use auth::{
    Authenticator, Capabilities, LdapAuthenticator, LoginContext, Options,
    ProfileDefaults, Session, Validation,
};
pub use directory::{Directory, DirectoryUser, LdapConfig, LdapDirectory};
pub use user::{
    AuthenticatedUserRecord, LocalUser, LocalUserStore, UserSynchronizer,
};

use crate::config::Configuration;
use crate::error::Result;

/// Assemble the directory authenticator from configuration and the
/// host-provided collaborators.
///
/// Returns `None` when no `ldap` section is configured.
pub fn ldap_authenticator(
    config: &Configuration,
    fallback: Box<dyn Authenticator>,
    synchronizer: Box<dyn UserSynchronizer>,
    users: Box<dyn LocalUserStore>,
) -> Option<LdapAuthenticator> {
    let ldap = config.ldap.as_ref()?;

    Some(LdapAuthenticator::new(
        Box::new(LdapDirectory::new(LdapConfig::from(ldap))),
        fallback,
        synchronizer,
        users,
        Options::from(ldap),
        ProfileDefaults::from(config),
    ))
}

/// Connect the mail manager, or fall back to the no-op one when no
/// `mail` section is configured.
pub async fn mail_manager(config: &Configuration) -> Result<mail::MailManager> {
    match &config.mail {
        Some(mail) => mail::MailManager::new(mail).await,
        None => Ok(mail::MailManager::default()),
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::error::Result;

    struct NoopFallback;

    #[async_trait]
    impl Authenticator for NoopFallback {
        async fn validate(&self, _: &str, _: &str) -> Result<bool> {
            Ok(false)
        }

        async fn login(
            &self,
            username: &str,
            _: &LoginContext,
        ) -> Result<Session> {
            Ok(Session {
                token: String::default(),
                username: username.to_owned(),
            })
        }

        async fn logout(&self, _: Session) -> Result<()> {
            Ok(())
        }
    }

    struct NoopSynchronizer;

    #[async_trait]
    impl UserSynchronizer for NoopSynchronizer {
        async fn synchronize(&self, _: AuthenticatedUserRecord) -> Result<()> {
            Ok(())
        }
    }

    struct NoopStore;

    #[async_trait]
    impl LocalUserStore for NoopStore {
        async fn load_by_username(&self, _: &str) -> Result<Option<LocalUser>> {
            Ok(None)
        }

        async fn update(&self, _: &LocalUser) -> Result<()> {
            Ok(())
        }
    }

    type Collaborators = (
        Box<dyn Authenticator>,
        Box<dyn UserSynchronizer>,
        Box<dyn LocalUserStore>,
    );

    fn collaborators() -> Collaborators {
        (
            Box::new(NoopFallback),
            Box::new(NoopSynchronizer),
            Box::new(NoopStore),
        )
    }

    #[test]
    fn test_ldap_authenticator_requires_configuration() {
        let (fallback, synchronizer, users) = collaborators();
        let auth = ldap_authenticator(
            &Configuration::default(),
            fallback,
            synchronizer,
            users,
        );
        assert!(auth.is_none());
    }

    #[test]
    fn test_ldap_authenticator_from_configuration() {
        let mut configuration = Configuration::default();
        configuration.ldap = Some(config::Ldap {
            address: "ldap://localhost:389".to_owned(),
            base_dn: "dc=example,dc=org".to_owned(),
            users_filter: "(uid={username})".to_owned(),
            ..Default::default()
        });

        let (fallback, synchronizer, users) = collaborators();
        let auth =
            ldap_authenticator(&configuration, fallback, synchronizer, users)
                .unwrap();
        assert!(!auth.capabilities().credentials_known);
    }

    #[tokio::test]
    async fn test_mail_manager_defaults_to_noop() {
        let mail = mail_manager(&Configuration::default()).await.unwrap();
        mail.publish_event(
            mail::Template::AccountActivation,
            "alice@example.org",
            None,
            serde_json::Value::Null,
        )
        .await;
    }
}
