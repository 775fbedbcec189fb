//! Directory-backed authentication with local fallback.
//!
//! [`LdapAuthenticator`] decorates any [`Authenticator`] (typically the
//! database-backed one): it validates credentials against the directory
//! first and keeps the local account store in sync with the directory
//! profile. All per-call state lives in [`Validation`], so one instance
//! can serve concurrent requests.

use async_trait::async_trait;
use rand::distributions::{Alphanumeric, DistString};
use rand::rngs::OsRng;

use crate::config;
use crate::directory::{Directory, DirectoryUser};
use crate::error::{Result, ServerError};
use crate::user::{AuthenticatedUserRecord, LocalUserStore, UserSynchronizer};

const GENERATED_PASSWORD_LENGTH: usize = 24;

/// Session handle issued by the fallback authenticator.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub token: String,
    pub username: String,
}

/// Per-request login data.
#[derive(Debug, Clone, Default)]
pub struct LoginContext {
    pub ip: Option<String>,
}

/// Port for an interchangeable authentication strategy.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Check credentials, `Ok(false)` on refusal.
    async fn validate(&self, username: &str, password: &str) -> Result<bool>;

    /// Open a session for an already validated user.
    async fn login(
        &self,
        username: &str,
        context: &LoginContext,
    ) -> Result<Session>;

    /// Close a session.
    async fn logout(&self, session: Session) -> Result<()>;
}

/// Directory options, immutable for the lifetime of the decorator.
#[derive(Debug, Clone)]
pub struct Options {
    /// DN for domain.
    pub base_dn: String,
    /// Search filter template, `{username}` is substituted per request.
    pub filter: String,
    /// Bind with the credentials presented by the user instead of the
    /// service account.
    pub bind_as_user: bool,
    /// Retry refused or unreachable directory logins against the
    /// fallback authenticator.
    pub retry_against_database: bool,
    /// Strip `@domain` suffixes and `DOMAIN\` prefixes from usernames.
    pub clean_username: bool,
    /// Log every authentication attempt at debug severity.
    pub debug: bool,
}

impl From<&config::Ldap> for Options {
    fn from(config: &config::Ldap) -> Self {
        Self {
            base_dn: config.base_dn.clone(),
            filter: config.users_filter.clone(),
            bind_as_user: config.bind_as_user,
            retry_against_database: config.retry_against_database,
            clean_username: config.clean_username,
            debug: config.debug,
        }
    }
}

/// Locale and timezone written to synchronized accounts.
#[derive(Debug, Clone)]
pub struct ProfileDefaults {
    pub locale: String,
    pub timezone: String,
}

impl From<&config::Configuration> for ProfileDefaults {
    fn from(config: &config::Configuration) -> Self {
        Self {
            locale: config.default_locale.clone(),
            timezone: config.default_timezone.clone(),
        }
    }
}

/// Which account fields may be edited locally.
///
/// Directory-sourced identity fields are read-only; a few profile
/// fields stay editable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub username_change: bool,
    pub email_change: bool,
    pub password_change: bool,
    pub name_change: bool,
    pub phone_change: bool,
    pub organization_change: bool,
    pub position_change: bool,
    pub credentials_known: bool,
}

const DIRECTORY_CAPABILITIES: Capabilities = Capabilities {
    username_change: false,
    email_change: false,
    password_change: false,
    name_change: false,
    phone_change: true,
    organization_change: true,
    position_change: true,
    credentials_known: false,
};

/// Outcome of one [`LdapAuthenticator::validate`] call.
///
/// Carries everything a following [`LdapAuthenticator::login`] needs:
/// the normalized username, the directory profile when one was
/// resolved, and the presented password when the fallback store must
/// keep a usable credential.
#[derive(Clone)]
pub struct Validation {
    granted: bool,
    username: String,
    user: Option<DirectoryUser>,
    password: Option<String>,
}

impl Validation {
    fn denied(username: String) -> Self {
        Self {
            granted: false,
            username,
            user: None,
            password: None,
        }
    }

    fn delegated(username: String, granted: bool) -> Self {
        Self {
            granted,
            username,
            user: None,
            password: None,
        }
    }

    fn granted(
        username: String,
        user: DirectoryUser,
        password: Option<String>,
    ) -> Self {
        Self {
            granted: true,
            username,
            user: Some(user),
            password,
        }
    }

    /// Whether the credentials were accepted.
    pub fn is_granted(&self) -> bool {
        self.granted
    }

    /// Username after normalization.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Directory profile resolved during validation, if any.
    pub fn directory_user(&self) -> Option<&DirectoryUser> {
        self.user.as_ref()
    }

    fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }
}

impl std::fmt::Debug for Validation {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Validation")
            .field("granted", &self.granted)
            .field("username", &self.username)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Authentication decorator over a [`Directory`].
pub struct LdapAuthenticator {
    directory: Box<dyn Directory>,
    fallback: Box<dyn Authenticator>,
    synchronizer: Box<dyn UserSynchronizer>,
    users: Box<dyn LocalUserStore>,
    options: Options,
    defaults: ProfileDefaults,
}

impl LdapAuthenticator {
    /// Create a new [`LdapAuthenticator`].
    pub fn new(
        directory: Box<dyn Directory>,
        fallback: Box<dyn Authenticator>,
        synchronizer: Box<dyn UserSynchronizer>,
        users: Box<dyn LocalUserStore>,
        options: Options,
        defaults: ProfileDefaults,
    ) -> Self {
        Self {
            directory,
            fallback,
            synchronizer,
            users,
            options,
            defaults,
        }
    }

    /// Capability table for directory-backed accounts.
    pub const fn capabilities(&self) -> Capabilities {
        DIRECTORY_CAPABILITIES
    }

    /// Normalize a username according to [`Options::clean_username`].
    ///
    /// `@` is handled before `\`, on the already reduced string:
    /// `DOMAIN\alice@example.com` becomes `DOMAIN\alice`, then `alice`.
    pub fn clean_username(&self, username: &str) -> String {
        if !self.options.clean_username {
            return username.to_owned();
        }
        strip_domain(username)
    }

    /// Check credentials against the directory.
    ///
    /// The fallback authenticator is consulted at most once per call,
    /// and only when [`Options::retry_against_database`] is set. A
    /// refusal is an `Ok` outcome; only an unreachable directory
    /// without fallback is an error.
    pub async fn validate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Validation> {
        let username = self.clean_username(username);

        if self.options.bind_as_user {
            let bind_dn = format!("uid={},{}", username, self.options.base_dn);
            if !self
                .directory
                .connect(Some(&bind_dn), Some(password))
                .await?
            {
                if self.options.retry_against_database {
                    let granted =
                        self.fallback.validate(&username, password).await?;
                    return Ok(Validation::delegated(username, granted));
                }
                return Ok(Validation::denied(username));
            }
        } else if !self.directory.connect(None, None).await? {
            return Err(ServerError::DirectoryUnreachable);
        }

        let authenticated = self
            .directory
            .authenticate(&username, password, &self.options.filter)
            .await?;

        if self.options.debug {
            tracing::debug!(
                user = %username,
                success = authenticated,
                "directory authentication attempt"
            );
        }

        if !authenticated {
            if self.options.retry_against_database {
                let granted =
                    self.fallback.validate(&username, password).await?;
                return Ok(Validation::delegated(username, granted));
            }
            return Ok(Validation::denied(username));
        }

        match self.directory.get_directory_user(&username).await? {
            Some(user) => {
                let retained = self
                    .options
                    .retry_against_database
                    .then(|| password.to_owned());
                Ok(Validation::granted(username, user, retained))
            },
            None => {
                tracing::error!(
                    user = %username,
                    "authenticated but directory has no profile"
                );
                Ok(Validation::denied(username))
            },
        }
    }

    /// Open a session for a validated user.
    ///
    /// Synchronizes the local account when `validation` resolved a
    /// directory profile, then reactivates the account. The local
    /// account must already exist; it is never created here.
    pub async fn login(
        &self,
        username: &str,
        validation: Option<&Validation>,
        context: &LoginContext,
    ) -> Result<Session> {
        let username = self.clean_username(username);

        if let Some(validation) = validation {
            if validation.directory_user().is_some() {
                self.synchronize(validation).await?;
            }
        }

        let mut user = self
            .users
            .load_by_username(&username)
            .await?
            .ok_or_else(|| ServerError::UserNotFound(username.clone()))?;

        // Idempotent touch to guarantee active status.
        user.deactivate();
        user.activate();
        self.users.update(&user).await?;

        self.fallback.login(&username, context).await
    }

    /// Close a session.
    pub async fn logout(&self, session: Session) -> Result<()> {
        self.fallback.logout(session).await
    }

    /// Copy the directory profile into the local store.
    ///
    /// The stored password is the one presented at validation time when
    /// the fallback store must stay usable, a fresh random one
    /// otherwise.
    async fn synchronize(&self, validation: &Validation) -> Result<()> {
        let Some(profile) = validation.directory_user() else {
            return Ok(());
        };

        let password = match validation.password() {
            Some(password) => password.to_owned(),
            None => random_password(),
        };

        let record = AuthenticatedUserRecord::from_profile(
            validation.username(),
            profile,
            password,
            &self.defaults.locale,
            &self.defaults.timezone,
        );

        self.synchronizer.synchronize(record).await
    }
}

/// Strip `@domain` suffixes, then `DOMAIN\` prefixes.
///
/// Both checks run in sequence on the possibly already reduced string;
/// the order is part of the contract.
fn strip_domain(username: &str) -> String {
    let mut name = username;
    if let Some((prefix, _)) = name.split_once('@') {
        name = prefix;
    }
    if let Some((_, suffix)) = name.split_once('\\') {
        name = suffix;
    }
    name.to_owned()
}

fn random_password() -> String {
    Alphanumeric.sample_string(&mut OsRng, GENERATED_PASSWORD_LENGTH)
}
