//! LDAP support.

use async_trait::async_trait;
use ldap3::{Ldap as Ldap3, LdapConnAsync, LdapError, Scope, SearchEntry};

use crate::config;
use crate::error::Result;

/// LDAP result code for rejected credentials.
const RC_INVALID_CREDENTIALS: u32 = 49;

/// Attributes fetched for a user profile.
const PROFILE_ATTRS: [&str; 7] =
    ["mail", "givenName", "sn", "telephoneNumber", "o", "title", "memberOf"];

/// Profile snapshot returned by the directory.
///
/// Owned by one validation call, never cached across calls.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DirectoryUser {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub institution: String,
    pub title: String,
    /// Group DNs in directory order.
    pub groups: Vec<String>,
}

impl DirectoryUser {
    fn from_entry(entry: &SearchEntry) -> Self {
        Self {
            email: attr_first(entry, "mail"),
            first_name: attr_first(entry, "givenName"),
            last_name: attr_first(entry, "sn"),
            phone: attr_first(entry, "telephoneNumber"),
            institution: attr_first(entry, "o"),
            title: attr_first(entry, "title"),
            groups: entry
                .attrs
                .get("memberOf")
                .cloned()
                .unwrap_or_default(),
        }
    }
}

/// Port for directory operations.
///
/// `Ok(false)` means the directory refused the credentials; transport
/// failures after a connection exists are surfaced as errors. Every
/// operation is scoped to one connection, so implementations carry no
/// state across calls.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Check that a connection can be established, binding with
    /// `bind_dn` when provided, otherwise with the configured service
    /// account.
    async fn connect(
        &self,
        bind_dn: Option<&str>,
        bind_password: Option<&str>,
    ) -> Result<bool>;

    /// Test user credentials against the configured filter.
    async fn authenticate(
        &self,
        username: &str,
        password: &str,
        filter: &str,
    ) -> Result<bool>;

    /// Fetch the profile for a user identifier.
    async fn get_directory_user(
        &self,
        username: &str,
    ) -> Result<Option<DirectoryUser>>;
}

#[derive(Debug, Clone, Default)]
pub struct LdapConfig {
    pub addr: String,
    pub base_dn: String,
    pub service_dn: Option<String>,
    pub service_password: Option<String>,
}

impl LdapConfig {
    /// Create a new [`LdapConfig`].
    pub fn new(addr: impl Into<String>, base_dn: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            base_dn: base_dn.into(),
            service_dn: None,
            service_password: None,
        }
    }

    /// Set service account credentials used for anonymous-mode binds.
    pub fn service_bind(
        mut self,
        dn: Option<String>,
        password: Option<String>,
    ) -> Self {
        self.service_dn = dn;
        self.service_password = password;
        self
    }
}

impl From<&config::Ldap> for LdapConfig {
    fn from(config: &config::Ldap) -> Self {
        Self::new(&config.address, &config.base_dn)
            .service_bind(config.user.clone(), config.password.clone())
    }
}

/// Directory implementation over [`Ldap3`].
///
/// Stateless: each operation opens its own connection, so one instance
/// can serve concurrent requests.
#[derive(Debug)]
pub struct LdapDirectory {
    config: LdapConfig,
}

impl LdapDirectory {
    /// Create a new [`LdapDirectory`].
    pub fn new(config: LdapConfig) -> Self {
        Self { config }
    }

    /// Open a connection bound with the service account, or anonymous
    /// when none is configured.
    async fn service_connection(&self) -> Result<Ldap3> {
        let (handle, mut conn) = LdapConnAsync::new(&self.config.addr).await?;
        ldap3::drive!(handle);

        if let Some(dn) = &self.config.service_dn {
            let password =
                self.config.service_password.clone().unwrap_or_default();
            conn.simple_bind(dn, &password).await?.success()?;
        }

        Ok(conn)
    }
}

#[async_trait]
impl Directory for LdapDirectory {
    async fn connect(
        &self,
        bind_dn: Option<&str>,
        bind_password: Option<&str>,
    ) -> Result<bool> {
        let bind = match (bind_dn, &self.config.service_dn) {
            (Some(dn), _) => Some((
                dn.to_owned(),
                bind_password.unwrap_or_default().to_owned(),
            )),
            (None, Some(dn)) => Some((
                dn.clone(),
                self.config.service_password.clone().unwrap_or_default(),
            )),
            (None, None) => None,
        };

        // A DN with an empty password would be an unauthenticated bind
        // (RFC 4513 §5.1.2), which servers may accept with rc=0.
        if let Some((_, password)) = &bind {
            if password.is_empty() {
                tracing::debug!("empty bind password refused");
                return Ok(false);
            }
        }

        let (handle, mut conn) =
            match LdapConnAsync::new(&self.config.addr).await {
                Ok(pair) => pair,
                Err(err) => {
                    tracing::debug!(error = %err, "directory connection failed");
                    return Ok(false);
                },
            };
        ldap3::drive!(handle);

        if let Some((dn, password)) = bind {
            if let Err(err) =
                conn.simple_bind(&dn, &password).await.and_then(|r| r.success())
            {
                tracing::debug!(error = %err, "directory bind refused");
                return Ok(false);
            }
        }

        conn.unbind().await?;
        Ok(true)
    }

    /// Test a connection on [`Ldap3`].
    ///
    /// SAFETY: Do not use connection after.
    async fn authenticate(
        &self,
        username: &str,
        password: &str,
        filter: &str,
    ) -> Result<bool> {
        // Same unauthenticated-bind trap as in `connect`.
        if password.is_empty() {
            tracing::debug!(user = %username, "empty password refused");
            return Ok(false);
        }

        let (handle, mut conn) = LdapConnAsync::new(&self.config.addr).await?;
        ldap3::drive!(handle);

        let filter = substitute_filter(filter, username);
        let results = conn
            .search(&self.config.base_dn, Scope::Subtree, &filter, vec!["dn"])
            .await?
            .success()?
            .0;

        if results.len() != 1 {
            return Ok(false);
        }

        let dn = SearchEntry::construct(results[0].clone()).dn;
        let outcome = match conn.simple_bind(&dn, password).await?.success() {
            Ok(_) => true,
            Err(LdapError::LdapResult { result })
                if result.rc == RC_INVALID_CREDENTIALS =>
            {
                false
            },
            Err(err) => return Err(err.into()),
        };
        conn.unbind().await?;
        Ok(outcome)
    }

    async fn get_directory_user(
        &self,
        username: &str,
    ) -> Result<Option<DirectoryUser>> {
        let mut conn = self.service_connection().await?;

        let filter = format!("(uid={})", escape_ldap(username));
        let results = conn
            .search(
                &self.config.base_dn,
                Scope::Subtree,
                &filter,
                PROFILE_ATTRS.to_vec(),
            )
            .await?
            .success()?
            .0;
        conn.unbind().await?;

        let Some(entry) = results.into_iter().next() else {
            return Ok(None);
        };

        Ok(Some(DirectoryUser::from_entry(&SearchEntry::construct(entry))))
    }
}

/// Substitute the `{username}` placeholder of a filter template.
pub fn substitute_filter(template: &str, username: &str) -> String {
    template.replace("{username}", &escape_ldap(username))
}

fn attr_first(entry: &SearchEntry, name: &str) -> String {
    entry
        .attrs
        .get(name)
        .and_then(|values| values.first())
        .cloned()
        .unwrap_or_default()
}

fn escape_ldap(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '*' => out.push_str(r"\2a"),
            '(' => out.push_str(r"\28"),
            ')' => out.push_str(r"\29"),
            '\\' => out.push_str(r"\5c"),
            '\0' => out.push_str(r"\00"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::error::ServerError;

    // 127.0.0.1:1 refuses connections immediately.
    const UNREACHABLE: &str = "ldap://127.0.0.1:1";

    fn unreachable_directory() -> LdapDirectory {
        LdapDirectory::new(LdapConfig::new(UNREACHABLE, "dc=example,dc=org"))
    }

    #[test]
    fn test_escape_ldap() {
        assert_eq!(escape_ldap("alice"), "alice");
        assert_eq!(escape_ldap(r"a*b(c)d\e"), r"a\2ab\28c\29d\5ce");
        // non-ASCII usernames pass through untouched.
        assert_eq!(escape_ldap("rené"), "rené");
        assert_eq!(escape_ldap("Müller(1)"), r"Müller\281\29");
    }

    #[test]
    fn test_substitute_filter() {
        let filter = substitute_filter(
            "(&(uid={username})(objectClass=person))",
            "a*lice",
        );
        assert_eq!(filter, r"(&(uid=a\2alice)(objectClass=person))");
    }

    #[test]
    fn test_profile_mapping_keeps_group_order() {
        let entry = SearchEntry {
            dn: "uid=alice,dc=example,dc=org".to_owned(),
            attrs: HashMap::from([
                ("mail".to_owned(), vec!["alice@example.org".to_owned()]),
                ("givenName".to_owned(), vec!["Alice".to_owned()]),
                ("sn".to_owned(), vec!["Liddell".to_owned()]),
                (
                    "memberOf".to_owned(),
                    vec!["cn=staff".to_owned(), "cn=admins".to_owned()],
                ),
            ]),
            bin_attrs: HashMap::new(),
        };

        let user = DirectoryUser::from_entry(&entry);
        assert_eq!(user.email, "alice@example.org");
        assert_eq!(user.first_name, "Alice");
        assert_eq!(user.last_name, "Liddell");
        assert_eq!(user.phone, "");
        assert_eq!(user.groups, vec!["cn=staff", "cn=admins"]);
    }

    #[tokio::test]
    async fn test_authenticate_refuses_empty_password() {
        // refused before any connection is opened.
        let directory = unreachable_directory();
        let granted = directory
            .authenticate("alice", "", "(uid={username})")
            .await
            .unwrap();
        assert!(!granted);
    }

    #[tokio::test]
    async fn test_connect_refuses_empty_bind_password() {
        let directory = unreachable_directory();
        let connected = directory
            .connect(Some("uid=alice,dc=example,dc=org"), Some(""))
            .await
            .unwrap();
        assert!(!connected);

        // same for a service account configured without a password.
        let directory = LdapDirectory::new(
            LdapConfig::new(UNREACHABLE, "dc=example,dc=org").service_bind(
                Some("cn=admin,dc=example,dc=org".to_owned()),
                None,
            ),
        );
        assert!(!directory.connect(None, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_connect_reports_unreachable_directory() {
        let directory = unreachable_directory();
        assert!(!directory.connect(None, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_profile_lookup_surfaces_transport_errors() {
        let directory = unreachable_directory();
        let err = directory.get_directory_user("alice").await.unwrap_err();
        assert!(matches!(err, ServerError::Ldap(_)));
    }
}
