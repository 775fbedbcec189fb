//! Configuration manager for reserva-auth.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const VERSION: &str = env!("CARGO_PKG_VERSION");

fn default_locale() -> String {
    "en".to_owned()
}

fn default_timezone() -> String {
    "UTC".to_owned()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Instance name.
    pub name: String,
    /// Locale written to synchronized accounts.
    #[serde(default = "default_locale")]
    pub default_locale: String,
    /// Timezone written to synchronized accounts.
    #[serde(default = "default_timezone")]
    pub default_timezone: String,
    #[serde(default)]
    version: String,
    #[serde(skip)]
    path: PathBuf,
    /// Related to LDAP3 configuration.
    #[serde(skip_serializing)]
    pub ldap: Option<Ldap>,
    /// Related to automatic mail sending.
    #[serde(skip_serializing)]
    pub mail: Option<Mail>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            name: String::default(),
            default_locale: default_locale(),
            default_timezone: default_timezone(),
            version: String::default(),
            path: PathBuf::default(),
            ldap: None,
            mail: None,
        }
    }
}

/// LDAP configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ldap {
    /// Hostname:(?port) for LDAP instance.
    pub address: String,
    /// Service DN credential to connect.
    pub user: Option<String>,
    /// Password credential to connect.
    pub password: Option<String>,
    /// DN for domain.
    pub base_dn: String,
    /// Search filter template, `{username}` is substituted per request.
    pub users_filter: String,
    /// Bind with the credentials presented by the user instead of the
    /// service account.
    #[serde(default)]
    pub bind_as_user: bool,
    /// Retry denied or unreachable directory logins against the local
    /// database.
    #[serde(default)]
    pub retry_against_database: bool,
    /// Strip `@domain` suffixes and `DOMAIN\` prefixes from usernames.
    #[serde(default = "default_true")]
    pub clean_username: bool,
    /// Log every authentication attempt at debug severity.
    #[serde(default)]
    pub debug: bool,
}

/// Mailer queue configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mail {
    /// Hostname:(?port) for RabbitMQ instance.
    pub address: String,
    /// RabbitMQ default vhost.
    pub vhost: Option<String>,
    /// RabbitMQ username to access queue.
    pub username: String,
    /// RabbitMQ password to access queue.
    pub password: String,
    /// Max channel connections.
    pub pool: Option<u16>,
    /// Queue name to send mailing events.
    pub queue: String,
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location.
    pub fn read(self) -> Arc<Self> {
        let file_path = if self.path.is_file() {
            &self.path
        } else {
            &Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        };

        match File::open(file_path) {
            Ok(file) => {
                let mut config: Configuration =
                    match serde_yaml::from_reader(file) {
                        Ok(config) => config,
                        Err(err) => {
                            return Arc::new(self.error(err));
                        },
                    };

                // set app version.
                config.version = VERSION.to_owned();

                Arc::new(config)
            },
            Err(err) => Arc::new(self.error(err)),
        }
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, "`config.yaml` file not found");
        Self {
            version: VERSION.to_owned(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ldap_section() {
        let raw = r#"
name: reserva
ldap:
  address: ldap://localhost:389
  base_dn: dc=example,dc=org
  users_filter: "(&(uid={username})(objectClass=person))"
  bind_as_user: true
  retry_against_database: true
"#;
        let config: Configuration = serde_yaml::from_str(raw).unwrap();
        let ldap = config.ldap.unwrap();

        assert!(ldap.bind_as_user);
        assert!(ldap.retry_against_database);
        // unset flags keep their defaults.
        assert!(ldap.clean_username);
        assert!(!ldap.debug);
        assert_eq!(config.default_locale, "en");
        assert_eq!(config.default_timezone, "UTC");
    }
}
