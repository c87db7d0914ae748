use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, Serializer};

use crate::load::Config;
use crate::shared::ValidationError;

/// Flavor of the upstream database server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFlavor {
    #[default]
    Mysql,
    Mariadb,
}

/// Connection settings for an upstream database instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamDbConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(default, serialize_with = "serialize_password")]
    pub password: Option<SecretString>,
}

impl PartialEq for UpstreamDbConfig {
    fn eq(&self, other: &Self) -> bool {
        let password = |config: &Self| {
            config
                .password
                .as_ref()
                .map(|password| password.expose_secret().clone())
        };

        self.host == other.host
            && self.port == other.port
            && self.user == other.user
            && password(self) == password(other)
    }
}

/// Full configuration of one upstream source.
///
/// This is the payload stored under the upstream-config key and handed back to a worker
/// once it has been bound to the source for relaying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub source_id: String,
    #[serde(default)]
    pub flavor: SourceFlavor,
    #[serde(default)]
    pub enable_gtid: bool,
    #[serde(default)]
    pub enable_relay: bool,
    #[serde(default)]
    pub server_id: u32,
    /// Binlog file the relay starts from; empty means the upstream's current position.
    #[serde(default)]
    pub relay_binlog_name: String,
    /// GTID set the relay starts from when `enable_gtid` is set.
    #[serde(default)]
    pub relay_binlog_gtid: String,
    pub from: UpstreamDbConfig,
}

impl Config for SourceConfig {
    const NAME: &'static str = "source configuration";

    fn validate(&self) -> Result<(), ValidationError> {
        SourceConfig::validate(self)
    }
}

impl SourceConfig {
    /// Validates the source configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.source_id.is_empty() {
            return Err(ValidationError::SourceIdEmpty);
        }

        Ok(())
    }
}

/// Writes the password in clear text, since other workers read it back from the store.
fn serialize_password<S>(password: &Option<SecretString>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match password {
        Some(password) => serializer.serialize_some(password.expose_secret()),
        None => serializer.serialize_none(),
    }
}
