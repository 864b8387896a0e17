use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Where ISC dhcpd keeps its lease database on most distributions.
pub const DEFAULT_LEASES_FILE: &str = "/var/lib/dhcp/dhcpd.leases";

const DEFAULT_HARDWARE_PLACEHOLDER: &str = "See dhcpd.conf";

/// What to do with a lease block whose `ends` value is malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MalformedPolicy {
    /// Fail the whole load.
    #[default]
    Abort,
    /// Drop the offending block and keep going.
    Skip,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub leases_file: PathBuf,
    pub on_malformed: MalformedPolicy,
    pub hardware_placeholder: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            leases_file: PathBuf::from(DEFAULT_LEASES_FILE),
            on_malformed: MalformedPolicy::Abort,
            hardware_placeholder: DEFAULT_HARDWARE_PLACEHOLDER.to_string(),
        }
    }
}

impl Config {
    /// Reads a JSON config file. Keys missing from the file keep their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|source| Error::file_access(path, source))?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` when one is given, otherwise returns the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.leases_file.as_os_str().is_empty() {
            return Err(Error::InvalidConfig(
                "leases_file must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}
