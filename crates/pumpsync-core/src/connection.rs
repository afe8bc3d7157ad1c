use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Organization and gas station codes a batch is reported under
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StationIdentity {
    pub organization_code: String,
    pub gas_station_code: String,
}

impl StationIdentity {
    pub fn new(organization_code: impl Into<String>, gas_station_code: impl Into<String>) -> Self {
        Self {
            organization_code: organization_code.into(),
            gas_station_code: gas_station_code.into(),
        }
    }
}

impl fmt::Display for StationIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.organization_code, self.gas_station_code)
    }
}

/// Source database credentials plus the station identity they belong to.
///
/// Loaded once from the credential store at startup and passed explicitly
/// to whatever needs it. Editing the settings means building a new pipeline.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub organization_code: String,
    pub gas_station_code: String,
    pub db_host: String,
    #[serde(default = "default_port")]
    pub db_port: u16,
    pub db_name: String,
    pub db_user: String,
    pub db_password: String,
    #[serde(default)]
    pub db_role: Option<String>,
    #[serde(default)]
    pub company_id: Option<String>,
}

fn default_port() -> u16 {
    5432
}

impl ConnectionConfig {
    /// Reject configs with a blank required field before anything touches the network
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("organization_code", &self.organization_code),
            ("gas_station_code", &self.gas_station_code),
            ("db_host", &self.db_host),
            ("db_name", &self.db_name),
            ("db_user", &self.db_user),
            ("db_password", &self.db_password),
        ];

        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(Error::Configuration(format!("{} must not be empty", field)));
            }
        }

        if self.db_port == 0 {
            return Err(Error::Configuration("db_port must not be 0".to_string()));
        }

        Ok(())
    }

    /// Strip surrounding whitespace from every field but the password;
    /// blank optional fields become `None`
    pub fn trimmed(self) -> Self {
        let trim = |value: String| value.trim().to_string();
        let trim_optional = |value: Option<String>| {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Self {
            organization_code: trim(self.organization_code),
            gas_station_code: trim(self.gas_station_code),
            db_host: trim(self.db_host),
            db_port: self.db_port,
            db_name: trim(self.db_name),
            db_user: trim(self.db_user),
            db_password: self.db_password,
            db_role: trim_optional(self.db_role),
            company_id: trim_optional(self.company_id),
        }
    }

    /// Session role, ignoring blank values left behind by the settings form
    pub fn role(&self) -> Option<&str> {
        self.db_role
            .as_deref()
            .map(str::trim)
            .filter(|role| !role.is_empty())
    }

    pub fn company_id(&self) -> Option<&str> {
        self.company_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    pub fn station(&self) -> StationIdentity {
        StationIdentity::new(&self.organization_code, &self.gas_station_code)
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("organization_code", &self.organization_code)
            .field("gas_station_code", &self.gas_station_code)
            .field("db_host", &self.db_host)
            .field("db_port", &self.db_port)
            .field("db_name", &self.db_name)
            .field("db_user", &self.db_user)
            .field("db_password", &"***")
            .field("db_role", &self.db_role)
            .field("company_id", &self.company_id)
            .finish()
    }
}
