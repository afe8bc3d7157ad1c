use chrono::{DateTime, Utc};
use pumpsync_core::{ConnectionConfig, StationIdentity};
use serde::{Deserialize, Serialize};

/// Stored connection parameters of one station
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialEntry {
    pub connection: ConnectionConfig,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// When this entry was created
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    /// When this entry was last updated
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl CredentialEntry {
    pub fn new(connection: ConnectionConfig) -> Self {
        let now = Utc::now();
        Self {
            connection,
            description: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn station(&self) -> StationIdentity {
        self.connection.station()
    }

    /// Key the entry is stored under: `organization/station`
    pub fn key(&self) -> String {
        self.station().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialization_defaults() {
        let yaml = r#"
connection:
  organization_code: ORG1
  gas_station_code: ST1
  db_host: 10.0.0.5
  db_name: posto
  db_user: reader
  db_password: secret
"#;
        let entry: CredentialEntry = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(entry.key(), "ORG1/ST1");
        assert_eq!(entry.connection.db_port, 5432);
        assert!(entry.description.is_none());
        assert!(entry.created_at.timestamp() > 0);
    }
}
