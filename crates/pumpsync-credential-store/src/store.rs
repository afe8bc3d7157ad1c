use crate::backend::CredentialStore;
use crate::models::CredentialEntry;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use pumpsync_core::{ConnectionConfig, StationIdentity};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::info;

/// Credentials kept in a single YAML file, keyed `organization/station`.
///
/// The file is read on open and rewritten on every change; it is created
/// on the first save.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, CredentialEntry>>,
}

impl FileCredentialStore {
    /// Open the store at `path`; a missing file is an empty store
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let entries = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_yaml::from_str(&content)
                    .with_context(|| format!("Failed to parse {}", path.display()))?
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn key(organization: &str, station: &str) -> String {
        StationIdentity::new(organization, station).to_string()
    }

    fn persist(&self, entries: &BTreeMap<String, CredentialEntry>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).context("Failed to create credential directory")?;
        }
        let yaml = serde_yaml::to_string(entries).context("Failed to serialize credentials")?;
        std::fs::write(&self.path, yaml)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn save(&self, connection: ConnectionConfig) -> Result<CredentialEntry> {
        let connection = connection.trimmed();
        connection.validate()?;

        let mut entries = self.entries.write().await;
        let mut entry = CredentialEntry::new(connection);
        let key = entry.key();

        // Preserve created_at, update updated_at
        if let Some(existing) = entries.get(&key) {
            entry.created_at = existing.created_at;
            entry.description = existing.description.clone();
        }
        entry.updated_at = Utc::now();

        entries.insert(key.clone(), entry.clone());
        self.persist(&entries)?;
        info!("Saved credentials for station {}", key);
        Ok(entry)
    }

    async fn get(&self, organization: &str, station: &str) -> Result<Option<CredentialEntry>> {
        let entries = self.entries.read().await;
        Ok(entries.get(&Self::key(organization, station)).cloned())
    }

    async fn list(&self) -> Result<Vec<CredentialEntry>> {
        let entries = self.entries.read().await;
        Ok(entries.values().cloned().collect())
    }

    async fn delete(&self, organization: &str, station: &str) -> Result<bool> {
        let mut entries = self.entries.write().await;
        let removed = entries.remove(&Self::key(organization, station)).is_some();
        if removed {
            self.persist(&entries)?;
            info!("Deleted credentials for station {}/{}", organization, station);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(org: &str, station: &str) -> ConnectionConfig {
        ConnectionConfig {
            organization_code: org.to_string(),
            gas_station_code: station.to_string(),
            db_host: "10.0.0.5".to_string(),
            db_port: 5432,
            db_name: "posto".to_string(),
            db_user: "reader".to_string(),
            db_password: "secret".to_string(),
            db_role: Some("integracao".to_string()),
            company_id: Some("7".to_string()),
        }
    }

    #[tokio::test]
    async fn credential_store_crud() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("credentials.yaml");
        let store = FileCredentialStore::open(&path).unwrap();
        assert!(store.list().await.unwrap().is_empty());
        assert!(!path.exists());

        let first = store.save(connection("ORG1", "ST1")).await.unwrap();
        store.save(connection("ORG1", "ST2")).await.unwrap();
        assert!(path.exists());
        assert_eq!(store.list().await.unwrap().len(), 2);

        let mut changed = connection("ORG1", "ST1");
        changed.db_host = "10.0.0.9".to_string();
        let updated = store.save(changed).await.unwrap();
        assert_eq!(updated.created_at, first.created_at);
        assert!(updated.updated_at >= first.updated_at);

        let reopened = FileCredentialStore::open(&path).unwrap();
        let entry = reopened.get("ORG1", "ST1").await.unwrap().unwrap();
        assert_eq!(entry.connection.db_host, "10.0.0.9");
        assert_eq!(entry.connection.db_role.as_deref(), Some("integracao"));

        assert!(reopened.delete("ORG1", "ST2").await.unwrap());
        assert!(!reopened.delete("ORG1", "ST2").await.unwrap());
        assert_eq!(
            FileCredentialStore::open(&path).unwrap().list().await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn invalid_connection_is_not_saved() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::open(dir.path().join("credentials.yaml")).unwrap();

        let mut blank = connection("ORG1", "ST1");
        blank.db_password.clear();

        assert!(store.save(blank).await.is_err());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn padded_fields_are_saved_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.yaml");
        let store = FileCredentialStore::open(&path).unwrap();

        let mut padded = connection(" ORG1 ", "ST1 ");
        padded.db_host = " 10.0.0.5\n".to_string();
        padded.db_role = Some(" ".to_string());
        let entry = store.save(padded).await.unwrap();
        assert_eq!(entry.key(), "ORG1/ST1");

        let reopened = FileCredentialStore::open(&path).unwrap();
        let stored = reopened.get("ORG1", "ST1").await.unwrap().unwrap();
        assert_eq!(stored.connection.db_host, "10.0.0.5");
        assert_eq!(stored.connection.db_role, None);
        assert_eq!(
            reopened.resolve(Some("ORG1"), Some("ST1")).await.unwrap().db_host,
            "10.0.0.5"
        );
    }

    #[tokio::test]
    async fn resolve_picks_the_single_station() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::open(dir.path().join("credentials.yaml")).unwrap();

        let empty = store.resolve(None, None).await.unwrap_err();
        assert!(empty.to_string().contains("pumpsync configure"));

        store.save(connection("ORG1", "ST1")).await.unwrap();
        let only = store.resolve(None, None).await.unwrap();
        assert_eq!(only.gas_station_code, "ST1");

        store.save(connection("ORG1", "ST2")).await.unwrap();
        let ambiguous = store.resolve(Some("ORG1"), None).await.unwrap_err();
        assert!(ambiguous.to_string().contains("ORG1/ST1"));

        let by_station = store.resolve(None, Some("ST2")).await.unwrap();
        assert_eq!(by_station.gas_station_code, "ST2");

        let explicit = store.resolve(Some("ORG1"), Some("ST1")).await.unwrap();
        assert_eq!(explicit.gas_station_code, "ST1");

        assert!(store.resolve(Some("ORG9"), Some("ST1")).await.is_err());
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.yaml");
        std::fs::write(&path, "- not: [a mapping").unwrap();

        assert!(FileCredentialStore::open(&path).is_err());
    }
}
