use crate::models::CredentialEntry;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use pumpsync_core::ConnectionConfig;

/// Persistence of station connection parameters, keyed by organization and station
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Insert or replace; `created_at` of an existing entry is kept
    async fn save(&self, connection: ConnectionConfig) -> Result<CredentialEntry>;
    async fn get(&self, organization: &str, station: &str) -> Result<Option<CredentialEntry>>;
    async fn list(&self) -> Result<Vec<CredentialEntry>>;
    async fn delete(&self, organization: &str, station: &str) -> Result<bool>;

    /// Pick the station to run. With both codes the entry must exist; with
    /// one or none the stored entries must narrow down to exactly one.
    async fn resolve(
        &self,
        organization: Option<&str>,
        station: Option<&str>,
    ) -> Result<ConnectionConfig> {
        if let (Some(org), Some(st)) = (organization, station) {
            return self
                .get(org, st)
                .await?
                .map(|entry| entry.connection)
                .ok_or_else(|| anyhow!("No credentials stored for station '{}/{}'", org, st));
        }

        let mut candidates: Vec<CredentialEntry> = self
            .list()
            .await?
            .into_iter()
            .filter(|e| organization.map_or(true, |o| e.connection.organization_code == o))
            .filter(|e| station.map_or(true, |s| e.connection.gas_station_code == s))
            .collect();

        match candidates.len() {
            0 => Err(anyhow!(
                "No station credentials configured; run `pumpsync configure` first"
            )),
            1 => Ok(candidates.remove(0).connection),
            _ => Err(anyhow!(
                "Several stations match ({}); pass --organization and --station",
                candidates
                    .iter()
                    .map(|e| e.key())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        }
    }
}
