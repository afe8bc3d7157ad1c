use crate::StationIdentity;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Format of the `date` field on the wire
pub const WIRE_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// ===== One fuel dispensing event =====
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Source system primary key, unique within a station
    #[serde(rename = "gasStationTransactionID")]
    pub transaction_id: i64,

    #[serde(rename = "quantity")]
    pub quantity: f64,

    #[serde(rename = "unitValue")]
    pub unit_value: f64,

    #[serde(rename = "totalValue")]
    pub total_value: f64,

    #[serde(rename = "processed")]
    pub processed: i32,

    #[serde(rename = "date", with = "wire_date")]
    pub occurred_at: NaiveDateTime,

    #[serde(rename = "pumpNumber")]
    pub pump_number: i32,

    #[serde(rename = "fuelName")]
    pub fuel_name: String,

    #[serde(rename = "companyName")]
    pub company_name: String,
}

impl TransactionRecord {
    /// Whether `total_value` matches `quantity * unit_value` within `tolerance`.
    /// The source database does not enforce this.
    pub fn totals_consistent(&self, tolerance: f64) -> bool {
        (self.quantity * self.unit_value - self.total_value).abs() <= tolerance
    }
}

/// ===== Payload of one POST =====
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    #[serde(rename = "organizationCode")]
    pub organization_code: String,

    #[serde(rename = "gasStationCode")]
    pub gas_station_code: String,

    /// Kept in source order, most recent first
    #[serde(rename = "pumpRowsData")]
    pub records: Vec<TransactionRecord>,
}

impl Batch {
    pub fn new(station: &StationIdentity, records: Vec<TransactionRecord>) -> Self {
        Self {
            organization_code: station.organization_code.clone(),
            gas_station_code: station.gas_station_code.clone(),
            records,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn transaction_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.records.iter().map(|r| r.transaction_id)
    }
}

mod wire_date {
    use super::WIRE_DATE_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&value.format(WIRE_DATE_FORMAT))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, WIRE_DATE_FORMAT).map_err(serde::de::Error::custom)
    }
}
