use serde::{Deserialize, Serialize};

/// Quote a PostgreSQL identifier, doubling embedded quotes
pub fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Tables the transaction query joins.
///
/// Station back offices name these differently, so every name is
/// configurable. Defaults match the `dah` schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryTemplate {
    pub schema: String,
    pub transactions_table: String,
    pub nozzles_table: String,
    pub companies_table: String,
    pub columns: ColumnMapping,
}

/// Source column for every field of a transaction record, plus the
/// columns used for joins, filters and ordering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMapping {
    pub transaction_id: String,
    pub occurred_at: String,
    pub quantity: String,
    pub unit_value: String,
    pub total_value: String,
    pub processed: String,
    pub cancelled: String,
    pub kind: String,
    pub company_id: String,
    pub nozzle_id: String,
    pub pump_number: String,
    pub fuel_name: String,
    pub company_name: String,
    /// Column the result is ordered by, descending
    pub order_by: String,
}

impl Default for QueryTemplate {
    fn default() -> Self {
        Self {
            schema: "dah".to_string(),
            transactions_table: "abastecimento".to_string(),
            nozzles_table: "bico".to_string(),
            companies_table: "empresa".to_string(),
            columns: ColumnMapping::default(),
        }
    }
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            transaction_id: "cdabastecimento".to_string(),
            occurred_at: "dhabastecimento".to_string(),
            quantity: "qtvolume".to_string(),
            unit_value: "vlunitario".to_string(),
            total_value: "vltotal".to_string(),
            processed: "fllancado".to_string(),
            cancelled: "flcancelado".to_string(),
            kind: "fltipo".to_string(),
            company_id: "cdempresa".to_string(),
            nozzle_id: "cdbico".to_string(),
            pump_number: "nrbico".to_string(),
            fuel_name: "dsbico".to_string(),
            company_name: "dsapelido".to_string(),
            order_by: "dhprocessamento".to_string(),
        }
    }
}

impl QueryTemplate {
    fn table(&self, name: &str) -> String {
        format!("{}.{}", quote_identifier(&self.schema), quote_identifier(name))
    }

    /// Render the transaction query.
    ///
    /// `$1` is the company id (BIGINT), `$2` the window length in seconds.
    /// Output columns are cast and aliased so decoding does not depend on
    /// the source column types.
    pub fn render(&self, exclude_processed: bool) -> String {
        let c = &self.columns;
        let t = |col: &str| format!("t.{}", quote_identifier(col));
        let n = |col: &str| format!("n.{}", quote_identifier(col));
        let e = |col: &str| format!("e.{}", quote_identifier(col));

        let mut sql = format!(
            "SELECT \
                CAST({} AS BIGINT) AS transaction_id, \
                CAST({} AS TIMESTAMP) AS occurred_at, \
                CAST({} AS DOUBLE PRECISION) AS quantity, \
                CAST({} AS DOUBLE PRECISION) AS unit_value, \
                CAST({} AS DOUBLE PRECISION) AS total_value, \
                CAST({} AS INTEGER) AS processed, \
                CAST({} AS INTEGER) AS pump_number, \
                CAST({} AS TEXT) AS fuel_name, \
                CAST({} AS TEXT) AS company_name \
            FROM {} t \
            JOIN {} n ON {} = {} \
            JOIN {} e ON {} = {} \
            WHERE {} = 0 \
                AND {} = 0 \
                AND {} >= (NOW() - make_interval(secs => $2)) \
                AND {} = $1",
            t(&c.transaction_id),
            t(&c.occurred_at),
            t(&c.quantity),
            t(&c.unit_value),
            t(&c.total_value),
            t(&c.processed),
            n(&c.pump_number),
            n(&c.fuel_name),
            e(&c.company_name),
            self.table(&self.transactions_table),
            self.table(&self.nozzles_table),
            t(&c.nozzle_id),
            n(&c.nozzle_id),
            self.table(&self.companies_table),
            t(&c.company_id),
            e(&c.company_id),
            t(&c.cancelled),
            t(&c.kind),
            t(&c.occurred_at),
            t(&c.company_id),
        );

        if exclude_processed {
            sql.push_str(&format!(" AND {} = 0", t(&c.processed)));
        }

        sql.push_str(&format!(" ORDER BY {} DESC", t(&c.order_by)));
        sql
    }
}
