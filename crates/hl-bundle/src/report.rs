//! Report documents: one day's records of one kind, flattened to a table.
//!
//! Column 0 is `timestamp`. The remaining columns are the sorted union of
//! payload keys; a key holding arrays expands into `key #1..#n` where `n` is
//! the longest array seen. Missing cells hold [`MISSING_CELL`].

use chrono::{DateTime, NaiveDate, Utc};
use hl_common::{Record, RecordKind, SCHEMA_VERSION};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Placeholder for absent values.
pub const MISSING_CELL: &str = "N/A";

const TIMESTAMP_COLUMN: &str = "timestamp";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Static host information attached to every report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostInfo {
    pub device_name: String,
    pub os: String,
    pub os_version: String,
    pub kernel_version: String,
    pub cpus: Vec<String>,
    pub total_memory_bytes: u64,
    pub disks: Vec<String>,
    pub adapters: Vec<String>,
    pub timezone: String,
}

/// Rows of a report with their column headers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

enum Column {
    Scalar(String),
    Spread(String, usize),
}

impl ReportTable {
    /// Flatten records into a table. Records are expected in timestamp order.
    pub fn from_records(records: &[Record]) -> Self {
        // key -> widest array length (0 for scalar keys)
        let mut widths: BTreeMap<&str, usize> = BTreeMap::new();
        for record in records {
            for (key, value) in &record.payload {
                let width = widths.entry(key.as_str()).or_insert(0);
                if let Value::Array(items) = value {
                    *width = (*width).max(items.len().max(1));
                }
            }
        }

        let layout: Vec<Column> = widths
            .into_iter()
            .map(|(key, width)| match width {
                0 => Column::Scalar(key.to_string()),
                n => Column::Spread(key.to_string(), n),
            })
            .collect();

        let mut columns = vec![TIMESTAMP_COLUMN.to_string()];
        for column in &layout {
            match column {
                Column::Scalar(key) => columns.push(key.clone()),
                Column::Spread(key, n) => {
                    columns.extend((1..=*n).map(|i| format!("{} #{}", key, i)))
                }
            }
        }

        let missing = || Value::from(MISSING_CELL);
        let rows = records
            .iter()
            .map(|record| {
                let mut row = Vec::with_capacity(columns.len());
                row.push(Value::from(
                    record.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                ));
                for column in &layout {
                    match column {
                        Column::Scalar(key) => {
                            row.push(record.payload.get(key).cloned().unwrap_or_else(missing))
                        }
                        Column::Spread(key, n) => {
                            let items: Vec<Value> = match record.payload.get(key) {
                                Some(Value::Array(items)) => items.clone(),
                                Some(Value::Null) | None => Vec::new(),
                                Some(other) => vec![other.clone()],
                            };
                            row.extend(items.into_iter().chain(std::iter::repeat_with(missing)).take(*n));
                        }
                    }
                }
                row
            })
            .collect();

        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cell lookup by column name.
    pub fn cell(&self, row: usize, column: &str) -> Option<&Value> {
        let index = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row)?.get(index)
    }
}

/// Sealed-report content before encryption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDocument {
    pub format_version: String,
    pub kind: RecordKind,
    pub day: NaiveDate,
    pub device_id: String,
    pub timezone: String,
    pub generated_at: DateTime<Utc>,
    pub host: HostInfo,
    pub table: ReportTable,
    pub record_count: usize,
}

impl ReportDocument {
    pub fn new(
        kind: RecordKind,
        day: NaiveDate,
        device_id: impl Into<String>,
        timezone: impl Into<String>,
        host: HostInfo,
        records: &[Record],
    ) -> Self {
        let table = ReportTable::from_records(records);
        Self {
            format_version: SCHEMA_VERSION.to_string(),
            kind,
            day,
            device_id: device_id.into(),
            timezone: timezone.into(),
            generated_at: Utc::now(),
            host,
            record_count: table.len(),
            table,
        }
    }

    pub fn to_json_bytes(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_json_bytes(data: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}
