use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::debug;
use serde_json::{Map, Value};

use crate::date::{DateRange, timestamp_hour};
use crate::error::Result;

pub const STATION_COLUMN: &str = "stationName";
pub const TIMESTAMP_COLUMN: &str = "weatherTimestamp";
pub const GEOMETRY_COLUMN: &str = "geometry";

/// Number of leading upstream metadata columns that never reach the output.
pub const LEADING_METADATA_COLUMNS: usize = 2;

/// One upstream observation, fields in upstream order.
pub type ObservationRow = Map<String, Value>;

/// Inclusive hour-of-day bounds taken from the caller's range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HourFilter {
    pub first: u32,
    pub last: u32,
}

impl HourFilter {
    pub fn from_range(range: &DateRange) -> Self {
        Self {
            first: range.start().hour(),
            last: range.end().hour(),
        }
    }

    pub fn contains(&self, hour: u32) -> bool {
        (self.first..=self.last).contains(&hour)
    }
}

#[derive(Debug, Clone)]
pub struct AssembleOptions {
    pub station_column: String,
    pub timestamp_column: String,
    pub hours: Option<HourFilter>,
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self {
            station_column: STATION_COLUMN.to_string(),
            timestamp_column: TIMESTAMP_COLUMN.to_string(),
            hours: None,
        }
    }
}

impl AssembleOptions {
    pub fn with_hours(mut self, hours: Option<HourFilter>) -> Self {
        self.hours = hours;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Assembled {
    Table(ObservationTable),
    NoData,
}

/// Observations with a fixed column schema.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObservationTable {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl ObservationTable {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cell text of `column` for every row.
    pub fn column_text(&self, name: &str) -> Vec<String> {
        let idx = self.column_index(name);
        self.rows
            .iter()
            .map(|row| idx.map(|i| cell_text(&row[i])).unwrap_or_default())
            .collect()
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut out = csv::Writer::from_writer(writer);
        out.write_record(&self.columns)?;
        for row in &self.rows {
            out.write_record(row.iter().map(cell_text))?;
        }
        out.flush()?;
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        self.write_csv(BufWriter::new(file))
    }
}

/// Canonical text of a cell: strings unquoted, nulls empty, nested values as compact JSON.
pub fn cell_text(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Turn fetched rows into the final table.
///
/// Drops the leading metadata and geometry columns, removes exact duplicate
/// rows, sorts by station then timestamp and applies the hour filter.
pub fn assemble(rows: Vec<ObservationRow>, options: &AssembleOptions) -> Assembled {
    if rows.is_empty() {
        return Assembled::NoData;
    }

    let mut seen_columns = HashSet::new();
    let mut all_columns = Vec::new();
    for row in &rows {
        for key in row.keys() {
            if seen_columns.insert(key.as_str()) {
                all_columns.push(key.clone());
            }
        }
    }
    let columns: Vec<String> = all_columns
        .into_iter()
        .skip(LEADING_METADATA_COLUMNS)
        .filter(|c| c != GEOMETRY_COLUMN)
        .collect();

    let fetched = rows.len();
    let mut seen_rows = HashSet::new();
    let mut table_rows = Vec::with_capacity(fetched);
    for mut row in rows {
        let cells: Vec<Value> = columns
            .iter()
            .map(|c| row.remove(c).unwrap_or(Value::Null))
            .collect();
        // Keyed on the JSON values, so `null` and `""` stay distinct.
        let key = Value::Array(cells.clone()).to_string();
        if seen_rows.insert(key) {
            table_rows.push(cells);
        }
    }

    let station = columns.iter().position(|c| *c == options.station_column);
    let timestamp = columns.iter().position(|c| *c == options.timestamp_column);
    let text_at = |row: &Vec<Value>, idx: Option<usize>| idx.map(|i| cell_text(&row[i])).unwrap_or_default();

    table_rows.sort_by_cached_key(|row| (text_at(row, station), text_at(row, timestamp)));

    if let Some(hours) = options.hours {
        table_rows.retain(|row| {
            timestamp_hour(&text_at(row, timestamp)).is_some_and(|h| hours.contains(h))
        });
    }

    debug!(
        "assembled {} rows from {fetched} fetched ({} columns)",
        table_rows.len(),
        columns.len()
    );

    if table_rows.is_empty() {
        return Assembled::NoData;
    }
    Assembled::Table(ObservationTable {
        columns,
        rows: table_rows,
    })
}
