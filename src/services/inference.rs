use chrono::{NaiveDate, NaiveDateTime};
use csv::StringRecord;
use once_cell::sync::Lazy;
use rayon::prelude::*;
use regex::Regex;
use smallvec::SmallVec;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

use super::names::{clean_column_name, enum_type_name};
use super::profiler::{check_width, csv_error, ColumnProfiler};
use crate::error::ProfileError;
use crate::models::{ColumnSpec, ColumnType, TableSchema, SAMPLE_SIZE};

// ASCII digits only: `\d` would also accept digits PostgreSQL cannot parse.
static INTEGER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[+-]?[0-9]+$").expect("integer pattern"));

const BOOLEAN_LITERALS: [&str; 6] = ["true", "false", "t", "f", "yes", "no"];
const TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
];
/// PostgreSQL rejects enum labels longer than this many bytes.
const MAX_ENUM_LABEL_LEN: usize = 63;
const MAX_VARCHAR_LEN: usize = 10_485_760;

pub fn is_date_string(s: &str) -> bool {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

/// A finite decimal literal that PostgreSQL's `NUMERIC` input accepts.
pub fn is_numeric_string(s: &str) -> bool {
    s.is_ascii() && s.parse::<f64>().map_or(false, f64::is_finite)
}

pub fn is_timestamp_string(s: &str) -> bool {
    TIMESTAMP_FORMATS
        .iter()
        .any(|format| NaiveDateTime::parse_from_str(s, format).is_ok())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScalarKind {
    Integer,
    BigInt,
    Numeric,
    Boolean,
    Date,
    Timestamp,
    Text,
    Empty,
}

/// Running per-column evidence. Every flag starts true and is cleared by the
/// first value that contradicts it.
#[derive(Debug, Clone)]
struct ColumnStats {
    non_empty: usize,
    null_count: usize,
    integer: bool,
    fits_i32: bool,
    numeric: bool,
    boolean: bool,
    date: bool,
    timestamp: bool,
    samples: SmallVec<[String; SAMPLE_SIZE]>,
}

impl ColumnStats {
    fn new() -> Self {
        Self {
            non_empty: 0,
            null_count: 0,
            integer: true,
            fits_i32: true,
            numeric: true,
            boolean: true,
            date: true,
            timestamp: true,
            samples: SmallVec::new(),
        }
    }

    fn observe(&mut self, value: &str) {
        // Unquoted empty fields load as NULL under COPY ... CSV.
        if value.is_empty() {
            self.null_count += 1;
            return;
        }

        self.non_empty += 1;
        if self.samples.len() < SAMPLE_SIZE {
            self.samples.push(value.to_string());
        }

        // PostgreSQL tolerates surrounding whitespace in numeric, boolean and
        // date input, so classify on the trimmed text.
        let v = value.trim();
        if v.is_empty() {
            self.integer = false;
            self.numeric = false;
            self.boolean = false;
            self.date = false;
            self.timestamp = false;
            return;
        }

        if self.integer {
            if INTEGER.is_match(v) {
                match v.parse::<i64>() {
                    Ok(n) => self.fits_i32 &= i32::try_from(n).is_ok(),
                    Err(_) => self.integer = false,
                }
            } else {
                self.integer = false;
            }
        }
        if self.numeric && !is_numeric_string(v) {
            self.numeric = false;
        }
        if self.boolean {
            let lower = v.to_ascii_lowercase();
            self.boolean = BOOLEAN_LITERALS.contains(&lower.as_str());
        }
        if self.date && !is_date_string(v) {
            self.date = false;
        }
        if self.timestamp && !(is_timestamp_string(v) || is_date_string(v)) {
            self.timestamp = false;
        }
    }

    fn kind(&self) -> ScalarKind {
        match () {
            _ if self.non_empty == 0 => ScalarKind::Empty,
            _ if self.integer && self.fits_i32 => ScalarKind::Integer,
            _ if self.integer => ScalarKind::BigInt,
            _ if self.numeric => ScalarKind::Numeric,
            _ if self.boolean => ScalarKind::Boolean,
            _ if self.date => ScalarKind::Date,
            _ if self.timestamp => ScalarKind::Timestamp,
            _ => ScalarKind::Text,
        }
    }
}

/// Derives a table definition from the contents of a delimited file.
#[derive(Debug, Clone, Copy)]
pub struct SchemaInferrer {
    profiler: ColumnProfiler,
    enum_threshold: usize,
}

impl SchemaInferrer {
    pub fn new(profiler: ColumnProfiler, enum_threshold: usize) -> Self {
        Self { profiler, enum_threshold }
    }

    pub fn infer(&self, path: &Path, schema: &str, table: &str) -> Result<TableSchema, ProfileError> {
        let start = std::time::Instant::now();
        info!("Inferring schema for {} from {}", table, path.display());

        let mut reader = self.profiler.open_reader(path)?;
        let headers = reader.headers().map_err(csv_error)?.clone();
        let width = headers.len();
        if width == 0 {
            return Err(ProfileError::Csv("file has no header record".to_string()));
        }

        let mut stats = vec![ColumnStats::new(); width];
        let mut records = 0usize;
        let mut record = StringRecord::new();
        while reader.read_record(&mut record).map_err(csv_error)? {
            check_width(&record, width)?;
            for (column, value) in stats.iter_mut().zip(record.iter()) {
                column.observe(value);
            }
            records += 1;
        }
        drop(reader);
        debug!("Scanned {} records across {} columns", records, width);

        let mut existing_names = HashSet::new();
        let candidates: Vec<(usize, String, String, ColumnStats)> = headers
            .iter()
            .zip(stats)
            .enumerate()
            .map(|(idx, (header, stat))| {
                let name = clean_column_name(header, &mut existing_names);
                (idx, header.to_string(), name, stat)
            })
            .collect();

        // Text columns each reopen the file, so they profile independently.
        let columns = candidates
            .into_par_iter()
            .map(|(idx, source, name, stat)| self.column_spec(path, idx, source, name, stat))
            .collect::<Result<Vec<ColumnSpec>, _>>()?;
        let columns = name_enum_types(table, columns);

        info!(
            "Inferred {} columns for {} ({} enum) in {:?}",
            columns.len(),
            table,
            columns.iter().filter(|c| c.column_type.is_enum()).count(),
            start.elapsed()
        );

        Ok(TableSchema {
            schema: schema.to_string(),
            table: table.to_string(),
            records,
            columns,
        })
    }

    fn column_spec(
        &self,
        path: &Path,
        idx: usize,
        source: String,
        name: String,
        stat: ColumnStats,
    ) -> Result<ColumnSpec, ProfileError> {
        let column_type = match stat.kind() {
            ScalarKind::Integer => ColumnType::Integer,
            ScalarKind::BigInt => ColumnType::BigInt,
            ScalarKind::Numeric => ColumnType::Numeric,
            ScalarKind::Boolean => ColumnType::Boolean,
            ScalarKind::Date => ColumnType::Date,
            ScalarKind::Timestamp => ColumnType::Timestamp,
            ScalarKind::Empty => ColumnType::Text,
            ScalarKind::Text => self.text_type(path, idx, stat.non_empty)?,
        };
        debug!("Column {} ({}) -> {:?}", name, source, column_type);

        Ok(ColumnSpec {
            source,
            name,
            column_type,
            null_count: stat.null_count,
            sample_values: stat.samples,
        })
    }

    fn text_type(&self, path: &Path, idx: usize, non_empty: usize) -> Result<ColumnType, ProfileError> {
        let profile = self.profiler.profile_column(path, idx)?;

        let mut labels: Vec<String> = profile
            .distinct_values
            .iter()
            .filter(|v| !v.is_empty())
            .cloned()
            .collect();
        labels.sort();

        let enumerable = !labels.is_empty()
            && labels.len() <= self.enum_threshold
            && labels.len() < non_empty
            && labels.iter().all(|l| l.len() <= MAX_ENUM_LABEL_LEN);

        if enumerable {
            // Named by `name_enum_types` once every column is known.
            return Ok(ColumnType::Enum {
                type_name: String::new(),
                labels,
            });
        }

        Ok(match profile.max_length() {
            0 => ColumnType::Text,
            n if n > MAX_VARCHAR_LEN => ColumnType::Text,
            n => ColumnType::Varchar { length: n },
        })
    }
}

/// Gives every enum column its own type name. The table's own row type
/// shares the namespace, so its name is reserved up front.
fn name_enum_types(table: &str, mut columns: Vec<ColumnSpec>) -> Vec<ColumnSpec> {
    let mut type_names = HashSet::from([table.to_string()]);
    for column in &mut columns {
        if let ColumnType::Enum { type_name, .. } = &mut column.column_type {
            *type_name = enum_type_name(table, &column.name, &mut type_names);
        }
    }
    columns
}
