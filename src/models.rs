use serde::Serialize;
use smallvec::SmallVec;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::path::PathBuf;

pub const SAMPLE_SIZE: usize = 3;

/// Distinct values of one column of a delimited file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnProfile {
    pub column: String,
    pub index: usize,
    pub records: usize,
    pub distinct_values: HashSet<String>,
}

impl ColumnProfile {
    pub fn cardinality(&self) -> usize {
        self.distinct_values.len()
    }

    /// Longest distinct value in characters, 0 for an empty column.
    pub fn max_length(&self) -> usize {
        self.distinct_values
            .iter()
            .map(|v| v.chars().count())
            .max()
            .unwrap_or(0)
    }

    pub fn sorted_values(&self) -> Vec<String> {
        self.distinct_values
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn summary(&self) -> ProfileSummary {
        ProfileSummary {
            column: self.column.clone(),
            index: self.index,
            records: self.records,
            cardinality: self.cardinality(),
            max_length: self.max_length(),
            distinct_values: self.sorted_values(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileSummary {
    pub column: String,
    pub index: usize,
    pub records: usize,
    pub cardinality: usize,
    pub max_length: usize,
    pub distinct_values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    BigInt,
    Numeric,
    Boolean,
    Date,
    Timestamp,
    Varchar { length: usize },
    Text,
    Enum { type_name: String, labels: Vec<String> },
}

impl ColumnType {
    pub fn is_enum(&self) -> bool {
        matches!(self, ColumnType::Enum { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnSpec {
    /// Header text as it appears in the file.
    pub source: String,
    /// Cleaned SQL column name.
    pub name: String,
    pub column_type: ColumnType,
    pub null_count: usize,
    pub sample_values: SmallVec<[String; SAMPLE_SIZE]>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSchema {
    pub schema: String,
    pub table: String,
    pub records: usize,
    pub columns: Vec<ColumnSpec>,
}

impl TableSchema {
    pub fn enum_columns(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns.iter().filter(|c| c.column_type.is_enum())
    }
}

#[derive(Clone)]
pub struct RoleCredentials {
    pub name: String,
    pub password: String,
}

impl fmt::Debug for RoleCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoleCredentials")
            .field("name", &self.name)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct AccessPlan {
    pub readonly_group: String,
    pub readwrite_group: String,
    pub readonly_user: RoleCredentials,
    pub readwrite_user: RoleCredentials,
}

#[derive(Debug, Clone)]
pub struct ProvisionPlan {
    pub database: String,
    pub schema: String,
    pub table: String,
    pub csv_path: PathBuf,
    pub delimiter: u8,
    pub enum_threshold: usize,
    pub access: AccessPlan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TablePrivilege {
    Select,
    Insert,
    Update,
    Delete,
}

impl TablePrivilege {
    pub const ALL: [TablePrivilege; 4] = [
        TablePrivilege::Select,
        TablePrivilege::Insert,
        TablePrivilege::Update,
        TablePrivilege::Delete,
    ];

    pub fn as_sql(&self) -> &'static str {
        match self {
            TablePrivilege::Select => "SELECT",
            TablePrivilege::Insert => "INSERT",
            TablePrivilege::Update => "UPDATE",
            TablePrivilege::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrivilegeCheck {
    pub role: String,
    pub privilege: TablePrivilege,
    pub expected: bool,
    pub granted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MembershipCheck {
    pub user: String,
    pub group: String,
    pub member: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProvisionReport {
    pub database: String,
    pub schema: String,
    pub table: String,
    pub database_created: bool,
    pub columns: Vec<ColumnSpec>,
    /// Data records read from the CSV during inference.
    pub records_scanned: u64,
    pub rows_loaded: u64,
    pub rows_counted: i64,
    pub privileges: Vec<PrivilegeCheck>,
    pub memberships: Vec<MembershipCheck>,
    pub verified: bool,
}

impl ProvisionReport {
    pub fn mismatches(&self) -> Vec<&PrivilegeCheck> {
        self.privileges
            .iter()
            .filter(|check| check.expected != check.granted)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(values: &[&str]) -> ColumnProfile {
        ColumnProfile {
            column: "day".into(),
            index: 1,
            records: values.len(),
            distinct_values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    #[test]
    fn derived_statistics_follow_the_distinct_set() {
        let p = profile(&["Monday", "Tuesday", "Monday"]);
        assert_eq!(p.cardinality(), 2);
        assert_eq!(p.max_length(), 7);
        assert_eq!(p.sorted_values(), vec!["Monday", "Tuesday"]);
    }

    #[test]
    fn empty_profile_has_zero_max_length() {
        let p = profile(&[]);
        assert_eq!(p.cardinality(), 0);
        assert_eq!(p.max_length(), 0);
    }

    #[test]
    fn max_length_counts_characters() {
        let p = profile(&["café", "ab"]);
        assert_eq!(p.max_length(), 4);
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = RoleCredentials { name: "analyst".into(), password: "hunter2".into() };
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("analyst"));
        assert!(!rendered.contains("hunter2"));
    }
}
