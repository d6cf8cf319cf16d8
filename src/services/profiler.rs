use csv::{Reader, ReaderBuilder, StringRecord, Trim};
use std::collections::HashSet;
use std::fs::File;
use std::io;
use std::path::Path;
use tracing::{debug, info};

use crate::error::ProfileError;
use crate::models::ColumnProfile;

/// Collects the distinct values of a single column of a delimited file.
///
/// Values are kept exactly as written: no trimming and no case folding, so
/// `"Monday"`, `"monday"` and `" Monday"` are three distinct values. The file
/// is read once, start to end, and closed before the call returns.
#[derive(Debug, Clone, Copy)]
pub struct ColumnProfiler {
    /// Delimiter character (default: comma)
    delimiter: u8,

    /// Quote character (default: double quote)
    quote: u8,
}

impl Default for ColumnProfiler {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote: b'"',
        }
    }
}

impl ColumnProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_quote(mut self, quote: u8) -> Self {
        self.quote = quote;
        self
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    pub fn quote(&self) -> u8 {
        self.quote
    }

    /// Opens `path` with this profiler's dialect. Shared with schema inference
    /// so both read the file the same way.
    pub(crate) fn open_reader(&self, path: &Path) -> Result<Reader<File>, ProfileError> {
        let file = File::open(path).map_err(|e| open_error(path, e))?;

        Ok(ReaderBuilder::new()
            .delimiter(self.delimiter)
            .quote(self.quote)
            .has_headers(true)
            .trim(Trim::None)
            // Width is checked per record so the error names the line.
            .flexible(true)
            .from_reader(file))
    }

    pub fn headers(&self, path: &Path) -> Result<Vec<String>, ProfileError> {
        let mut reader = self.open_reader(path)?;
        let headers = reader.headers().map_err(csv_error)?;
        Ok(headers.iter().map(str::to_string).collect())
    }

    pub fn profile_column(&self, path: &Path, index: usize) -> Result<ColumnProfile, ProfileError> {
        let start = std::time::Instant::now();
        debug!("Profiling column {} of {}", index, path.display());

        let mut reader = self.open_reader(path)?;
        let headers = reader.headers().map_err(csv_error)?.clone();
        let width = headers.len();
        if index >= width {
            return Err(ProfileError::IndexOutOfBounds { index, width });
        }

        let mut distinct_values = HashSet::new();
        let mut records = 0usize;
        let mut record = StringRecord::new();

        while reader.read_record(&mut record).map_err(csv_error)? {
            check_width(&record, width)?;

            let value = &record[index];
            if !distinct_values.contains(value) {
                distinct_values.insert(value.to_string());
            }
            records += 1;
        }

        let profile = ColumnProfile {
            column: headers[index].to_string(),
            index,
            records,
            distinct_values,
        };

        info!(
            "Profiled column '{}' ({} records, {} distinct, max length {}) in {:?}",
            profile.column,
            profile.records,
            profile.cardinality(),
            profile.max_length(),
            start.elapsed()
        );

        Ok(profile)
    }

    /// Profiles the first column whose header matches `name` exactly.
    pub fn profile_named(&self, path: &Path, name: &str) -> Result<ColumnProfile, ProfileError> {
        let index = self
            .headers(path)?
            .iter()
            .position(|header| header == name)
            .ok_or_else(|| ProfileError::ColumnNotFound(name.to_string()))?;

        self.profile_column(path, index)
    }

    pub fn distinct_values(&self, path: &Path, index: usize) -> Result<HashSet<String>, ProfileError> {
        self.profile_column(path, index).map(|profile| profile.distinct_values)
    }
}

/// Converts a caller-supplied signed index into a column position.
pub fn column_index(raw: i64) -> Result<usize, ProfileError> {
    usize::try_from(raw).map_err(|_| ProfileError::NegativeIndex(raw))
}

pub(crate) fn check_width(record: &StringRecord, width: usize) -> Result<(), ProfileError> {
    if record.len() == width {
        return Ok(());
    }

    Err(ProfileError::MalformedRecord {
        line: record.position().map_or(0, |pos| pos.line()),
        expected: width,
        found: record.len(),
    })
}

pub(crate) fn open_error(path: &Path, err: io::Error) -> ProfileError {
    match err.kind() {
        io::ErrorKind::NotFound => ProfileError::FileNotFound(path.to_path_buf()),
        io::ErrorKind::PermissionDenied => ProfileError::PermissionDenied(path.to_path_buf()),
        _ => ProfileError::Io(err),
    }
}

pub(crate) fn csv_error(err: csv::Error) -> ProfileError {
    let message = err.to_string();
    match err.into_kind() {
        csv::ErrorKind::Io(e) => ProfileError::Io(e),
        _ => ProfileError::Csv(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn csv_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn set(values: &[&str]) -> HashSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn repeated_values_collapse() {
        let file = csv_file("a,b,c\n1,x,foo\n2,y,foo\n");
        let profile = ColumnProfiler::new().profile_column(file.path(), 2).unwrap();

        assert_eq!(profile.distinct_values, set(&["foo"]));
        assert_eq!(profile.cardinality(), 1);
        assert_eq!(profile.max_length(), 3);
        assert_eq!(profile.records, 2);
        assert_eq!(profile.column, "c");
    }

    #[test]
    fn weekday_column() {
        let file = csv_file("a,b\n1,Monday\n2,Tuesday\n3,Monday\n");
        let profile = ColumnProfiler::new().profile_column(file.path(), 1).unwrap();

        assert_eq!(profile.distinct_values, set(&["Monday", "Tuesday"]));
        assert_eq!(profile.cardinality(), 2);
        assert_eq!(profile.max_length(), 7);
    }

    #[test]
    fn header_only_file_is_empty() {
        let file = csv_file("a,b\n");
        let profile = ColumnProfiler::new().profile_column(file.path(), 1).unwrap();

        assert!(profile.distinct_values.is_empty());
        assert_eq!(profile.max_length(), 0);
        assert_eq!(profile.records, 0);
    }

    #[test]
    fn index_past_header_width_fails() {
        let file = csv_file("a,b\n1,2\n");
        let err = ColumnProfiler::new().profile_column(file.path(), 2).unwrap_err();
        assert!(matches!(err, ProfileError::IndexOutOfBounds { index: 2, width: 2 }));
    }

    #[test]
    fn index_check_applies_without_data_records() {
        let file = csv_file("a,b\n");
        let err = ColumnProfiler::new().profile_column(file.path(), 5).unwrap_err();
        assert!(matches!(err, ProfileError::IndexOutOfBounds { .. }));
    }

    #[test]
    fn negative_index_is_rejected() {
        assert!(matches!(column_index(-1), Err(ProfileError::NegativeIndex(-1))));
        assert_eq!(column_index(3).unwrap(), 3);
    }

    #[test]
    fn short_record_aborts_the_scan() {
        let file = csv_file("a,b,c\n1,x,foo\n2,y\n3,z,bar\n");
        let err = ColumnProfiler::new().profile_column(file.path(), 2).unwrap_err();
        match err {
            ProfileError::MalformedRecord { line, expected, found } => {
                assert_eq!(line, 3);
                assert_eq!(expected, 3);
                assert_eq!(found, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn long_record_is_malformed_too() {
        let file = csv_file("a,b\n1,x,extra\n");
        let err = ColumnProfiler::new().profile_column(file.path(), 0).unwrap_err();
        assert!(matches!(err, ProfileError::MalformedRecord { expected: 2, found: 3, .. }));
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.csv");
        let err = ColumnProfiler::new().profile_column(&path, 0).unwrap_err();
        assert!(matches!(err, ProfileError::FileNotFound(p) if p == path));
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_file_is_permission_denied() {
        use std::os::unix::fs::PermissionsExt;

        let file = csv_file("a,b\n1,2\n");
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o000)).unwrap();

        // Root ignores mode bits; nothing to check there.
        if std::fs::File::open(file.path()).is_ok() {
            return;
        }

        let err = ColumnProfiler::new().profile_column(file.path(), 0).unwrap_err();
        assert!(matches!(err, ProfileError::PermissionDenied(p) if p == file.path()));
    }

    #[test]
    fn whitespace_and_case_are_preserved() {
        let file = csv_file("id,day\n1,Monday\n2,monday\n3, Monday\n4,Monday \n");
        let profile = ColumnProfiler::new().profile_column(file.path(), 1).unwrap();

        assert_eq!(profile.cardinality(), 4);
        assert!(profile.distinct_values.contains(" Monday"));
        assert!(profile.distinct_values.contains("Monday "));
        assert_eq!(profile.max_length(), 7);
    }

    #[test]
    fn quoted_delimiters_stay_in_one_field() {
        let file = csv_file("id,city\n1,\"Portland, OR\"\n2,\"Portland, ME\"\n3,\"Portland, OR\"\n");
        let profile = ColumnProfiler::new().profile_column(file.path(), 1).unwrap();

        assert_eq!(profile.distinct_values, set(&["Portland, OR", "Portland, ME"]));
        assert_eq!(profile.max_length(), 12);
    }

    #[test]
    fn custom_delimiter() {
        let file = csv_file("id;status\n1;open\n2;closed\n3;open\n");
        let profile = ColumnProfiler::new()
            .with_delimiter(b';')
            .profile_column(file.path(), 1)
            .unwrap();

        assert_eq!(profile.distinct_values, set(&["open", "closed"]));
    }

    #[test]
    fn empty_fields_count_as_a_value() {
        let file = csv_file("id,note\n1,\n2,hi\n3,\n");
        let profile = ColumnProfiler::new().profile_column(file.path(), 1).unwrap();

        assert_eq!(profile.distinct_values, set(&["", "hi"]));
        assert_eq!(profile.max_length(), 2);
    }

    #[test]
    fn profiling_is_repeatable() {
        let file = csv_file("k,v\n1,b\n2,a\n3,b\n4,c\n");
        let profiler = ColumnProfiler::new();

        let first = profiler.profile_column(file.path(), 1).unwrap();
        let second = profiler.profile_column(file.path(), 1).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn lookup_by_header_name() {
        let file = csv_file("id,region\n1,north\n2,south\n");
        let profiler = ColumnProfiler::new();

        let profile = profiler.profile_named(file.path(), "region").unwrap();
        assert_eq!(profile.index, 1);

        let err = profiler.profile_named(file.path(), "Region").unwrap_err();
        assert!(matches!(err, ProfileError::ColumnNotFound(name) if name == "Region"));
    }

    #[test]
    fn distinct_values_matches_profile() {
        let file = csv_file("a,b\n1,x\n2,y\n3,x\n");
        let values = ColumnProfiler::new().distinct_values(file.path(), 1).unwrap();
        assert_eq!(values, set(&["x", "y"]));
    }
}
