//! The uploaded tabular file: spooling, header read, pre-scan, and batched
//! row streaming.
//!
//! Everything here is blocking I/O. Async callers go through
//! [`tokio::task::spawn_blocking`].

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use annot_core::{CanonicalField, ColumnMapping, MappingError, NewItem};
use csv::{ByteRecord, Reader, ReaderBuilder};
use tempfile::{NamedTempFile, TempPath};

use crate::error::{ResourceError, RowError, RowFailure, SourceError};

const NULL_TOKENS: [&str; 5] = ["na", "n/a", "nan", "null", "none"];

/// Whether a cell counts as absent.
#[must_use]
pub fn is_null(value: &str) -> bool {
    let value = value.trim();
    value.is_empty() || NULL_TOKENS.iter().any(|t| value.eq_ignore_ascii_case(t))
}

// ---------------------------------------------------------------------------
// UploadedFile
// ---------------------------------------------------------------------------

enum Backing {
    Spooled(Option<TempPath>),
    External(PathBuf),
}

/// A file handed to the importer.
///
/// Spooled uploads live in a temp file that is removed when the value is
/// dropped; a failed removal is logged and otherwise ignored. External files
/// are read in place and never removed.
pub struct UploadedFile {
    filename: String,
    backing: Backing,
}

impl UploadedFile {
    /// Write `bytes` to a fresh temp file.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Io`] if the temp file cannot be created or written.
    pub fn from_bytes(filename: impl Into<String>, bytes: &[u8]) -> Result<Self, SourceError> {
        let mut file = NamedTempFile::new()?;
        file.write_all(bytes)?;
        file.flush()?;
        Ok(Self {
            filename: filename.into(),
            backing: Backing::Spooled(Some(file.into_temp_path())),
        })
    }

    /// [`UploadedFile::from_bytes`] on the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if spooling fails or the blocking task panics.
    pub async fn spool(filename: String, bytes: Vec<u8>) -> Result<Self, SourceError> {
        tokio::task::spawn_blocking(move || Self::from_bytes(filename, &bytes))
            .await
            .map_err(|e| SourceError::Task(e.to_string()))?
    }

    /// Read a file that already exists on disk and must be left in place.
    #[must_use]
    pub fn external(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let filename = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        Self {
            filename,
            backing: Backing::External(path),
        }
    }

    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        match &self.backing {
            Backing::Spooled(Some(temp)) => temp,
            Backing::Spooled(None) => Path::new(""),
            Backing::External(path) => path.as_path(),
        }
    }
}

impl std::fmt::Debug for UploadedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadedFile")
            .field("filename", &self.filename)
            .field("path", &self.path())
            .finish()
    }
}

impl Drop for UploadedFile {
    fn drop(&mut self) {
        let Backing::Spooled(slot) = &mut self.backing else {
            return;
        };
        let Some(temp) = slot.take() else {
            return;
        };
        let path = temp.to_path_buf();
        match temp.close() {
            Ok(()) => tracing::debug!(path = %path.display(), "released spooled upload"),
            Err(source) => {
                let err = ResourceError { path, source };
                tracing::warn!(error = %err, "temporary file cleanup failed");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Header read and pre-scan
// ---------------------------------------------------------------------------

fn open(path: &Path) -> Result<Reader<File>, SourceError> {
    Ok(ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?)
}

/// Read the header row. Non-UTF-8 bytes are replaced, and a leading byte
/// order mark is stripped.
///
/// # Errors
///
/// Returns [`SourceError::MissingHeader`] for an empty file, or
/// [`SourceError::Csv`] if the file cannot be opened or parsed.
pub fn read_headers(path: &Path) -> Result<Vec<String>, SourceError> {
    let mut reader = open(path)?;
    let record = reader.byte_headers()?;
    if record.is_empty() {
        return Err(SourceError::MissingHeader);
    }
    let mut headers: Vec<String> = record
        .iter()
        .map(|h| String::from_utf8_lossy(h).into_owned())
        .collect();
    if let Some(first) = headers.first_mut() {
        if let Some(stripped) = first.strip_prefix('\u{feff}') {
            *first = stripped.to_string();
        }
    }
    if headers.iter().all(|h| h.trim().is_empty()) {
        return Err(SourceError::MissingHeader);
    }
    Ok(headers)
}

/// Count data rows without keeping any of them.
///
/// # Errors
///
/// Returns [`SourceError::Csv`] on an I/O or parse failure.
pub fn count_rows(path: &Path) -> Result<u64, SourceError> {
    let mut reader = open(path)?;
    let mut record = ByteRecord::new();
    let mut count = 0_u64;
    while reader.read_byte_record(&mut record)? {
        count += 1;
    }
    Ok(count)
}

// ---------------------------------------------------------------------------
// Row shape
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
struct BoundColumn {
    field: CanonicalField,
    index: usize,
    header: String,
}

/// A [`ColumnMapping`] checked against a header row and reduced to column
/// positions, so rows can be read without any name lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowShape {
    content: BoundColumn,
    optional: Vec<BoundColumn>,
}

impl RowShape {
    /// # Errors
    ///
    /// Returns [`MappingError`] if the mapping does not fit `headers`.
    pub fn bind(mapping: &ColumnMapping, headers: &[String]) -> Result<Self, MappingError> {
        let mut content = None;
        let mut optional = Vec::new();
        for (field, index) in mapping.bind(headers)? {
            let column = BoundColumn {
                field,
                index,
                header: headers[index].clone(),
            };
            if field == CanonicalField::Content {
                content = Some(column);
            } else {
                optional.push(column);
            }
        }
        let content = content.ok_or(MappingError::MissingRequired {
            fields: vec![CanonicalField::Content],
        })?;
        Ok(Self { content, optional })
    }

    /// Turn one raw row into a record.
    ///
    /// # Errors
    ///
    /// Returns the [`RowFailure`] for the first mapped cell that is missing,
    /// not UTF-8, or (for content) null.
    pub fn build_item(&self, ordinal: u64, record: &ByteRecord) -> Result<NewItem, RowFailure> {
        let content = match cell(record, &self.content)? {
            Some(v) if !is_null(v) => v.to_string(),
            _ => {
                return Err(RowFailure::EmptyContent {
                    header: self.content.header.clone(),
                })
            }
        };

        let mut metadata = BTreeMap::new();
        for column in &self.optional {
            if let Some(value) = cell(record, column)? {
                if !is_null(value) {
                    metadata.insert(column.field.as_str().to_string(), value.to_string());
                }
            }
        }

        Ok(NewItem {
            ordinal,
            content,
            metadata,
        })
    }
}

fn cell<'r>(record: &'r ByteRecord, column: &BoundColumn) -> Result<Option<&'r str>, RowFailure> {
    let Some(bytes) = record.get(column.index) else {
        return Err(RowFailure::MissingValue {
            field: column.field,
            header: column.header.clone(),
        });
    };
    std::str::from_utf8(bytes)
        .map(Some)
        .map_err(|_| RowFailure::InvalidUtf8 {
            header: column.header.clone(),
        })
}

// ---------------------------------------------------------------------------
// Batched streaming
// ---------------------------------------------------------------------------

/// One batch of rows: the records that parsed and the rows that did not.
#[derive(Debug, Default)]
pub struct Batch {
    pub items: Vec<NewItem>,
    pub failures: Vec<RowError>,
    /// Rows consumed from the file, parsed or not.
    pub rows: u64,
}

/// Streams data rows in fixed-size batches, holding at most one batch in
/// memory.
pub struct BatchReader {
    reader: Reader<File>,
    shape: RowShape,
    record: ByteRecord,
    next_ordinal: u64,
}

impl BatchReader {
    /// Open `path` positioned after its header row.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Csv`] if the file cannot be opened.
    pub fn open(path: &Path, shape: RowShape) -> Result<Self, SourceError> {
        let mut reader = open(path)?;
        reader.byte_headers()?;
        Ok(Self {
            reader,
            shape,
            record: ByteRecord::new(),
            next_ordinal: 1,
        })
    }

    /// Read up to `size` rows. Returns `None` once the file is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Csv`] if the underlying reader fails. Bad rows
    /// are not errors; they land in [`Batch::failures`].
    pub fn next_batch(&mut self, size: usize) -> Result<Option<Batch>, SourceError> {
        let mut batch = Batch {
            items: Vec::with_capacity(size),
            ..Batch::default()
        };
        while batch.rows < size as u64 && self.reader.read_byte_record(&mut self.record)? {
            let ordinal = self.next_ordinal;
            self.next_ordinal += 1;
            batch.rows += 1;
            match self.shape.build_item(ordinal, &self.record) {
                Ok(item) => batch.items.push(item),
                Err(cause) => batch.failures.push(RowError { row: ordinal, cause }),
            }
        }
        Ok((batch.rows > 0).then_some(batch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use annot_core::{ColumnMappingResolver, MappingOverrides};

    fn spooled(bytes: &[u8]) -> UploadedFile {
        UploadedFile::from_bytes("chat.csv", bytes).unwrap()
    }

    fn shape_for(file: &UploadedFile) -> RowShape {
        let headers = read_headers(file.path()).unwrap();
        let mapping = ColumnMappingResolver::new()
            .resolve(&headers, &MappingOverrides::default())
            .unwrap();
        RowShape::bind(&mapping, &headers).unwrap()
    }

    #[test]
    fn null_tokens_are_case_insensitive() {
        for value in ["", "  ", "NA", "n/a", "NaN", "null", "None"] {
            assert!(is_null(value), "{value:?} should be null");
        }
        assert!(!is_null("0"));
        assert!(!is_null("nothing"));
    }

    #[test]
    fn headers_strip_byte_order_mark() {
        let file = spooled("\u{feff}Turn_ID,User,Message\n1,a,hi\n".as_bytes());
        assert_eq!(read_headers(file.path()).unwrap(), vec!["Turn_ID", "User", "Message"]);
    }

    #[test]
    fn empty_file_has_no_header() {
        let file = spooled(b"");
        assert!(matches!(read_headers(file.path()), Err(SourceError::MissingHeader)));
    }

    #[test]
    fn pre_scan_counts_data_rows_only() {
        let file = spooled(b"text\na\nb\nc\n");
        assert_eq!(count_rows(file.path()).unwrap(), 3);
        let header_only = spooled(b"text\n");
        assert_eq!(count_rows(header_only.path()).unwrap(), 0);
    }

    #[test]
    fn build_item_attaches_resolved_optional_fields() {
        let file = spooled(b"Turn_ID,User,Message,Thread\n7,alice,hello,NA\n");
        let mut reader = BatchReader::open(file.path(), shape_for(&file)).unwrap();
        let batch = reader.next_batch(10).unwrap().unwrap();

        assert_eq!(batch.rows, 1);
        let item = &batch.items[0];
        assert_eq!(item.ordinal, 1);
        assert_eq!(item.content, "hello");
        assert_eq!(item.metadata.get("turn_id").map(String::as_str), Some("7"));
        assert_eq!(item.metadata.get("user_id").map(String::as_str), Some("alice"));
        assert!(!item.metadata.contains_key("thread"));
    }

    #[test]
    fn bad_rows_are_recorded_and_skipped() {
        let mut bytes = b"User,Message\nalice,hi\nbob,".to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe]);
        bytes.extend_from_slice(b"\ncarol,null\ndave\neve,bye\n");
        let file = spooled(&bytes);
        let mut reader = BatchReader::open(file.path(), shape_for(&file)).unwrap();
        let batch = reader.next_batch(100).unwrap().unwrap();

        assert_eq!(batch.rows, 5);
        let ordinals: Vec<u64> = batch.items.iter().map(|i| i.ordinal).collect();
        assert_eq!(ordinals, vec![1, 5]);
        let causes: Vec<&RowFailure> = batch.failures.iter().map(|f| &f.cause).collect();
        assert!(matches!(causes[0], RowFailure::InvalidUtf8 { .. }));
        assert!(matches!(causes[1], RowFailure::EmptyContent { .. }));
        assert!(matches!(causes[2], RowFailure::MissingValue { .. }));
        assert_eq!(batch.failures[2].row, 4);
    }

    #[test]
    fn batches_respect_size_and_keep_source_order() {
        let file = spooled(b"text\n1\n2\n3\n4\n5\n");
        let mut reader = BatchReader::open(file.path(), shape_for(&file)).unwrap();

        let sizes: Vec<u64> = std::iter::from_fn(|| reader.next_batch(2).unwrap())
            .map(|b| b.rows)
            .collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn spooled_file_is_removed_on_drop() {
        let file = spooled(b"text\nhello\n");
        let path = file.path().to_path_buf();
        assert!(path.exists());
        drop(file);
        assert!(!path.exists());
    }

    #[test]
    fn external_file_is_left_in_place() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        let path = temp.path().to_path_buf();
        let file = UploadedFile::external(&path);
        assert_eq!(file.path(), path.as_path());
        drop(file);
        assert!(path.exists());
    }
}
