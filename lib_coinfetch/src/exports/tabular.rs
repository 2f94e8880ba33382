//! # Tabular Export
//!
//! Flattens an [`Envelope`] into rows and columns and writes it as CSV.
//!
//! ## Shapes
//! - list of objects: one row per item, columns are the union of keys in
//!   first-seen order; scalar items land in a `value` column.
//! - object of objects (`{"bitcoin": {"usd": 1}}`): one row per key, an `id`
//!   column first, then the union of the nested keys.
//! - any other object: a single row of its top-level fields.
//! - failure: a single row with `status = error` and the error message.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::info;

use crate::retrieve::envelope::{Envelope, ERROR_FIELD, ERROR_MARKER, STATUS_FIELD};

/// Column holding the outer key of an object-of-objects body.
pub const ID_COLUMN: &str = "id";
/// Column holding scalar list items.
pub const VALUE_COLUMN: &str = "value";

static SUFFIX_STRIP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[:;,!@#$%^&*()]").expect("Invalid regex"));

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write CSV file {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("Failed to flush CSV file {path}: {source}")]
    Flush {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Rows of rendered cells under a header line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Flattens an envelope according to its shape.
    pub fn from_envelope(envelope: &Envelope) -> Self {
        match envelope {
            Envelope::List { items, .. } => Self::from_items(items),
            Envelope::Object { body, .. } if body.is_empty() => Self::default(),
            Envelope::Object { body, .. } => {
                if body.values().all(Value::is_object) {
                    Self::from_keyed_objects(body)
                } else {
                    Self::from_records(std::iter::once(body.clone()))
                }
            }
            Envelope::Failure { message, .. } => Self {
                headers: vec![STATUS_FIELD.to_string(), ERROR_FIELD.to_string()],
                rows: vec![vec![ERROR_MARKER.to_string(), message.clone()]],
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn from_items(items: &[Value]) -> Self {
        let records = items.iter().map(|item| match item {
            Value::Object(map) => map.clone(),
            scalar => {
                let mut map = Map::new();
                map.insert(VALUE_COLUMN.to_string(), scalar.clone());
                map
            }
        });
        Self::from_records(records)
    }

    fn from_keyed_objects(body: &Map<String, Value>) -> Self {
        let records = body.iter().map(|(key, nested)| {
            let mut map = Map::new();
            map.insert(ID_COLUMN.to_string(), Value::String(key.clone()));
            if let Value::Object(fields) = nested {
                for (k, v) in fields {
                    map.insert(k.clone(), v.clone());
                }
            }
            map
        });
        Self::from_records(records)
    }

    fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = Map<String, Value>>,
    {
        let records: Vec<_> = records.into_iter().collect();
        let mut headers: Vec<String> = Vec::new();
        for record in &records {
            for key in record.keys() {
                if !headers.contains(key) {
                    headers.push(key.clone());
                }
            }
        }

        let rows = records
            .iter()
            .map(|record| {
                headers
                    .iter()
                    .map(|h| record.get(h).map(render_cell).unwrap_or_default())
                    .collect()
            })
            .collect();

        Self { headers, rows }
    }
}

/// Renders one JSON value as a CSV cell.
pub fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        nested => nested.to_string(),
    }
}

/// Removes `:;,!@#$%^&*()` so the suffix is safe inside a file name.
///
/// ```
/// use lib_coinfetch::exports::tabular::sanitize_suffix;
///
/// assert_eq!(sanitize_suffix("_2022-05-01T23:00"), "_2022-05-01T2300");
/// ```
pub fn sanitize_suffix(suffix: &str) -> String {
    SUFFIX_STRIP.replace_all(suffix, "").into_owned()
}

/// Path of the CSV file for `base_name` and `suffix` under `output_dir`.
pub fn csv_path(output_dir: &Path, base_name: &str, suffix: &str) -> PathBuf {
    output_dir.join(format!("{base_name}{}.csv", sanitize_suffix(suffix)))
}

/// Writes `table` to `<output_dir>/<base_name><suffix>.csv` and returns the path.
///
/// Missing parent directories are created; an existing file is replaced.
pub fn write_csv(
    table: &Table,
    output_dir: &Path,
    base_name: &str,
    suffix: &str,
) -> Result<PathBuf, ExportError> {
    let path = csv_path(output_dir, base_name, suffix);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| ExportError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let csv_err = |source| ExportError::Csv {
        path: path.clone(),
        source,
    };
    let mut wtr = csv::Writer::from_path(&path).map_err(csv_err)?;
    if !table.headers.is_empty() {
        wtr.write_record(&table.headers).map_err(csv_err)?;
    }
    for row in &table.rows {
        wtr.write_record(row).map_err(csv_err)?;
    }
    wtr.flush().map_err(|source| ExportError::Flush {
        path: path.clone(),
        source,
    })?;

    info!(path = %path.display(), rows = table.rows.len(), "File written");
    Ok(path)
}
