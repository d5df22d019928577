//! # Run Store
//!
//! Append-only storage of runs inside a dataset directory:
//!
//! ```text
//! <dataset>/
//!   <run name>/
//!     metadata.json   name, creation time, metadata, declared schema
//!     rows.jsonl      one row per line
//! ```
//!
//! Metadata and schema are fixed when the run is created. Every row is
//! checked against the schema before anything is written, so a rejected row
//! leaves the file untouched. There is no crash atomicity: a process killed
//! mid-write can leave a partial last line.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::row::{
    battery_fields, motor_fields, FieldMap, FieldShape, Row, RowRecord, BMS_GROUP,
    HOVERBOARD_GROUP,
};
use crate::battery::BatterySample;
use crate::error::{HoverlogError, Result};
use crate::hoverboard::protocol::MotorFeedback;

/// Run metadata file name
pub const METADATA_FILE: &str = "metadata.json";

/// Row file name
pub const ROWS_FILE: &str = "rows.jsonl";

/// Declared fields of a run, per source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub hoverboard: BTreeMap<String, FieldShape>,
    pub bms: BTreeMap<String, FieldShape>,
}

impl Schema {
    /// Derive the schema from representative samples
    ///
    /// The vector widths of `battery` become the fixed widths of the run.
    pub fn from_samples(motor: &MotorFeedback, battery: &BatterySample) -> Self {
        let shapes = |fields: FieldMap| -> BTreeMap<String, FieldShape> {
            fields
                .into_iter()
                .map(|(name, value)| (name, value.shape()))
                .collect()
        };

        Self {
            hoverboard: shapes(motor_fields(motor)),
            bms: shapes(battery_fields(battery)),
        }
    }

    /// Check a record against the schema
    ///
    /// # Errors
    ///
    /// - [`HoverlogError::UnknownField`] for a field the schema does not declare
    /// - [`HoverlogError::ShapeMismatch`] for a field of the wrong shape
    /// - [`HoverlogError::MissingField`] for a declared field the record lacks
    pub fn validate(&self, record: &RowRecord) -> Result<()> {
        validate_group(HOVERBOARD_GROUP, &self.hoverboard, &record.hoverboard)?;
        validate_group(BMS_GROUP, &self.bms, &record.bms)
    }
}

fn validate_group(
    group: &str,
    declared: &BTreeMap<String, FieldShape>,
    fields: &FieldMap,
) -> Result<()> {
    for (name, value) in fields {
        let path = format!("{}/{}", group, name);
        let shape = declared
            .get(name)
            .ok_or_else(|| HoverlogError::UnknownField(path.clone()))?;

        let actual = value.shape();
        if actual != *shape {
            return Err(HoverlogError::ShapeMismatch {
                field: path,
                expected: shape.width(),
                actual: actual.width(),
            });
        }
    }

    if let Some(name) = declared.keys().find(|name| !fields.contains_key(*name)) {
        return Err(HoverlogError::MissingField(format!("{}/{}", group, name)));
    }

    Ok(())
}

/// Contents of `metadata.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunHeader {
    pub name: String,
    /// RFC 3339 creation time
    pub created: String,
    pub metadata: BTreeMap<String, String>,
    pub schema: Schema,
}

/// Destination of sampled rows
pub trait RowSink: Send {
    /// Persist one row
    ///
    /// # Errors
    ///
    /// Returns error if the row is rejected or cannot be written
    fn write_row(&mut self, row: &Row) -> Result<()>;
}

/// Append handle for one run
#[derive(Debug)]
pub struct RunWriter {
    header: RunHeader,
    file: File,
    rows: u64,
}

impl RunWriter {
    pub fn header(&self) -> &RunHeader {
        &self.header
    }

    pub fn name(&self) -> &str {
        &self.header.name
    }

    /// Rows in the run, including those written before it was reopened
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Validate and append a row
    ///
    /// # Errors
    ///
    /// Returns a schema error (nothing written) or an I/O error
    pub fn append(&mut self, row: &Row) -> Result<()> {
        self.append_record(&row.to_record())
    }

    /// Validate and append an already flattened row
    pub fn append_record(&mut self, record: &RowRecord) -> Result<()> {
        self.header.schema.validate(record)?;

        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        self.file.write_all(&line)?;
        self.file.flush()?;

        self.rows += 1;
        Ok(())
    }
}

impl RowSink for RunWriter {
    fn write_row(&mut self, row: &Row) -> Result<()> {
        self.append(row)
    }
}

/// Directory holding any number of runs
#[derive(Debug, Clone)]
pub struct Dataset {
    root: PathBuf,
}

impl Dataset {
    /// Open a dataset, creating the directory if needed
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        debug!("Dataset at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a new, empty run
    ///
    /// # Arguments
    ///
    /// * `name` - Run name; letters, digits, `_`, `-` and `.`, not starting with `.`
    /// * `metadata` - Free-form metadata, fixed from now on
    /// * `schema` - Fields every row must carry
    ///
    /// # Errors
    ///
    /// - [`HoverlogError::InvalidRunName`] if the name is not usable as a directory
    /// - [`HoverlogError::RunExists`] if a run of that name exists; nothing is written
    pub fn create_run(
        &self,
        name: &str,
        metadata: BTreeMap<String, String>,
        schema: Schema,
    ) -> Result<RunWriter> {
        validate_run_name(name)?;

        let dir = self.root.join(name);
        match fs::create_dir(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(HoverlogError::RunExists(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        let header = RunHeader {
            name: name.to_string(),
            created: Local::now().to_rfc3339(),
            metadata,
            schema,
        };
        fs::write(dir.join(METADATA_FILE), serde_json::to_vec_pretty(&header)?)?;
        let file = File::create(dir.join(ROWS_FILE))?;

        info!("Created run '{}' in {}", name, self.root.display());
        Ok(RunWriter {
            header,
            file,
            rows: 0,
        })
    }

    /// Reopen an existing run for appending
    ///
    /// # Errors
    ///
    /// Returns [`HoverlogError::RunNotFound`] if there is no such run
    pub fn open_run(&self, name: &str) -> Result<RunWriter> {
        let header = self.read_header(name)?;
        let path = self.run_dir(name).join(ROWS_FILE);
        let rows = count_lines(&path)?;
        let file = OpenOptions::new().append(true).create(true).open(&path)?;

        Ok(RunWriter { header, file, rows })
    }

    /// Names of all runs, sorted
    pub fn run_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.path().join(METADATA_FILE).is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Read the metadata block of a run
    pub fn read_header(&self, name: &str) -> Result<RunHeader> {
        validate_run_name(name)?;
        let path = self.run_dir(name).join(METADATA_FILE);
        let contents = match fs::read(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(HoverlogError::RunNotFound(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&contents)?)
    }

    /// Read back every row of a run
    pub fn read_rows(&self, name: &str) -> Result<Vec<RowRecord>> {
        self.read_header(name)?;
        let file = File::open(self.run_dir(name).join(ROWS_FILE))?;

        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
        Ok(records)
    }

    fn run_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

fn validate_run_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));

    if valid {
        Ok(())
    } else {
        Err(HoverlogError::InvalidRunName(name.to_string()))
    }
}

fn count_lines(path: &Path) -> Result<u64> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut count = 0;
    for line in BufReader::new(file).lines() {
        if !line?.trim().is_empty() {
            count += 1;
        }
    }
    Ok(count)
}
