//! Parameter data sources.
//!
//! A test config may name CSV or JSON data files; every iteration draws one
//! row per source and exposes its fields to the templates as
//! `data.<source>.<field>` variables. Sequential mode walks the rows in
//! order and wraps around; random mode picks any row.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::variables::Variables;
use crate::StampedeError;

/// One `data:` entry in the YAML config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataFileConfig {
    pub file: String,
    #[serde(default)]
    pub mode: DataMode,
}

/// How rows are selected per iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataMode {
    #[default]
    Sequential,
    Random,
}

/// A loaded data file.
pub struct Source {
    name: String,
    rows: Vec<Map<String, Value>>,
    mode: DataMode,
    counter: AtomicU64,
}

impl Source {
    pub fn new(name: impl Into<String>, rows: Vec<Map<String, Value>>, mode: DataMode) -> Source {
        Source {
            name: name.into(),
            rows,
            mode,
            counter: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The next row per the configured mode. Safe for concurrent callers.
    pub fn next(&self) -> Option<&Map<String, Value>> {
        if self.rows.is_empty() {
            return None;
        }
        let index = match self.mode {
            DataMode::Random => rand::thread_rng().gen_range(0..self.rows.len()),
            DataMode::Sequential => {
                let n = self.counter.fetch_add(1, Ordering::Relaxed);
                (n % self.rows.len() as u64) as usize
            }
        };
        self.rows.get(index)
    }
}

/// Every configured data source for a run.
#[derive(Default)]
pub struct Sources {
    sources: Vec<Source>,
}

impl Sources {
    /// No data sources configured.
    pub fn empty() -> Sources {
        Sources::default()
    }

    /// Load all configured sources, resolving relative paths against the
    /// config file's directory.
    pub fn load(
        configs: &HashMap<String, DataFileConfig>,
        config_dir: &Path,
    ) -> Result<Sources, StampedeError> {
        let mut sources = Vec::with_capacity(configs.len());
        for (name, config) in configs {
            let path = if Path::new(&config.file).is_absolute() {
                Path::new(&config.file).to_path_buf()
            } else {
                config_dir.join(&config.file)
            };
            sources.push(load_file(name, &path, config.mode)?);
        }
        Ok(Sources { sources })
    }

    /// Draw one row from each source into the iteration's variables.
    pub fn inject(&self, vars: &mut Variables) {
        for source in &self.sources {
            if let Some(row) = source.next() {
                for (field, value) in row {
                    vars.set(format!("data.{}.{}", source.name, field), value.clone());
                }
            }
        }
    }
}

fn load_file(name: &str, path: &Path, mode: DataMode) -> Result<Source, StampedeError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    let rows = match extension.as_str() {
        "csv" => load_csv(path)?,
        "json" => load_json(path)?,
        _ => {
            return Err(StampedeError::InvalidConfig {
                detail: format!(
                    "data source '{}': unsupported file format '{}' (use .csv or .json)",
                    name,
                    path.display()
                ),
            });
        }
    };

    if rows.is_empty() {
        return Err(StampedeError::InvalidConfig {
            detail: format!("data source '{}': {} is empty", name, path.display()),
        });
    }

    info!("data source '{}': {} rows from {}", name, rows.len(), path.display());
    Ok(Source::new(name, rows, mode))
}

/// First row is headers, every later row is data. Missing trailing fields
/// become empty strings.
fn load_csv(path: &Path) -> Result<Vec<Map<String, Value>>, StampedeError> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| StampedeError::InvalidConfig {
        detail: format!("reading {}: {}", path.display(), e),
    })?;
    let headers = reader
        .headers()
        .map_err(|e| StampedeError::InvalidConfig {
            detail: format!("reading {}: {}", path.display(), e),
        })?
        .clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| StampedeError::InvalidConfig {
            detail: format!("reading {}: {}", path.display(), e),
        })?;
        let mut row = Map::new();
        for (index, header) in headers.iter().enumerate() {
            let value = record.get(index).unwrap_or("");
            row.insert(header.to_string(), Value::String(value.to_string()));
        }
        rows.push(row);
    }
    Ok(rows)
}

/// The file must hold a JSON array of objects.
fn load_json(path: &Path) -> Result<Vec<Map<String, Value>>, StampedeError> {
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str::<Vec<Map<String, Value>>>(&contents).map_err(|e| {
        StampedeError::InvalidConfig {
            detail: format!("{} must be a JSON array of objects: {}", path.display(), e),
        }
    })
}
