//! Template store.
//!
//! A directory of `<part_number>.tpl` files, each one [`SensorTemplate`]
//! in TOML. The file stem is authoritative for the part number.

use gpx_common::consts::TEMPLATE_EXTENSION;
use gpx_common::template::SensorTemplate;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Template store errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateStoreError {
    /// No file for this part number.
    #[error("template not found: {0}")]
    NotFound(String),

    /// The part number cannot be used as a file name.
    #[error("invalid part number: {0:?}")]
    InvalidPartNumber(String),

    /// File or directory access failed.
    #[error("template I/O error on {path:?}: {reason}")]
    Io {
        /// File or directory.
        path: PathBuf,
        /// Cause.
        reason: String,
    },

    /// The file is not a valid template.
    #[error("invalid template {path:?}: {reason}")]
    Parse {
        /// File.
        path: PathBuf,
        /// Cause.
        reason: String,
    },
}

/// Directory of template files.
#[derive(Debug, Clone)]
pub struct TemplateStore {
    dir: PathBuf,
}

impl TemplateStore {
    /// Store rooted at `dir` (created on first write).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Template directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding a part number.
    pub fn path_for(&self, part_number: &str) -> Result<PathBuf, TemplateStoreError> {
        let valid = !part_number.is_empty()
            && part_number != "."
            && part_number != ".."
            && !part_number.contains(['/', '\\']);
        if !valid {
            return Err(TemplateStoreError::InvalidPartNumber(part_number.to_string()));
        }
        Ok(self.dir.join(format!("{part_number}.{TEMPLATE_EXTENSION}")))
    }

    /// Template of one part number.
    pub fn load(&self, part_number: &str) -> Result<SensorTemplate, TemplateStoreError> {
        let path = self.path_for(part_number)?;
        let content = fs::read_to_string(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => TemplateStoreError::NotFound(part_number.to_string()),
            _ => TemplateStoreError::Io {
                path: path.clone(),
                reason: e.to_string(),
            },
        })?;
        let mut template: SensorTemplate =
            toml::from_str(&content).map_err(|e| TemplateStoreError::Parse {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        template.part_number = part_number.to_string();
        Ok(template)
    }

    /// Every readable template, sorted by part number.
    ///
    /// Files without the template extension or that fail to parse are
    /// skipped. A missing directory is an empty store.
    pub fn list(&self) -> Result<Vec<SensorTemplate>, TemplateStoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(TemplateStoreError::Io {
                    path: self.dir.clone(),
                    reason: e.to_string(),
                });
            }
        };

        let mut part_numbers: Vec<String> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == TEMPLATE_EXTENSION))
            .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .collect();
        part_numbers.sort();

        Ok(part_numbers
            .into_iter()
            .filter_map(|pn| match self.load(&pn) {
                Ok(template) => Some(template),
                Err(e) => {
                    debug!("Skipping template {}: {}", pn, e);
                    None
                }
            })
            .collect())
    }

    /// Write a template, replacing any previous file for the part number.
    pub fn add(&self, template: &SensorTemplate) -> Result<PathBuf, TemplateStoreError> {
        let path = self.path_for(&template.part_number)?;
        let io_err = |e: std::io::Error| TemplateStoreError::Io {
            path: path.clone(),
            reason: e.to_string(),
        };
        let content = toml::to_string(template).map_err(|e| TemplateStoreError::Parse {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        fs::create_dir_all(&self.dir).map_err(io_err)?;
        fs::write(&path, content).map_err(io_err)?;
        info!("Template {} written to {:?}", template.part_number, path);
        Ok(path)
    }
}
