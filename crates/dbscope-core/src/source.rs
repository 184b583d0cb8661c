//! Package list handed to the catalog by the discovery layer.
//!
//! Discovery (walking an extracted image, recognising app data directories,
//! sniffing SQLite headers) happens elsewhere; this module only describes its
//! output so it can be passed in directly or read from a JSON manifest.

use crate::error::{DbscopeError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One candidate database file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseFile {
    pub file_name: String,
    pub file_path: PathBuf,
}

/// Database files found under one logical directory of a package
/// (`databases`, `cache`, `files`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseDirectory {
    pub logical_dir: String,
    #[serde(default)]
    pub files: Vec<DatabaseFile>,
}

/// An application package and its database files, in discovery order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSource {
    pub package_name: String,
    pub filesystem_path: PathBuf,
    #[serde(default)]
    pub database_files: Vec<DatabaseDirectory>,
}

impl PackageSource {
    pub fn new(package_name: impl Into<String>, filesystem_path: impl Into<PathBuf>) -> Self {
        Self {
            package_name: package_name.into(),
            filesystem_path: filesystem_path.into(),
            database_files: Vec::new(),
        }
    }

    /// Append a database file under `logical_dir`, creating the directory
    /// group on first use.
    pub fn with_database(
        mut self,
        logical_dir: impl Into<String>,
        file_name: impl Into<String>,
        file_path: impl Into<PathBuf>,
    ) -> Self {
        let logical_dir = logical_dir.into();
        let file = DatabaseFile {
            file_name: file_name.into(),
            file_path: file_path.into(),
        };
        match self
            .database_files
            .iter_mut()
            .find(|dir| dir.logical_dir == logical_dir)
        {
            Some(dir) => dir.files.push(file),
            None => self.database_files.push(DatabaseDirectory {
                logical_dir,
                files: vec![file],
            }),
        }
        self
    }
}

/// Read a package list written as a JSON array of [`PackageSource`].
pub fn read_manifest(path: impl AsRef<Path>) -> Result<Vec<PackageSource>> {
    let path = path.as_ref();
    let json =
        std::fs::read_to_string(path).map_err(|e| DbscopeError::io_with_path(e, path))?;
    Ok(serde_json::from_str(&json)?)
}
