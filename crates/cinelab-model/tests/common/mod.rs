//! Shared helpers for integration tests

#![allow(dead_code)]

use std::path::PathBuf;

use tempfile::TempDir;

/// URL of an SQLite store inside `dir`, optionally naming a package in it.
pub fn sqlite_url(dir: &TempDir, file: &str, package: Option<&str>) -> String {
    let path = dir.path().join(file);
    match package {
        Some(id) => format!("sqlite:{};{}", path.display(), id),
        None => format!("sqlite:{}", path.display()),
    }
}

pub fn db_path(dir: &TempDir, file: &str) -> PathBuf {
    dir.path().join(file)
}
