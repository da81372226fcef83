//! Error types for the package model.

use thiserror::Error;

use crate::element::ElementKind;

/// Errors raised by a backend store.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("no such package: {0}")]
    NoSuchPackage(String),

    #[error("package already in use: {0}")]
    PackageInUse(String),

    #[error("wrong backend format: {0}")]
    WrongFormat(String),

    #[error("element {id} already exists in package {package:?}")]
    DuplicateId { package: String, id: String },

    #[error("element {id} not found in package {package:?}")]
    NotFound { package: String, id: String },

    #[error("invalid backend url: {0}")]
    InvalidUrl(String),

    #[error("internal backend error ({context}): {source}")]
    Internal {
        context: String,
        #[source]
        source: rusqlite::Error,
    },
}

impl BackendError {
    pub(crate) fn internal(context: impl Into<String>) -> impl FnOnce(rusqlite::Error) -> Self {
        let context = context.into();
        move |source| BackendError::Internal { context, source }
    }
}

/// Errors related to configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid storage setting: {0}")]
    InvalidStorage(String),

    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("failed to write TOML config: {0}")]
    TomlWrite(#[from] toml::ser::Error),

    #[error("failed to parse JSON config: {0}")]
    Json(#[from] serde_json::Error),
}

/// Top-level error type for the package model.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("id already in use: {0}")]
    DuplicateId(String),

    #[error("invalid element id: {0:?}")]
    InvalidId(String),

    #[error("no such element: {0}")]
    NoSuchElement(String),

    #[error("import {alias} is not available in {package}")]
    UnreachableImport { alias: String, package: String },

    #[error("{element} is not reachable from {package}")]
    UnreachableReference { element: String, package: String },

    #[error("{id} is a {actual}, expected a {expected}")]
    WrongElementType {
        id: String,
        expected: ElementKind,
        actual: ElementKind,
    },

    #[error("importing {0} would create an import cycle")]
    ImportCycle(String),

    #[error("{0} is already imported")]
    DuplicateImport(String),

    #[error("package {package} is still imported by {importer}")]
    ImportedBy { package: String, importer: String },

    #[error("index {index} out of range for {id} ({len} items)")]
    IndexOutOfRange { id: String, index: usize, len: usize },

    #[error("element {0} is still referenced")]
    ElementInUse(String),

    #[error("semantic error: {0}")]
    SemanticError(String),

    #[error("package {0} is read-only")]
    ReadOnly(String),

    #[error("package is closed")]
    PackageClosed,

    #[error("target already exists: {0}")]
    AlreadyExists(String),

    #[error("no backend claims url {0}")]
    NoClaimingBackend(String),

    #[error("no content handler for mimetype {0}")]
    NoContentHandler(String),

    #[error("malformed content: {0}")]
    MalformedContent(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ModelError {
    /// True for the errors meaning "this thing does not exist".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ModelError::NoSuchElement(_)
                | ModelError::Backend(BackendError::NotFound { .. })
                | ModelError::Backend(BackendError::NoSuchPackage(_))
        )
    }
}

/// Result type alias for model operations.
pub type Result<T> = std::result::Result<T, ModelError>;
