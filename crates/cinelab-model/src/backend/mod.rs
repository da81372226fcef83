//! Backend stores.
//!
//! A backend persists package rows (elements, metadata, content, sequences,
//! tag associations) and owns no in-memory objects. Backends are pluggable:
//! each [`BackendFactory`] scores how confidently it can handle a URL and the
//! [`BackendRegistry`] picks the highest claim.

pub mod schema;
pub mod sqlite;

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::config::StorageConfig;
use crate::element::ElementKind;
use crate::error::{BackendError, ModelError};
use crate::meta::MetaValue;

pub use sqlite::{SqliteBackend, SqliteFactory};

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Kind-specific columns of an element row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ElementData {
    Media {
        url: String,
        frame_of_reference: String,
    },
    Annotation {
        media: String,
        begin: i64,
        end: i64,
    },
    Relation,
    Tag,
    List,
    View,
    Query,
    Resource,
    Import {
        url: String,
        uri: String,
    },
    Stream {
        url: String,
    },
}

impl ElementData {
    pub fn kind(&self) -> ElementKind {
        match self {
            ElementData::Media { .. } => ElementKind::Media,
            ElementData::Annotation { .. } => ElementKind::Annotation,
            ElementData::Relation => ElementKind::Relation,
            ElementData::Tag => ElementKind::Tag,
            ElementData::List => ElementKind::List,
            ElementData::View => ElementKind::View,
            ElementData::Query => ElementKind::Query,
            ElementData::Resource => ElementKind::Resource,
            ElementData::Import { .. } => ElementKind::Import,
            ElementData::Stream { .. } => ElementKind::Stream,
        }
    }
}

/// An element as stored: owning package id, element id and columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementRow {
    pub package: String,
    pub id: String,
    pub data: ElementData,
}

/// Content attached to annotations, relations, views, queries and resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRow {
    pub mimetype: String,
    pub data: String,
    /// Id-reference of the schema resource, relative to the owning package
    pub schema: Option<String>,
}

/// Row-level filter for annotation queries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationQuery {
    /// Accepted `(package, media idref)` pairs; empty means any media
    pub medias: Vec<(String, String)>,
    pub begin_min: Option<i64>,
    pub begin_max: Option<i64>,
    pub end_min: Option<i64>,
    pub end_max: Option<i64>,
}

/// Storage operations on packages bound to one store.
///
/// Every call names the package id explicitly. Writes are narrow and each
/// one is atomic; callers serialize concurrent writers to one element.
pub trait Backend: Send + Sync + fmt::Debug {
    /// URL of the store, without any package id.
    fn url(&self) -> &str;

    /// Unbind a package so it can be opened again.
    fn release(&self, package: &str);

    /// Remove a package and all its rows.
    fn delete_package(&self, package: &str) -> BackendResult<()>;

    /// Remove every row of a package but keep the package itself.
    fn clear_package(&self, package: &str) -> BackendResult<()>;

    fn get_uri(&self, package: &str) -> BackendResult<String>;
    fn update_uri(&self, package: &str, uri: &str) -> BackendResult<()>;
    fn update_url(&self, package: &str, url: &str) -> BackendResult<()>;

    // Elements

    fn create_element(
        &self,
        package: &str,
        id: &str,
        data: &ElementData,
        content: Option<&ContentRow>,
    ) -> BackendResult<()>;
    fn has_element(&self, package: &str, id: &str) -> BackendResult<Option<ElementKind>>;
    fn get_element(&self, package: &str, id: &str) -> BackendResult<Option<ElementRow>>;
    fn iter_elements(
        &self,
        packages: &[&str],
        kind: Option<ElementKind>,
    ) -> BackendResult<Vec<ElementRow>>;
    /// Annotations sorted by begin, end and media.
    fn iter_annotations(
        &self,
        packages: &[&str],
        query: &AnnotationQuery,
    ) -> BackendResult<Vec<ElementRow>>;
    fn delete_element(&self, package: &str, id: &str) -> BackendResult<()>;
    /// Number of rows of `package` pointing at `idref`.
    fn count_references(&self, package: &str, idref: &str) -> BackendResult<usize>;

    fn update_media(
        &self,
        package: &str,
        id: &str,
        url: &str,
        frame_of_reference: &str,
    ) -> BackendResult<()>;
    fn update_annotation(
        &self,
        package: &str,
        id: &str,
        media: &str,
        begin: i64,
        end: i64,
    ) -> BackendResult<()>;
    fn update_import(&self, package: &str, id: &str, url: &str, uri: &str) -> BackendResult<()>;
    fn update_stream(&self, package: &str, id: &str, url: &str) -> BackendResult<()>;

    // Content

    fn get_content(&self, package: &str, id: &str) -> BackendResult<Option<ContentRow>>;
    fn update_content(&self, package: &str, id: &str, content: &ContentRow) -> BackendResult<()>;

    // Metadata (package metadata uses the empty element id)

    fn get_meta(&self, package: &str, element: &str, key: &str)
        -> BackendResult<Option<MetaValue>>;
    fn iter_meta(&self, package: &str, element: &str) -> BackendResult<Vec<(String, MetaValue)>>;
    fn set_meta(
        &self,
        package: &str,
        element: &str,
        key: &str,
        value: Option<&MetaValue>,
    ) -> BackendResult<()>;

    // Relation members and list items

    fn iter_items(&self, package: &str, owner: &str) -> BackendResult<Vec<String>>;
    fn count_items(&self, package: &str, owner: &str) -> BackendResult<usize>;
    /// Insert at `position`, clamped to the current length.
    fn insert_item(
        &self,
        package: &str,
        owner: &str,
        position: usize,
        idref: &str,
    ) -> BackendResult<()>;
    fn update_item(
        &self,
        package: &str,
        owner: &str,
        position: usize,
        idref: &str,
    ) -> BackendResult<()>;
    fn remove_item(&self, package: &str, owner: &str, position: usize) -> BackendResult<()>;
    /// Owners of the given kind containing one of the `(package, idref)` items.
    fn iter_owners_with_item(
        &self,
        items: &[(String, String)],
        kind: ElementKind,
    ) -> BackendResult<Vec<(String, String)>>;

    // Tag associations

    fn associate_tag(&self, package: &str, element: &str, tag: &str) -> BackendResult<()>;
    fn dissociate_tag(&self, package: &str, element: &str, tag: &str) -> BackendResult<()>;
    /// Replace one association by another in a single transaction.
    fn retag(
        &self,
        package: &str,
        element: &str,
        old: Option<&str>,
        new: Option<&str>,
    ) -> BackendResult<()>;
    /// `(package, element idref)` pairs tagged with the given `(package, tag idref)`.
    fn iter_elements_with_tag(
        &self,
        tags: &[(String, String)],
    ) -> BackendResult<Vec<(String, String)>>;
    /// `(package, tag idref)` pairs associated with the given `(package, element idref)`.
    fn iter_tags_with_element(
        &self,
        elements: &[(String, String)],
    ) -> BackendResult<Vec<(String, String)>>;
    /// Every `(element idref, tag idref)` association declared by a package.
    fn iter_taggings(&self, package: &str) -> BackendResult<Vec<(String, String)>>;
}

/// A backend handle bound to one package.
#[derive(Debug, Clone)]
pub struct Binding {
    pub backend: Arc<dyn Backend>,
    pub package_id: String,
    /// Normalized package URL
    pub url: String,
}

/// Opens stores for the URLs it claims.
pub trait BackendFactory: Send + Sync {
    fn name(&self) -> &str;

    /// Confidence in `0..=99` that this factory handles `url`; 0 refuses.
    fn claims_for(&self, url: &str) -> u8;

    /// Create a new package. Fails with `PackageInUse` if it exists.
    fn create(&self, url: &str, config: &StorageConfig) -> BackendResult<Binding>;

    /// Bind an existing package.
    fn open(&self, url: &str, config: &StorageConfig) -> BackendResult<Binding>;
}

/// Ordered set of backend factories.
pub struct BackendRegistry {
    factories: RwLock<Vec<Arc<dyn BackendFactory>>>,
}

lazy_static! {
    static ref DEFAULT_REGISTRY: BackendRegistry = BackendRegistry::with_defaults();
}

/// The process-wide registry used by `Package::create` and `Package::open`.
pub fn registry() -> &'static BackendRegistry {
    &DEFAULT_REGISTRY
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(Vec::new()),
        }
    }

    /// A registry holding the SQLite backend.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(SqliteFactory::new()));
        registry
    }

    /// Register a factory. Later registrations win ties.
    pub fn register(&self, factory: Arc<dyn BackendFactory>) {
        tracing::debug!("registering backend {}", factory.name());
        self.factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(0, factory);
    }

    /// The factory with the highest nonzero claim for `url`.
    pub fn best_for(&self, url: &str) -> Option<Arc<dyn BackendFactory>> {
        let factories = self.factories.read().unwrap_or_else(PoisonError::into_inner);
        let mut best: Option<(u8, &Arc<dyn BackendFactory>)> = None;
        for factory in factories.iter() {
            let score = factory.claims_for(url);
            if score > 0 && best.map_or(true, |(s, _)| score > s) {
                best = Some((score, factory));
            }
        }
        best.map(|(_, f)| Arc::clone(f))
    }

    pub fn claims(&self, url: &str) -> bool {
        self.best_for(url).is_some()
    }

    pub fn create(&self, url: &str, config: &StorageConfig) -> Result<Binding, ModelError> {
        let factory = self
            .best_for(url)
            .ok_or_else(|| ModelError::NoClaimingBackend(url.to_string()))?;
        Ok(factory.create(url, config)?)
    }

    pub fn open(&self, url: &str, config: &StorageConfig) -> Result<Binding, ModelError> {
        let factory = self
            .best_for(url)
            .ok_or_else(|| ModelError::NoClaimingBackend(url.to_string()))?;
        Ok(factory.open(url, config)?)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Picky(u8);

    impl BackendFactory for Picky {
        fn name(&self) -> &str {
            "picky"
        }

        fn claims_for(&self, url: &str) -> u8 {
            if url.starts_with("sqlite:") {
                self.0
            } else {
                0
            }
        }

        fn create(&self, url: &str, _: &StorageConfig) -> BackendResult<Binding> {
            Err(BackendError::InvalidUrl(url.to_string()))
        }

        fn open(&self, url: &str, _: &StorageConfig) -> BackendResult<Binding> {
            Err(BackendError::InvalidUrl(url.to_string()))
        }
    }

    #[test]
    fn test_highest_claim_wins() {
        let registry = BackendRegistry::with_defaults();
        assert_eq!(registry.best_for("sqlite::memory:").unwrap().name(), "sqlite");

        registry.register(Arc::new(Picky(99)));
        assert_eq!(registry.best_for("sqlite::memory:").unwrap().name(), "picky");

        registry.register(Arc::new(Picky(1)));
        assert_eq!(registry.best_for("sqlite::memory:").unwrap().name(), "picky");
    }

    #[test]
    fn test_unclaimed_url() {
        let registry = BackendRegistry::with_defaults();
        assert!(!registry.claims("http://example.com/package"));
        assert!(matches!(
            registry.open("http://example.com/package", &StorageConfig::default()),
            Err(ModelError::NoClaimingBackend(_))
        ));
    }

    #[test]
    fn test_element_data_kind() {
        let data = ElementData::Annotation {
            media: "m1".into(),
            begin: 0,
            end: 10,
        };
        assert_eq!(data.kind(), ElementKind::Annotation);
        assert_eq!(ElementData::List.kind(), ElementKind::List);
    }
}
