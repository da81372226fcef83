//! cinelab-model: package/element object model for time-coded video annotations
//!
//! This library provides:
//! - Packages of typed elements (medias, annotations, relations, tags, lists,
//!   views, queries, resources, imports, streams) with metadata and content
//! - Cross-package imports and id-reference resolution (`alias:id`)
//! - One live object per element, with deferred write-back to a backend
//! - An SQLite backend store and a JSON package format
//! - Own/all collection views, with sorted annotation queries
//! - Change notifications through handlers connected to a package
//! - The Cinelab application rules ([`cam`]): annotation and relation types,
//!   schemas and bookkeeping metadata
//!
//! ```no_run
//! use cinelab_model::{cam, cam::CamPackage};
//!
//! let package = cam::create("sqlite:/tmp/movie.db")?;
//! let media = package.create_media("m1", "http://example.com/movie.avi", None)?;
//! let shot = package.create_annotation_type("shot")?;
//! package.create_typed_annotation("a1", &media, 0, 1500, &shot, None)?;
//! for annotation in package.all().annotations().iter()? {
//!     println!("{:?} {}-{}", annotation, annotation.begin(), annotation.end());
//! }
//! package.close()?;
//! # Ok::<(), cinelab_model::ModelError>(())
//! ```

pub mod backend;
pub mod cam;
pub mod config;
pub mod consts;
pub mod content;
pub mod dirty;
pub mod element;
pub mod error;
pub mod events;
pub mod group;
pub mod idref;
pub mod merge;
pub mod meta;
pub mod package;
pub mod rules;
pub mod serialize;
pub mod sync;

pub use config::ModelConfig;
pub use content::{NewContent, ParsedContent, WithContent};
pub use element::{
    Annotation, Element, ElementKind, Import, List, ListRole, Media, PackageElement, Query,
    Relation, Resource, Stream, Tag, TypedElement, View,
};
pub use error::{BackendError, ConfigError, ModelError, Result};
pub use events::{EventKind, HandlerId, PackageEvent};
pub use group::{AllGroup, AnnotationFilter, Collection, OwnGroup};
pub use meta::MetaValue;
pub use package::{Package, PackageOptions, SaveOptions};
pub use rules::{CoreRules, ModelRules};
