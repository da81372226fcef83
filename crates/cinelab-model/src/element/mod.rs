//! Package elements.
//!
//! Every element belongs to exactly one package. An [`Element`] is a cheap,
//! clonable handle; two handles are equal when they designate the same
//! in-memory object, and a package hands out at most one live object per id.
//! The owner is only referenced weakly: once the package is closed or
//! dropped, element operations fail with [`ModelError::PackageClosed`].
//! The exceptions are the id, the kind and the plain field accessors
//! (`Annotation::begin`, `Media::url`, `Import::url`, ...), which return the
//! values the element held when its package was closed.
//!
//! Typed views ([`Annotation`], [`Media`], ...) wrap an [`Element`] of the
//! matching kind. Shared behavior lives in the [`PackageElement`] trait.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::mem::Discriminant;
use std::sync::{Arc, MutexGuard, Weak};

use serde::{Deserialize, Serialize};

use crate::backend::{Binding, ContentRow, ElementData};
use crate::dirty::{CleaningOperation, DirtyTracker};
use crate::error::{ModelError, Result};
use crate::events::PackageEvent;
use crate::idref;
use crate::meta::{MetaCache, MetaValue};
use crate::package::{Package, PackageInner};
use crate::rules::MetaEffect;
use crate::sync::lock;

macro_rules! typed_element {
    ($(#[$attr:meta])* $name:ident, $kind:expr) => {
        $(#[$attr])*
        #[derive(Clone, PartialEq, Eq, Hash)]
        pub struct $name(pub(crate) $crate::element::Element);

        impl $crate::element::PackageElement for $name {
            fn element(&self) -> &$crate::element::Element {
                &self.0
            }
        }

        impl $crate::element::TypedElement for $name {
            const KIND: Option<$crate::element::ElementKind> = Some($kind);

            fn from_element_unchecked(element: $crate::element::Element) -> Self {
                $name(element)
            }
        }

        impl From<$name> for $crate::element::Element {
            fn from(typed: $name) -> Self {
                typed.0
            }
        }

        impl TryFrom<$crate::element::Element> for $name {
            type Error = $crate::error::ModelError;

            fn try_from(element: $crate::element::Element) -> $crate::error::Result<Self> {
                element.downcast()
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_tuple(stringify!($name))
                    .field(&$crate::element::PackageElement::id(self))
                    .finish()
            }
        }
    };
}

mod annotation;
mod import;
mod list;
mod media;
mod relation;
pub(crate) mod sequence;
mod simple;
mod tag;

pub use annotation::{Annotation, AnnotationKey};
pub use import::Import;
pub use list::{List, ListRole};
pub use media::{FrameOfReference, Media};
pub use relation::Relation;
pub use simple::{Query, Resource, Stream, View};
pub use tag::Tag;

/// The kind of a package element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Media,
    Annotation,
    Relation,
    Tag,
    List,
    View,
    Query,
    Resource,
    Import,
    Stream,
}

impl ElementKind {
    pub const ALL: [ElementKind; 10] = [
        ElementKind::Media,
        ElementKind::Annotation,
        ElementKind::Relation,
        ElementKind::Tag,
        ElementKind::List,
        ElementKind::View,
        ElementKind::Query,
        ElementKind::Resource,
        ElementKind::Import,
        ElementKind::Stream,
    ];

    /// One-letter code used in backend rows.
    pub fn code(self) -> &'static str {
        match self {
            ElementKind::Media => "m",
            ElementKind::Annotation => "a",
            ElementKind::Relation => "r",
            ElementKind::Tag => "t",
            ElementKind::List => "l",
            ElementKind::View => "v",
            ElementKind::Query => "q",
            ElementKind::Resource => "R",
            ElementKind::Import => "i",
            ElementKind::Stream => "s",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.code() == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            ElementKind::Media => "media",
            ElementKind::Annotation => "annotation",
            ElementKind::Relation => "relation",
            ElementKind::Tag => "tag",
            ElementKind::List => "list",
            ElementKind::View => "view",
            ElementKind::Query => "query",
            ElementKind::Resource => "resource",
            ElementKind::Import => "import",
            ElementKind::Stream => "stream",
        }
    }

    /// Whether elements of this kind carry a content.
    pub fn has_content(self) -> bool {
        matches!(
            self,
            ElementKind::Annotation
                | ElementKind::Relation
                | ElementKind::View
                | ElementKind::Query
                | ElementKind::Resource
        )
    }

    /// Whether elements of this kind hold an ordered sequence of items.
    pub fn has_items(self) -> bool {
        matches!(self, ElementKind::Relation | ElementKind::List)
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Deferred writes an element can have pending. Arguments are read from the
/// element state when the operation runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CleaningOp {
    Media,
    Annotation,
    Import,
    Stream,
    Meta,
}

impl CleaningOperation for CleaningOp {
    type Key = Discriminant<CleaningOp>;

    fn key(&self) -> Self::Key {
        std::mem::discriminant(self)
    }
}

pub(crate) struct ElementInner {
    id: String,
    kind: ElementKind,
    owner: Weak<PackageInner>,
    state: std::sync::Mutex<ElementState>,
}

pub(crate) struct ElementState {
    pub data: ElementData,
    /// Content row, loaded on first access
    pub content: Option<ContentRow>,
    /// Last resolved content schema
    pub schema_link: Weak<ElementInner>,
    /// Last resolved annotation media
    pub media_link: Weak<ElementInner>,
    /// Relation members or list items, loaded on first access
    pub items: Option<Vec<String>>,
    pub role: Option<ListRole>,
    pub meta: MetaCache,
    pub dirty: DirtyTracker<CleaningOp>,
    pub deleted: bool,
}

/// Handle on an element of any kind.
#[derive(Clone)]
pub struct Element {
    pub(crate) inner: Arc<ElementInner>,
}

impl Element {
    pub(crate) fn new(
        owner: &Arc<PackageInner>,
        id: String,
        data: ElementData,
        content: Option<ContentRow>,
    ) -> Self {
        let kind = data.kind();
        Self {
            inner: Arc::new(ElementInner {
                id,
                kind,
                owner: Arc::downgrade(owner),
                state: std::sync::Mutex::new(ElementState {
                    data,
                    content,
                    schema_link: Weak::new(),
                    media_link: Weak::new(),
                    items: None,
                    role: None,
                    meta: MetaCache::default(),
                    dirty: DirtyTracker::new(),
                    deleted: false,
                }),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ElementInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<ElementInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, ElementState> {
        lock(&self.inner.state)
    }

    /// The owning package, if it is still open and this element still exists.
    pub(crate) fn owner_package(&self) -> Result<Package> {
        let inner = self.inner.owner.upgrade().ok_or(ModelError::PackageClosed)?;
        let package = Package::from_inner(inner);
        if package.is_closed() {
            return Err(ModelError::PackageClosed);
        }
        if self.state().deleted {
            return Err(ModelError::NoSuchElement(self.inner.id.clone()));
        }
        Ok(package)
    }

    /// Snapshot of the kind-specific fields.
    pub(crate) fn data(&self) -> ElementData {
        self.state().data.clone()
    }

    /// Apply `change` to the element fields and schedule `op`.
    pub(crate) fn update_data(
        &self,
        op: CleaningOp,
        attribute: &'static str,
        change: impl FnOnce(&mut ElementData),
    ) -> Result<()> {
        let owner = self.owner_package()?;
        let _cs = owner.enter();
        owner.check_writable()?;
        {
            let mut state = self.state();
            change(&mut state.data);
            state.dirty.mark(op);
        }
        owner.note_dirty(self)?;
        owner.emit(PackageEvent::Changed {
            element: self.clone(),
            attribute,
        });
        Ok(())
    }

    pub(crate) fn read_meta(&self, key: &str) -> Result<Option<MetaValue>> {
        let owner = self.owner_package()?;
        let _cs = owner.enter();
        if let Some(value) = self.state().meta.cached(key) {
            return Ok(value.clone());
        }
        let binding = owner.binding()?;
        let value = binding
            .backend
            .get_meta(&binding.package_id, &self.inner.id, key)?;
        self.state().meta.remember(key, value.clone());
        Ok(value)
    }

    /// Set or delete a metadata value. `checked` writes go through the
    /// package rules; internal writes (bookkeeping, system types) bypass them.
    pub(crate) fn write_meta(&self, key: &str, value: Option<MetaValue>, checked: bool) -> Result<()> {
        let owner = self.owner_package()?;
        let _cs = owner.enter();
        owner.check_writable()?;
        let rules = owner.rules();

        let effect = if checked {
            rules.check_set_meta(self, key, value.as_ref())?
        } else {
            MetaEffect::None
        };
        if let MetaEffect::Retag { old, new } = &effect {
            let binding = owner.binding()?;
            binding.backend.retag(
                &binding.package_id,
                &self.inner.id,
                old.as_deref(),
                new.as_deref(),
            )?;
        }

        let role = match self.inner.kind {
            ElementKind::List => Some(rules.list_role(key, value.as_ref())),
            _ => None,
        };
        {
            let mut state = self.state();
            if let Some(Some(role)) = role {
                if state.role != Some(role) {
                    tracing::debug!("list {} is now a {:?}", self.inner.id, role);
                }
                state.role = Some(role);
            }
            state.meta.set(key, value.clone());
            state.dirty.mark(CleaningOp::Meta);
        }
        owner.note_dirty(self)?;
        owner.emit(PackageEvent::ChangedMeta {
            element: Some(self.clone()),
            key: key.to_string(),
            value,
        });
        if checked {
            rules.element_modified(self, key)?;
        }
        Ok(())
    }

    pub(crate) fn flush_into(&self, binding: &Binding) -> Result<()> {
        let backend = &binding.backend;
        let package = binding.package_id.as_str();
        let id = self.inner.id.as_str();
        let mut guard = self.state();
        let ElementState {
            data, meta, dirty, ..
        } = &mut *guard;
        dirty.flush(|op| -> Result<()> {
            match (op, &*data) {
                (CleaningOp::Meta, _) => {
                    meta.flush(|key, value| backend.set_meta(package, id, key, value))?;
                }
                (
                    CleaningOp::Media,
                    ElementData::Media {
                        url,
                        frame_of_reference,
                    },
                ) => backend.update_media(package, id, url, frame_of_reference)?,
                (CleaningOp::Annotation, ElementData::Annotation { media, begin, end }) => {
                    backend.update_annotation(package, id, media, *begin, *end)?
                }
                (CleaningOp::Import, ElementData::Import { url, uri }) => {
                    backend.update_import(package, id, url, uri)?
                }
                (CleaningOp::Stream, ElementData::Stream { url }) => {
                    backend.update_stream(package, id, url)?
                }
                (op, data) => {
                    tracing::warn!("ignoring {:?} on {} element {}", op, data.kind(), id);
                }
            }
            Ok(())
        })
    }

    /// Convert into a typed handle, failing with `WrongElementType`.
    pub fn downcast<T: TypedElement>(self) -> Result<T> {
        match T::KIND {
            Some(expected) if expected != self.inner.kind => Err(ModelError::WrongElementType {
                id: self.inner.id.clone(),
                expected,
                actual: self.inner.kind,
            }),
            _ => Ok(T::from_element_unchecked(self)),
        }
    }

    /// Typed handle if the kind matches.
    pub fn to_kind<T: TypedElement>(&self) -> Option<T> {
        self.clone().downcast().ok()
    }
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Element {}

impl Hash for Element {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(Arc::as_ptr(&self.inner), state);
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element")
            .field("kind", &self.inner.kind)
            .field("id", &self.inner.id)
            .finish()
    }
}

/// Behavior shared by every package element.
pub trait PackageElement {
    fn element(&self) -> &Element;

    fn id(&self) -> &str {
        &self.element().inner.id
    }

    fn kind(&self) -> ElementKind {
        self.element().inner.kind
    }

    /// The owning package; fails once it is closed.
    fn owner(&self) -> Result<Package> {
        self.element().owner_package()
    }

    /// Whether the element has writes not yet flushed to the backend.
    fn is_dirty(&self) -> bool {
        self.element().state().dirty.is_dirty()
    }

    /// Write pending changes. Operations that fail stay pending.
    fn flush(&self) -> Result<()> {
        let owner = self.owner()?;
        let _cs = owner.enter();
        owner.flush_element(self.element())
    }

    /// Absolute `package-uri#id` reference.
    fn uriref(&self) -> Result<String> {
        Ok(idref::uriref(&self.owner()?.base_uri(), self.id()))
    }

    /// The id-reference designating this element from `package`.
    fn make_idref_for(&self, package: &Package) -> Result<String> {
        package.make_id_for(&self.owner()?, self.id())
    }

    fn get_meta(&self, key: &str) -> Result<Option<MetaValue>> {
        self.element().read_meta(key)
    }

    fn get_meta_text(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .get_meta(key)?
            .and_then(|v| v.as_text().map(str::to_string)))
    }

    /// Resolve an id-reference metadata value.
    fn get_meta_element(&self, key: &str) -> Result<Option<Element>> {
        match self.get_meta(key)? {
            Some(MetaValue::IdRef(idref)) => self.owner()?.get_element_opt(&idref),
            _ => Ok(None),
        }
    }

    fn set_meta(&self, key: &str, value: impl Into<MetaValue>) -> Result<()>
    where
        Self: Sized,
    {
        self.element().write_meta(key, Some(value.into()), true)
    }

    /// Store a reference to `target`, which must be reachable from the owner.
    fn set_meta_element(&self, key: &str, target: &impl PackageElement) -> Result<()>
    where
        Self: Sized,
    {
        let idref = target.make_idref_for(&self.owner()?)?;
        self.element()
            .write_meta(key, Some(MetaValue::IdRef(idref)), true)
    }

    fn del_meta(&self, key: &str) -> Result<()> {
        self.element().write_meta(key, None, true)
    }

    /// All metadata, sorted by key, including unflushed changes.
    fn iter_meta(&self) -> Result<Vec<(String, MetaValue)>> {
        let element = self.element();
        let owner = element.owner_package()?;
        let _cs = owner.enter();
        let binding = owner.binding()?;
        let stored = binding.backend.iter_meta(&binding.package_id, self.id())?;
        Ok(element.state().meta.overlay(stored))
    }

    /// Id-references, relative to `package`, of the tags associated with
    /// this element by `package` (or by any package it imports when
    /// `inherited`).
    fn tag_ids(&self, package: &Package, inherited: bool) -> Result<Vec<String>> {
        package.tag_ids_of(self.element(), inherited)
    }

    fn tags(&self, package: &Package, inherited: bool) -> Result<Vec<Tag>> {
        self.tag_ids(package, inherited)?
            .iter()
            .map(|idref| package.get::<Tag>(idref))
            .collect()
    }

    fn has_tag(&self, tag: &Tag, package: &Package, inherited: bool) -> Result<bool> {
        let wanted = match tag.make_idref_for(package) {
            Ok(idref) => idref,
            Err(ModelError::UnreachableReference { .. }) => return Ok(false),
            Err(e) => return Err(e),
        };
        Ok(self.tag_ids(package, inherited)?.contains(&wanted))
    }
}

impl PackageElement for Element {
    fn element(&self) -> &Element {
        self
    }
}

/// Element handles that can be produced from an [`Element`].
pub trait TypedElement: PackageElement + Sized {
    /// The accepted kind; `None` accepts every kind.
    const KIND: Option<ElementKind>;

    fn from_element_unchecked(element: Element) -> Self;
}

impl TypedElement for Element {
    const KIND: Option<ElementKind> = None;

    fn from_element_unchecked(element: Element) -> Self {
        element
    }
}
