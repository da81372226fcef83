//! Collection views over the elements of a package.
//!
//! [`OwnGroup`] covers the elements a package owns; [`AllGroup`] also covers
//! every package reachable through imports, each visited once. Collections
//! are lazy and restartable: every call to [`Collection::iter`] queries the
//! backends again, and elements are instantiated as the iterator advances.

use std::fmt;
use std::marker::PhantomData;

use crate::backend::{AnnotationQuery, ElementData, ElementRow};
use crate::element::{
    Annotation, AnnotationKey, Element, ElementKind, Import, List, Media, PackageElement, Query,
    Relation, Resource, Stream, Tag, TypedElement, View,
};
use crate::error::{ModelError, Result};
use crate::idref;
use crate::merge::{interclass, Keyed};
use crate::package::Package;

/// Restrictions on the annotations of a collection.
#[derive(Debug, Clone, Default)]
pub struct AnnotationFilter {
    pub media: Option<Media>,
    pub begin_min: Option<i64>,
    pub begin_max: Option<i64>,
    pub end_min: Option<i64>,
    pub end_max: Option<i64>,
    /// Only annotations with `begin <= at <= end`
    pub at: Option<i64>,
}

impl AnnotationFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn media(mut self, media: &Media) -> Self {
        self.media = Some(media.clone());
        self
    }

    pub fn begin_min(mut self, value: i64) -> Self {
        self.begin_min = Some(value);
        self
    }

    pub fn begin_max(mut self, value: i64) -> Self {
        self.begin_max = Some(value);
        self
    }

    pub fn end_min(mut self, value: i64) -> Self {
        self.end_min = Some(value);
        self
    }

    pub fn end_max(mut self, value: i64) -> Self {
        self.end_max = Some(value);
        self
    }

    pub fn at(mut self, value: i64) -> Self {
        self.at = Some(value);
        self
    }

    fn to_query(&self) -> AnnotationQuery {
        let tighten_max = |a: Option<i64>, b: Option<i64>| match (a, b) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let tighten_min = |a: Option<i64>, b: Option<i64>| match (a, b) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        AnnotationQuery {
            medias: Vec::new(),
            begin_min: self.begin_min,
            begin_max: tighten_max(self.begin_max, self.at),
            end_min: tighten_min(self.end_min, self.at),
            end_max: self.end_max,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Own,
    All,
}

#[derive(Debug, Clone)]
enum Selection {
    Kind(Option<ElementKind>),
    Annotations(AnnotationFilter),
    Owners { kind: ElementKind, item: Element },
}

/// A lazily evaluated set of elements of type `T`.
pub struct Collection<T> {
    package: Package,
    scope: Scope,
    selection: Selection,
    _kind: PhantomData<fn() -> T>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            package: self.package.clone(),
            scope: self.scope,
            selection: self.selection.clone(),
            _kind: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("package", &self.package)
            .field("scope", &self.scope)
            .field("selection", &self.selection)
            .finish()
    }
}

type Rows = Box<dyn Iterator<Item = (Package, ElementRow)>>;

impl<T: TypedElement> Collection<T> {
    fn new(package: Package, scope: Scope, selection: Selection) -> Self {
        Self {
            package,
            scope,
            selection,
            _kind: PhantomData,
        }
    }

    fn packages(&self) -> Vec<Package> {
        match self.scope {
            Scope::Own => vec![self.package.clone()],
            Scope::All => self.package.reachable(),
        }
    }

    pub fn iter(&self) -> Result<ElementIter<T>> {
        let rows = match &self.selection {
            Selection::Kind(kind) => self.kind_rows(*kind)?,
            Selection::Annotations(filter) => self.annotation_rows(filter)?,
            Selection::Owners { kind, item } => self.owner_rows(*kind, item)?,
        };
        Ok(ElementIter {
            rows,
            _kind: PhantomData,
        })
    }

    pub fn to_vec(&self) -> Result<Vec<T>> {
        Ok(self.iter()?.collect())
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.iter()?.count())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.iter()?.next().is_none())
    }

    pub fn contains(&self, element: &impl PackageElement) -> Result<bool> {
        let wanted = element.element();
        Ok(self.iter()?.any(|e| e.element() == wanted))
    }

    /// The member designated by `idref` (relative to the package of the
    /// group), if it belongs to this collection.
    pub fn get(&self, idref: &str) -> Result<Option<T>> {
        let element = match self.package.get_element_opt(idref) {
            Ok(Some(element)) => element,
            Ok(None) | Err(ModelError::UnreachableImport { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        if !self.contains(&element)? {
            return Ok(None);
        }
        element.downcast().map(Some)
    }

    /// Id-references of the members, relative to the package of the group.
    pub fn ids(&self) -> Result<Vec<String>> {
        self.iter()?
            .map(|e| e.make_idref_for(&self.package))
            .collect()
    }

    fn kind_rows(&self, kind: Option<ElementKind>) -> Result<Rows> {
        let mut rows = Vec::new();
        for (backend, members) in Package::by_backend(&self.packages())? {
            let ids: Vec<&str> = members.iter().map(|(id, _)| id.as_str()).collect();
            for row in backend.iter_elements(&ids, kind)? {
                if let Some((_, package)) = members.iter().find(|(id, _)| *id == row.package) {
                    rows.push((package.clone(), row));
                }
            }
        }
        Ok(Box::new(rows.into_iter()))
    }

    /// One sorted stream per package, merged on `AnnotationKey`.
    fn annotation_rows(&self, filter: &AnnotationFilter) -> Result<Rows> {
        let packages = self.packages();
        for package in &packages {
            if !package.is_readonly() {
                package.flush()?;
            }
        }
        let mut streams = Vec::new();
        for (backend, members) in Package::by_backend(&packages)? {
            let mut query = filter.to_query();
            if let Some(media) = &filter.media {
                for (id, package) in &members {
                    match media.make_idref_for(package) {
                        Ok(idref) => query.medias.push((id.clone(), idref)),
                        Err(ModelError::UnreachableReference { .. }) => {}
                        Err(e) => return Err(e),
                    }
                }
                if query.medias.is_empty() {
                    continue;
                }
            }
            let ids: Vec<&str> = members.iter().map(|(id, _)| id.as_str()).collect();
            let found = backend.iter_annotations(&ids, &query)?;
            for (id, package) in &members {
                let base = package.base_uri();
                let mut keyed = Vec::new();
                for row in found.iter().filter(|row| row.package == *id) {
                    keyed.push(Keyed {
                        key: annotation_key(package, &base, row)?,
                        value: (package.clone(), row.clone()),
                    });
                }
                keyed.sort();
                streams.push(keyed.into_iter());
            }
        }
        Ok(Box::new(interclass(streams).map(|keyed| keyed.value)))
    }

    fn owner_rows(&self, kind: ElementKind, item: &Element) -> Result<Rows> {
        let mut rows = Vec::new();
        for (backend, members) in Package::by_backend(&self.packages())? {
            let mut pairs = Vec::new();
            for (id, package) in &members {
                match item.make_idref_for(package) {
                    Ok(idref) => pairs.push((id.clone(), idref)),
                    Err(ModelError::UnreachableReference { .. }) => {}
                    Err(e) => return Err(e),
                }
            }
            if pairs.is_empty() {
                continue;
            }
            for (package_id, owner) in backend.iter_owners_with_item(&pairs, kind)? {
                let Some((_, package)) = members.iter().find(|(id, _)| *id == package_id) else {
                    continue;
                };
                if let Some(row) = backend.get_element(&package_id, &owner)? {
                    rows.push((package.clone(), row));
                }
            }
        }
        Ok(Box::new(rows.into_iter()))
    }
}

fn annotation_key(package: &Package, base: &str, row: &ElementRow) -> Result<AnnotationKey> {
    let ElementData::Annotation { media, begin, end } = &row.data else {
        return Err(ModelError::WrongElementType {
            id: row.id.clone(),
            expected: ElementKind::Annotation,
            actual: row.data.kind(),
        });
    };
    let media = match package.resolve_target(media) {
        Ok((owner, id)) => idref::uriref(&owner.base_uri(), &id),
        Err(ModelError::UnreachableImport { .. }) => idref::uriref(base, media),
        Err(e) => return Err(e),
    };
    Ok(AnnotationKey {
        begin: *begin,
        end: *end,
        media,
        uriref: idref::uriref(base, &row.id),
    })
}

/// Iterator over the members of a [`Collection`].
pub struct ElementIter<T> {
    rows: Rows,
    _kind: PhantomData<fn() -> T>,
}

impl<T: TypedElement> Iterator for ElementIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let (package, row) = self.rows.next()?;
        Some(T::from_element_unchecked(package.instantiate(row)))
    }
}

macro_rules! group {
    ($(#[$attr:meta])* $name:ident, $scope:expr) => {
        $(#[$attr])*
        #[derive(Debug, Clone)]
        pub struct $name {
            package: Package,
        }

        impl $name {
            pub(crate) fn new(package: Package) -> Self {
                Self { package }
            }

            pub fn package(&self) -> &Package {
                &self.package
            }

            fn collection<T: TypedElement>(&self, selection: Selection) -> Collection<T> {
                Collection::new(self.package.clone(), $scope, selection)
            }

            fn of_kind<T: TypedElement>(&self) -> Collection<T> {
                self.collection(Selection::Kind(T::KIND))
            }

            /// Elements of every kind.
            pub fn elements(&self) -> Collection<Element> {
                self.of_kind()
            }

            pub fn medias(&self) -> Collection<Media> {
                self.of_kind()
            }

            /// Annotations ordered by begin, end, media and uri-reference.
            pub fn annotations(&self) -> Collection<Annotation> {
                self.annotations_where(AnnotationFilter::default())
            }

            pub fn annotations_where(&self, filter: AnnotationFilter) -> Collection<Annotation> {
                self.collection(Selection::Annotations(filter))
            }

            pub fn relations(&self) -> Collection<Relation> {
                self.of_kind()
            }

            pub fn tags(&self) -> Collection<Tag> {
                self.of_kind()
            }

            pub fn lists(&self) -> Collection<List> {
                self.of_kind()
            }

            pub fn views(&self) -> Collection<View> {
                self.of_kind()
            }

            pub fn queries(&self) -> Collection<Query> {
                self.of_kind()
            }

            pub fn resources(&self) -> Collection<Resource> {
                self.of_kind()
            }

            pub fn imports(&self) -> Collection<Import> {
                self.of_kind()
            }

            pub fn streams(&self) -> Collection<Stream> {
                self.of_kind()
            }

            /// Relations having `annotation` among their members.
            pub fn relations_with_member(&self, annotation: &Annotation) -> Collection<Relation> {
                self.collection(Selection::Owners {
                    kind: ElementKind::Relation,
                    item: annotation.element().clone(),
                })
            }

            /// Lists having `item` among their items.
            pub fn lists_with_item(&self, item: &impl PackageElement) -> Collection<List> {
                self.collection(Selection::Owners {
                    kind: ElementKind::List,
                    item: item.element().clone(),
                })
            }
        }
    };
}

group!(
    /// Elements owned by one package.
    OwnGroup,
    Scope::Own
);

group!(
    /// Elements of a package and of every package reachable through its
    /// imports.
    AllGroup,
    Scope::All
);
