use std::sync::Arc;

use super::{CleaningOp, Element, ElementKind, Media, PackageElement};
use crate::backend::ElementData;
use crate::error::{ModelError, Result};
use crate::idref;

typed_element!(
    /// A fragment of a media, delimited by begin and end times, with a content.
    Annotation,
    ElementKind::Annotation
);

/// Total order of annotations across packages: begin, end, media
/// uri-reference, then the annotation's own uri-reference.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AnnotationKey {
    pub begin: i64,
    pub end: i64,
    pub media: String,
    pub uriref: String,
}

impl Annotation {
    fn fields(&self) -> (String, i64, i64) {
        match self.0.data() {
            ElementData::Annotation { media, begin, end } => (media, begin, end),
            _ => (String::new(), 0, 0),
        }
    }

    /// Begin time. Like every field accessor of a live element, this reads
    /// the in-memory value and keeps answering after the owner is closed.
    pub fn begin(&self) -> i64 {
        self.fields().1
    }

    pub fn end(&self) -> i64 {
        self.fields().2
    }

    pub fn duration(&self) -> i64 {
        let (_, begin, end) = self.fields();
        end.saturating_sub(begin)
    }

    /// Id-reference of the media, relative to the owning package.
    pub fn media_idref(&self) -> String {
        self.fields().0
    }

    /// The annotated media. Fails with `UnreachableImport` if the media
    /// lives in an import that could not be loaded.
    pub fn media(&self) -> Result<Media> {
        let media_idref = self.media_idref();
        let cached = self.0.state().media_link.upgrade();
        if let Some(inner) = cached {
            let media = Element::from_inner(inner);
            let owner = self.owner()?;
            if media.make_idref_for(&owner)? == media_idref {
                return media.downcast();
            }
        }
        let media: Media = self.owner()?.get(&media_idref)?;
        self.0.state().media_link = Arc::downgrade(&media.0.inner);
        Ok(media)
    }

    pub fn set_media(&self, media: &Media) -> Result<()> {
        let media_idref = media.make_idref_for(&self.owner()?)?;
        self.0.update_data(CleaningOp::Annotation, "media", |data| {
            if let ElementData::Annotation { media, .. } = data {
                *media = media_idref;
            }
        })?;
        self.0.state().media_link = media.0.downgrade();
        Ok(())
    }

    pub fn set_begin(&self, value: i64) -> Result<()> {
        self.0.update_data(CleaningOp::Annotation, "begin", |data| {
            if let ElementData::Annotation { begin, .. } = data {
                *begin = value;
            }
        })
    }

    pub fn set_end(&self, value: i64) -> Result<()> {
        self.0.update_data(CleaningOp::Annotation, "end", |data| {
            if let ElementData::Annotation { end, .. } = data {
                *end = value;
            }
        })
    }

    /// Sort key used to order annotations from several packages.
    pub fn sort_key(&self) -> Result<AnnotationKey> {
        let owner = self.owner()?;
        let (media, begin, end) = self.fields();
        let media = match owner.resolve_target(&media) {
            Ok((media_owner, id)) => idref::uriref(&media_owner.base_uri(), &id),
            Err(ModelError::UnreachableImport { .. }) => idref::uriref(&owner.base_uri(), &media),
            Err(e) => return Err(e),
        };
        Ok(AnnotationKey {
            begin,
            end,
            media,
            uriref: idref::uriref(&owner.base_uri(), self.id()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Package;

    #[test]
    fn test_bounds_and_media() {
        let package = Package::transient().unwrap();
        let m1 = package.create_media("m1", "http://example.com/a.avi", None).unwrap();
        let m2 = package.create_media("m2", "http://example.com/b.avi", None).unwrap();
        let a = package.create_annotation("a1", &m1, 10, 20, None).unwrap();
        assert_eq!((a.begin(), a.end(), a.duration()), (10, 20, 10));
        assert_eq!(a.media().unwrap(), m1);

        a.set_begin(5).unwrap();
        a.set_end(25).unwrap();
        a.set_media(&m2).unwrap();
        assert!(a.is_dirty());
        assert_eq!(a.media_idref(), "m2");
        assert_eq!(a.media().unwrap(), m2);
        a.flush().unwrap();

        let binding = package.binding().unwrap();
        let row = binding
            .backend
            .get_element(&binding.package_id, "a1")
            .unwrap()
            .unwrap();
        assert_eq!(
            row.data,
            ElementData::Annotation {
                media: "m2".into(),
                begin: 5,
                end: 25
            }
        );
    }

    #[test]
    fn test_duration_saturates() {
        let package = Package::transient().unwrap();
        let m = package.create_media("m", "http://example.com/a.avi", None).unwrap();
        let a = package
            .create_annotation("a", &m, i64::MIN, i64::MAX, None)
            .unwrap();
        assert_eq!(a.duration(), i64::MAX);
    }

    #[test]
    fn test_sort_key_orders_by_time_then_media() {
        let package = Package::transient().unwrap();
        let m1 = package.create_media("m1", "http://example.com/a.avi", None).unwrap();
        let m2 = package.create_media("m2", "http://example.com/b.avi", None).unwrap();
        let a = package.create_annotation("a", &m2, 0, 10, None).unwrap();
        let b = package.create_annotation("b", &m1, 0, 10, None).unwrap();
        let c = package.create_annotation("c", &m1, 0, 5, None).unwrap();
        let mut keys = vec![a.sort_key().unwrap(), b.sort_key().unwrap(), c.sort_key().unwrap()];
        keys.sort();
        let order: Vec<_> = keys.iter().map(|k| k.uriref.rsplit('#').next().unwrap().to_string()).collect();
        assert_eq!(order, vec!["c", "b", "a"]);
    }
}
