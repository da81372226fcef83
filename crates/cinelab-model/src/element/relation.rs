use super::{sequence, Annotation, ElementKind, PackageElement};
use crate::error::Result;

typed_element!(
    /// An ordered sequence of annotations, with a content.
    Relation,
    ElementKind::Relation
);

impl Relation {
    pub fn len(&self) -> Result<usize> {
        sequence::len(&self.0)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn member(&self, index: usize) -> Result<Annotation> {
        sequence::get(&self.0, index)?.downcast()
    }

    pub fn members(&self) -> Result<Vec<Annotation>> {
        sequence::items(&self.0)?
            .into_iter()
            .map(|e| e.downcast())
            .collect()
    }

    /// Member id-references relative to the owning package.
    pub fn member_idrefs(&self) -> Result<Vec<String>> {
        sequence::idrefs(&self.0)
    }

    pub fn push(&self, member: &Annotation) -> Result<()> {
        self.insert(usize::MAX, member)
    }

    pub fn insert(&self, index: usize, member: &Annotation) -> Result<()> {
        sequence::insert(&self.0, index, member.element())
    }

    pub fn set_member(&self, index: usize, member: &Annotation) -> Result<()> {
        sequence::set(&self.0, index, member.element())
    }

    pub fn remove(&self, index: usize) -> Result<()> {
        sequence::remove(&self.0, index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::Package;

    #[test]
    fn test_members_write_through() {
        let package = Package::transient().unwrap();
        let m = package.create_media("m1", "http://example.com/a.avi", None).unwrap();
        let a1 = package.create_annotation("a1", &m, 0, 10, None).unwrap();
        let a2 = package.create_annotation("a2", &m, 10, 20, None).unwrap();
        let a3 = package.create_annotation("a3", &m, 20, 30, None).unwrap();
        let r = package.create_relation("r1", &[a1.clone(), a2.clone()], None).unwrap();
        assert_eq!(r.members().unwrap(), vec![a1.clone(), a2.clone()]);

        r.insert(1, &a3).unwrap();
        r.push(&a1).unwrap();
        assert_eq!(r.member_idrefs().unwrap(), vec!["a1", "a3", "a2", "a1"]);
        assert!(!r.is_dirty());

        r.set_member(3, &a2).unwrap();
        r.remove(0).unwrap();
        assert_eq!(r.member_idrefs().unwrap(), vec!["a3", "a2", "a2"]);
        assert!(matches!(r.remove(3), Err(ModelError::IndexOutOfRange { len: 3, .. })));

        let binding = package.binding().unwrap();
        assert_eq!(
            binding.backend.iter_items(&binding.package_id, "r1").unwrap(),
            vec!["a3", "a2", "a2"]
        );
        assert_eq!(r.member(0).unwrap(), a3);
    }
}
