use super::{Element, ElementKind, PackageElement};
use crate::error::{ModelError, Result};
use crate::package::Package;

typed_element!(
    /// A tag. Associations between elements and tags are declared by
    /// packages, not stored in the tag itself.
    Tag,
    ElementKind::Tag
);

impl Tag {
    /// Id-references, relative to `package`, of the elements tagged with
    /// this tag by `package` (or by any package it imports when `inherited`).
    pub fn element_ids(&self, package: &Package, inherited: bool) -> Result<Vec<String>> {
        package.element_ids_with_tag(self, inherited)
    }

    pub fn elements(&self, package: &Package, inherited: bool) -> Result<Vec<Element>> {
        self.element_ids(package, inherited)?
            .iter()
            .map(|idref| package.get_element(idref))
            .collect()
    }

    pub fn has_element(
        &self,
        element: &impl PackageElement,
        package: &Package,
        inherited: bool,
    ) -> Result<bool> {
        let wanted = match element.make_idref_for(package) {
            Ok(idref) => idref,
            Err(ModelError::UnreachableReference { .. }) => return Ok(false),
            Err(e) => return Err(e),
        };
        Ok(self.element_ids(package, inherited)?.contains(&wanted))
    }
}
