//! Cinelab Application Model (CAM).
//!
//! Application rules layered over the core package model:
//!
//! - annotation and relation types are tags whose system type
//!   (`CAMSYS_TYPE`) is `annotation-type` or `relation-type`;
//! - the `cam:type` of an annotation or relation is an id-reference to such a
//!   tag, and setting it moves the element's tag association in the same
//!   backend transaction;
//! - a list whose system type is `schema` plays the [`ListRole::Schema`] role;
//! - every element records who created and last modified it.
//!
//! Open packages with [`create`], [`open`] or [`transient`], or pass
//! [`PackageOptions::cam`] to the core constructors.

mod bookkeeping;
mod group;
mod package;
mod typed;

use std::sync::Arc;

pub use group::CamGroup;
pub use package::{constraint_id, CamPackage};
pub use typed::CamTyped;

use crate::consts::{CAMSYS_TYPE, CAM_TYPE};
use crate::element::{Element, ElementKind, ListRole, PackageElement, Tag};
use crate::error::{ModelError, Result};
use crate::meta::MetaValue;
use crate::package::{Package, PackageOptions};
use crate::rules::{MetaEffect, ModelRules};

/// System types of tags and lists.
pub mod system_type {
    pub const ANNOTATION_TYPE: &str = "annotation-type";
    pub const RELATION_TYPE: &str = "relation-type";
    pub const SCHEMA: &str = "schema";
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CamRules;

impl CamRules {
    /// The retag a `cam:type` write implies, once the new type is checked.
    fn check_cam_type(&self, element: &Element, value: Option<&MetaValue>) -> Result<MetaEffect> {
        let expected = match element.kind() {
            ElementKind::Annotation => system_type::ANNOTATION_TYPE,
            ElementKind::Relation => system_type::RELATION_TYPE,
            _ => return Ok(MetaEffect::None),
        };
        let new = match value {
            None => None,
            Some(MetaValue::IdRef(idref)) => {
                let target = element.owner()?.get_element_opt(idref)?;
                let tag = match target {
                    Some(e) if e.kind() == ElementKind::Tag => e,
                    _ => {
                        return Err(ModelError::SemanticError(format!(
                            "{idref} is not a tag, cannot be the type of {}",
                            element.id()
                        )))
                    }
                };
                check_system_type(&tag, expected)?;
                Some(idref.clone())
            }
            Some(MetaValue::Text(text)) => {
                return Err(ModelError::SemanticError(format!(
                    "type of {} must reference a tag, got text {text:?}",
                    element.id()
                )))
            }
        };
        let old = element
            .get_meta(CAM_TYPE)?
            .and_then(|v| v.as_idref().map(str::to_string));
        Ok(MetaEffect::Retag { old, new })
    }
}

impl ModelRules for CamRules {
    fn name(&self) -> &str {
        "cam"
    }

    fn check_set_meta(
        &self,
        element: &Element,
        key: &str,
        value: Option<&MetaValue>,
    ) -> Result<MetaEffect> {
        match key {
            CAMSYS_TYPE if element.kind() == ElementKind::Tag => Err(ModelError::SemanticError(
                format!("system type of tag {} cannot be changed", element.id()),
            )),
            CAM_TYPE => self.check_cam_type(element, value),
            _ => Ok(MetaEffect::None),
        }
    }

    fn list_role(&self, key: &str, value: Option<&MetaValue>) -> Option<ListRole> {
        if key != CAMSYS_TYPE {
            return None;
        }
        match value {
            Some(MetaValue::Text(t)) if t == system_type::SCHEMA => Some(ListRole::Schema),
            _ => Some(ListRole::List),
        }
    }

    fn package_created(&self, package: &Package) -> Result<()> {
        bookkeeping::init_package(package)
    }

    fn element_created(&self, package: &Package, element: &Element) -> Result<()> {
        bookkeeping::init_element(package, element)
    }

    fn element_modified(&self, element: &Element, key: &str) -> Result<()> {
        bookkeeping::touch_element(element, key)
    }
}

/// The system type of `tag` must be `expected`.
pub(crate) fn check_system_type(tag: &impl PackageElement, expected: &str) -> Result<()> {
    let actual = tag.get_meta_text(CAMSYS_TYPE)?;
    if actual.as_deref() != Some(expected) {
        return Err(ModelError::SemanticError(format!(
            "{} is not an {expected} (system type {:?})",
            tag.id(),
            actual.unwrap_or_default()
        )));
    }
    Ok(())
}

pub(crate) fn is_system_tag(tag: &Tag) -> Result<bool> {
    Ok(tag.get_meta(CAMSYS_TYPE)?.is_some())
}

impl PackageOptions {
    /// Install the CAM rules.
    pub fn cam(self) -> Self {
        self.with_rules(Arc::new(CamRules))
    }
}

/// Create a package with the CAM rules.
pub fn create(url: &str) -> Result<Package> {
    Package::create_with(url, PackageOptions::default().cam())
}

/// Open a package with the CAM rules. Imported packages get them too.
pub fn open(url: &str) -> Result<Package> {
    Package::open_with(url, PackageOptions::default().cam())
}

pub fn transient() -> Result<Package> {
    Package::transient_with(PackageOptions::default().cam())
}
