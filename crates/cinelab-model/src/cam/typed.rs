use crate::consts::CAM_TYPE;
use crate::element::{Annotation, PackageElement, Relation, Tag};
use crate::error::Result;

/// Elements carrying a `cam:type`.
pub trait CamTyped: PackageElement + Sized {
    fn cam_type(&self) -> Result<Option<Tag>> {
        match self.get_meta_element(CAM_TYPE)? {
            Some(element) => element.downcast().map(Some),
            None => Ok(None),
        }
    }

    /// Set or clear the type. The tag association follows.
    fn set_cam_type(&self, type_tag: Option<&Tag>) -> Result<()> {
        match type_tag {
            Some(tag) => self.set_meta_element(CAM_TYPE, tag),
            None => self.del_meta(CAM_TYPE),
        }
    }
}

impl CamTyped for Annotation {}
impl CamTyped for Relation {}
