use serde::{Deserialize, Serialize};

use super::{sequence, Element, ElementKind, PackageElement};
use crate::consts::CAMSYS_TYPE;
use crate::error::Result;

typed_element!(
    /// An ordered sequence of elements of any kind.
    List,
    ElementKind::List
);

/// What a list stands for. Under the CAM rules a list whose system type is
/// `"schema"` is a schema; the role follows that metadata whenever it changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListRole {
    List,
    Schema,
}

impl List {
    pub fn role(&self) -> Result<ListRole> {
        if let Some(role) = self.0.state().role {
            return Ok(role);
        }
        let owner = self.owner()?;
        let system_type = self.get_meta(CAMSYS_TYPE)?;
        let role = owner
            .rules()
            .list_role(CAMSYS_TYPE, system_type.as_ref())
            .unwrap_or(ListRole::List);
        self.0.state().role = Some(role);
        Ok(role)
    }

    pub fn is_schema(&self) -> Result<bool> {
        Ok(self.role()? == ListRole::Schema)
    }

    pub fn len(&self) -> Result<usize> {
        sequence::len(&self.0)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn item(&self, index: usize) -> Result<Element> {
        sequence::get(&self.0, index)
    }

    pub fn items(&self) -> Result<Vec<Element>> {
        sequence::items(&self.0)
    }

    pub fn item_idrefs(&self) -> Result<Vec<String>> {
        sequence::idrefs(&self.0)
    }

    pub fn push(&self, item: &impl PackageElement) -> Result<()> {
        sequence::insert(&self.0, usize::MAX, item.element())
    }

    pub fn insert(&self, index: usize, item: &impl PackageElement) -> Result<()> {
        sequence::insert(&self.0, index, item.element())
    }

    pub fn set_item(&self, index: usize, item: &impl PackageElement) -> Result<()> {
        sequence::set(&self.0, index, item.element())
    }

    pub fn remove(&self, index: usize) -> Result<()> {
        sequence::remove(&self.0, index)
    }
}
