//! Ordered item sequences shared by relations and lists.
//!
//! Items are stored as id-references relative to the owner. Writes go
//! straight to the backend; the local copy is updated only once the backend
//! accepted the change.

use super::{Element, PackageElement};
use crate::error::{ModelError, Result};
use crate::events::PackageEvent;
use crate::package::Package;

fn with_items<R>(element: &Element, owner: &Package, read: impl FnOnce(&[String]) -> R) -> Result<R> {
    {
        let state = element.state();
        if let Some(items) = &state.items {
            return Ok(read(items));
        }
    }
    let binding = owner.binding()?;
    let items = binding
        .backend
        .iter_items(&binding.package_id, element.id())?;
    let result = read(&items);
    element.state().items = Some(items);
    Ok(result)
}

fn out_of_range(element: &Element, index: usize, len: usize) -> ModelError {
    ModelError::IndexOutOfRange {
        id: element.id().to_string(),
        index,
        len,
    }
}

pub(crate) fn idrefs(element: &Element) -> Result<Vec<String>> {
    let owner = element.owner_package()?;
    let _cs = owner.enter();
    with_items(element, &owner, <[String]>::to_vec)
}

pub(crate) fn len(element: &Element) -> Result<usize> {
    let owner = element.owner_package()?;
    let _cs = owner.enter();
    with_items(element, &owner, <[String]>::len)
}

pub(crate) fn get(element: &Element, index: usize) -> Result<Element> {
    let owner = element.owner_package()?;
    let _cs = owner.enter();
    let (item, len) = with_items(element, &owner, |items| (items.get(index).cloned(), items.len()))?;
    let item = item.ok_or_else(|| out_of_range(element, index, len))?;
    owner.get_element(&item)
}

pub(crate) fn items(element: &Element) -> Result<Vec<Element>> {
    let owner = element.owner_package()?;
    let _cs = owner.enter();
    with_items(element, &owner, <[String]>::to_vec)?
        .iter()
        .map(|idref| owner.get_element(idref))
        .collect()
}

/// Insert `item` at `position`, clamped to the sequence length.
pub(crate) fn insert(element: &Element, position: usize, item: &Element) -> Result<()> {
    let owner = element.owner_package()?;
    let _cs = owner.enter();
    owner.check_writable()?;
    let idref = item.make_idref_for(&owner)?;
    let len = with_items(element, &owner, <[String]>::len)?;
    let position = position.min(len);
    let binding = owner.binding()?;
    binding
        .backend
        .insert_item(&binding.package_id, element.id(), position, &idref)?;
    if let Some(items) = element.state().items.as_mut() {
        items.insert(position, idref);
    }
    owner.emit(PackageEvent::ChangedItems(element.clone()));
    Ok(())
}

pub(crate) fn set(element: &Element, index: usize, item: &Element) -> Result<()> {
    let owner = element.owner_package()?;
    let _cs = owner.enter();
    owner.check_writable()?;
    let idref = item.make_idref_for(&owner)?;
    let len = with_items(element, &owner, <[String]>::len)?;
    if index >= len {
        return Err(out_of_range(element, index, len));
    }
    let binding = owner.binding()?;
    binding
        .backend
        .update_item(&binding.package_id, element.id(), index, &idref)?;
    if let Some(items) = element.state().items.as_mut() {
        items[index] = idref;
    }
    owner.emit(PackageEvent::ChangedItems(element.clone()));
    Ok(())
}

pub(crate) fn remove(element: &Element, index: usize) -> Result<()> {
    let owner = element.owner_package()?;
    let _cs = owner.enter();
    owner.check_writable()?;
    let len = with_items(element, &owner, <[String]>::len)?;
    if index >= len {
        return Err(out_of_range(element, index, len));
    }
    let binding = owner.binding()?;
    binding
        .backend
        .remove_item(&binding.package_id, element.id(), index)?;
    if let Some(items) = element.state().items.as_mut() {
        items.remove(index);
    }
    owner.emit(PackageEvent::ChangedItems(element.clone()));
    Ok(())
}
