//! Model rules: the hooks an application model plugs into packages.
//!
//! The core model accepts any metadata and keeps no bookkeeping. Rule sets
//! such as [`crate::cam::CamRules`] validate metadata writes, derive list
//! roles and record who changed what.

use std::fmt;

use crate::element::{Element, ListRole};
use crate::error::Result;
use crate::meta::MetaValue;
use crate::package::Package;

/// Side effect a metadata write needs before it is committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaEffect {
    None,
    /// Replace the tag association `old` by `new`, both id-references from
    /// the element owner.
    Retag {
        old: Option<String>,
        new: Option<String>,
    },
}

pub trait ModelRules: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Validate a user metadata write. Must not change any state.
    fn check_set_meta(
        &self,
        _element: &Element,
        _key: &str,
        _value: Option<&MetaValue>,
    ) -> Result<MetaEffect> {
        Ok(MetaEffect::None)
    }

    /// Role of a list given a metadata write, or `None` if `key` does not
    /// affect it.
    fn list_role(&self, _key: &str, _value: Option<&MetaValue>) -> Option<ListRole> {
        None
    }

    fn package_created(&self, _package: &Package) -> Result<()> {
        Ok(())
    }

    fn element_created(&self, _package: &Package, _element: &Element) -> Result<()> {
        Ok(())
    }

    fn element_modified(&self, _element: &Element, _key: &str) -> Result<()> {
        Ok(())
    }
}

/// Rules of the bare package model.
#[derive(Debug, Default, Clone, Copy)]
pub struct CoreRules;

impl ModelRules for CoreRules {
    fn name(&self) -> &str {
        "core"
    }
}
