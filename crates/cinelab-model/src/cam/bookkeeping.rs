//! Creator and contributor metadata.

use crate::consts::{DC_CONTRIBUTOR, DC_CREATED, DC_CREATOR, DC_MODIFIED};
use crate::element::Element;
use crate::error::Result;
use crate::meta::MetaValue;
use crate::package::Package;

const KEYS: [&str; 4] = [DC_CREATOR, DC_CREATED, DC_CONTRIBUTOR, DC_MODIFIED];

/// Current timestamp and user, or `None` when bookkeeping is disabled.
fn stamp(package: &Package) -> Option<(String, String)> {
    let config = &package.config().bookkeeping;
    if !config.enabled {
        return None;
    }
    let now = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string();
    Some((now, config.effective_user()))
}

fn touch_package(package: &Package, now: &str, user: &str) -> Result<()> {
    package.write_meta(DC_CONTRIBUTOR, Some(MetaValue::text(user)))?;
    package.write_meta(DC_MODIFIED, Some(MetaValue::text(now)))
}

pub(super) fn init_package(package: &Package) -> Result<()> {
    let Some((now, user)) = stamp(package) else {
        return Ok(());
    };
    package.write_meta(DC_CREATOR, Some(MetaValue::text(&user)))?;
    package.write_meta(DC_CREATED, Some(MetaValue::text(&now)))?;
    touch_package(package, &now, &user)
}

pub(super) fn init_element(package: &Package, element: &Element) -> Result<()> {
    let Some((now, user)) = stamp(package) else {
        return Ok(());
    };
    element.write_meta(DC_CREATOR, Some(MetaValue::text(&user)), false)?;
    element.write_meta(DC_CREATED, Some(MetaValue::text(&now)), false)?;
    element.write_meta(DC_CONTRIBUTOR, Some(MetaValue::text(&user)), false)?;
    element.write_meta(DC_MODIFIED, Some(MetaValue::text(&now)), false)?;
    touch_package(package, &now, &user)
}

pub(super) fn touch_element(element: &Element, key: &str) -> Result<()> {
    if KEYS.contains(&key) {
        return Ok(());
    }
    let package = element.owner_package()?;
    let Some((now, user)) = stamp(&package) else {
        return Ok(());
    };
    element.write_meta(DC_CONTRIBUTOR, Some(MetaValue::text(&user)), false)?;
    element.write_meta(DC_MODIFIED, Some(MetaValue::text(&now)), false)?;
    touch_package(&package, &now, &user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cam::CamPackage;
    use crate::config::ModelConfig;
    use crate::element::PackageElement;
    use crate::package::PackageOptions;

    fn options(enabled: bool) -> PackageOptions {
        let mut config = ModelConfig::default();
        config.bookkeeping.enabled = enabled;
        config.bookkeeping.user = Some("alice".to_string());
        PackageOptions::default().cam().with_config(config)
    }

    #[test]
    fn test_creation_is_recorded() {
        let package = Package::transient_with(options(true)).unwrap();
        assert_eq!(package.get_meta_text(DC_CREATOR).unwrap().as_deref(), Some("alice"));
        let tag = package.create_user_tag("t").unwrap();
        assert_eq!(tag.get_meta_text(DC_CREATOR).unwrap().as_deref(), Some("alice"));
        assert_eq!(tag.get_meta_text(DC_CONTRIBUTOR).unwrap().as_deref(), Some("alice"));
        let created = tag.get_meta_text(DC_CREATED).unwrap().unwrap();
        assert!(chrono::NaiveDateTime::parse_from_str(&created, "%Y-%m-%dT%H:%M:%S").is_ok());
        assert!(package.get_meta_text(DC_MODIFIED).unwrap().is_some());
    }

    #[test]
    fn test_user_writes_refresh_contributor() {
        let package = Package::transient_with(options(true)).unwrap();
        let tag = package.create_user_tag("t").unwrap();
        tag.set_meta(DC_CONTRIBUTOR, "bob").unwrap();
        assert_eq!(tag.get_meta_text(DC_CONTRIBUTOR).unwrap().as_deref(), Some("bob"));
        tag.set_meta("urn:note", "x").unwrap();
        assert_eq!(tag.get_meta_text(DC_CONTRIBUTOR).unwrap().as_deref(), Some("alice"));
    }

    #[test]
    fn test_disabled() {
        let package = Package::transient_with(options(false)).unwrap();
        let tag = package.create_user_tag("t").unwrap();
        assert!(package.get_meta(DC_CREATOR).unwrap().is_none());
        assert!(tag.get_meta(DC_CREATOR).unwrap().is_none());
    }
}
