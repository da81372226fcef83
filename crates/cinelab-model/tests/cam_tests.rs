//! Application model rules on stored packages

mod common;

use cinelab_model::cam::{self, CamGroup, CamPackage, CamTyped};
use cinelab_model::consts::{CAMSYS_TYPE, CAM_TYPE, DC_CREATOR};
use cinelab_model::{
    Annotation, List, ModelConfig, ModelError, Package, PackageElement, PackageOptions, Relation, Tag,
};
use common::sqlite_url;
use tempfile::TempDir;

fn options() -> PackageOptions {
    let mut config = ModelConfig::default();
    config.bookkeeping.user = Some("tester".to_string());
    PackageOptions::default().with_config(config).cam()
}

#[test]
fn test_wrong_relation_type_changes_nothing() {
    let package = Package::transient_with(options()).unwrap();
    let media = package.create_media("m", "http://example.com/a.avi", None).unwrap();
    let at = package.create_annotation_type("at").unwrap();
    let rt = package.create_relation_type("rt").unwrap();
    let a = package
        .create_typed_annotation("a", &media, 0, 10, &at, None)
        .unwrap();
    let r = package
        .create_typed_relation("r", &[a.clone()], &rt, None)
        .unwrap();

    let before_meta = r.iter_meta().unwrap();
    let before_tags = r.tag_ids(&package, false).unwrap();

    let err = r.set_cam_type(Some(&at)).unwrap_err();
    assert!(matches!(err, ModelError::SemanticError(_)));
    let err = r.set_meta_element(CAM_TYPE, &a).unwrap_err();
    assert!(matches!(err, ModelError::SemanticError(_)));

    assert_eq!(r.iter_meta().unwrap(), before_meta);
    assert_eq!(r.tag_ids(&package, false).unwrap(), before_tags);
    assert_eq!(before_tags, vec!["rt"]);
    package.flush().unwrap();
    assert_eq!(rt.element_ids(&package, false).unwrap(), vec!["r"]);
    assert!(at.element_ids(&package, false).unwrap().contains(&"a".to_string()));
}

#[test]
fn test_types_and_schemas_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let url = sqlite_url(&dir, "cam.db", None);

    let package = Package::create_with(&url, options()).unwrap();
    let media = package.create_media("m", "http://example.com/a.avi", None).unwrap();
    let shot = package.create_annotation_type("shot").unwrap();
    let link = package.create_relation_type("link").unwrap();
    let a = package
        .create_typed_annotation("a", &media, 0, 10, &shot, None)
        .unwrap();
    package
        .create_typed_relation("r", &[a.clone(), a], &link, None)
        .unwrap();
    package
        .create_schema("s", &[shot.element().clone(), link.element().clone()])
        .unwrap();
    package.create_user_list("l", &[]).unwrap();
    package.close().unwrap();

    let package = Package::open_with(&url, options()).unwrap();
    let own = package.own();
    assert_eq!(own.annotation_types().unwrap().len(), 1);
    assert_eq!(own.relation_types().unwrap().len(), 1);
    assert!(own.user_tags().unwrap().is_empty());
    let schemas = own.schemas().unwrap();
    assert_eq!(schemas.len(), 1);
    assert!(schemas[0].is_schema().unwrap());
    assert_eq!(schemas[0].item_idrefs().unwrap(), vec!["shot", "link"]);
    assert_eq!(own.user_lists().unwrap().len(), 1);

    let a: Annotation = package.get("a").unwrap();
    assert_eq!(a.cam_type().unwrap().unwrap().id(), "shot");
    let r: Relation = package.get("r").unwrap();
    assert_eq!(r.cam_type().unwrap().unwrap().id(), "link");
    let shot = a.cam_type().unwrap().unwrap();
    assert!(package.type_constraint(&shot).unwrap().is_some());
    assert_eq!(a.get_meta_text(DC_CREATOR).unwrap().as_deref(), Some("tester"));
}

#[test]
fn test_schema_round_trip_keeps_identity_and_items() {
    let package = Package::transient_with(options()).unwrap();
    let at = package.create_annotation_type("at").unwrap();
    let schema = package.create_schema("s", &[at.element().clone()]).unwrap();
    assert!(schema.is_schema().unwrap());

    schema.set_meta(CAMSYS_TYPE, "user-list").unwrap();
    let same: List = package.get("s").unwrap();
    assert_eq!(same, schema);
    assert!(!same.is_schema().unwrap());
    assert!(package.own().schemas().unwrap().is_empty());

    schema.set_meta(CAMSYS_TYPE, cam::system_type::SCHEMA).unwrap();
    assert!(schema.is_schema().unwrap());
    assert_eq!(schema.item_idrefs().unwrap(), vec!["at"]);
    assert_eq!(package.own().schemas().unwrap(), vec![schema]);
}

#[test]
fn test_imported_packages_use_the_same_rules() {
    let dir = TempDir::new().unwrap();
    let base_url = sqlite_url(&dir, "base.db", None);
    let top_url = sqlite_url(&dir, "top.db", None);

    let base = cam::create(&base_url).unwrap();
    base.create_annotation_type("at").unwrap();
    let top = cam::create(&top_url).unwrap();
    top.create_import("base", &base).unwrap();
    top.close().unwrap();
    base.close().unwrap();

    let top = cam::open(&top_url).unwrap();
    let base = top.imports()[0].1.clone().unwrap();
    assert_eq!(base.rules().name(), "cam");
    let at: Tag = base.get("at").unwrap();
    assert!(matches!(
        at.set_meta(CAMSYS_TYPE, "relation-type"),
        Err(ModelError::SemanticError(_))
    ));
    assert_eq!(top.all().annotation_types().unwrap(), vec![at]);
}
