//! Package persistence integration tests

mod common;

use std::collections::BTreeSet;

use cinelab_model::{
    Annotation, Element, ElementKind, Import, List, Media, ModelError, NewContent, Package,
    PackageElement, Query, Relation, Resource, SaveOptions, Stream, Tag, View, WithContent,
};
use common::sqlite_url;
use tempfile::TempDir;

const FOREF: &str = "http://advene.liris.cnrs.fr/ns/frame_of_reference/s;o=10";

fn populate(package: &Package, other: &Package) {
    let media = package
        .create_media("m1", "http://example.com/movie.avi", Some(FOREF))
        .unwrap();
    let a1 = package
        .create_annotation(
            "a1",
            &media,
            10,
            20,
            Some(NewContent::new("application/json", r#"{"shot": 1}"#)),
        )
        .unwrap();
    let a2 = package
        .create_annotation("a2", &media, 15, 30, None)
        .unwrap();
    package
        .create_relation("r1", &[a2.clone(), a1.clone()], Some(NewContent::text("follows")))
        .unwrap();
    let tag = package.create_tag("t1").unwrap();
    package
        .create_list("l1", &[tag.element().clone(), media.element().clone()])
        .unwrap();
    let schema = package
        .create_resource("res1", Some(NewContent::text("schema body")))
        .unwrap();
    package
        .create_view(
            "v1",
            Some(NewContent::new("application/x-advene-builtin-view", "method=summary").with_schema(&schema)),
        )
        .unwrap();
    package
        .create_query("q1", Some(NewContent::text("SELECT")))
        .unwrap();
    package.create_stream("s1", "http://example.com/stream").unwrap();
    package.create_import("other", other).unwrap();
    let foreign = other.create_tag("ft").unwrap();

    package.associate_tag(&a1, &tag).unwrap();
    package.associate_tag(&a2, &foreign).unwrap();
    a1.set_meta("urn:note", "first").unwrap();
    tag.set_meta_element("urn:see-also", &foreign).unwrap();
    package.set_uri("http://example.com/package").unwrap();
    package.set_meta("urn:title", "demo").unwrap();
}

#[test]
fn test_every_element_kind_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let url = sqlite_url(&dir, "store.db", Some("main"));
    let other_url = sqlite_url(&dir, "store.db", Some("other"));

    let other = Package::create(&other_url).unwrap();
    let package = Package::create(&url).unwrap();
    populate(&package, &other);
    package.close().unwrap();
    other.close().unwrap();

    let package = Package::open(&url).unwrap();
    assert_eq!(package.uri().unwrap(), "http://example.com/package");
    assert_eq!(package.get_meta_text("urn:title").unwrap().as_deref(), Some("demo"));

    let media: Media = package.get("m1").unwrap();
    assert_eq!(media.url(), "http://example.com/movie.avi");
    assert_eq!(media.unit().as_deref(), Some("s"));
    assert_eq!(media.origin(), Some(10));

    let a1: Annotation = package.get("a1").unwrap();
    assert_eq!((a1.begin(), a1.end(), a1.duration()), (10, 20, 10));
    assert_eq!(a1.media().unwrap(), media);
    assert_eq!(a1.content_mimetype().unwrap(), "application/json");
    assert_eq!(a1.get_meta_text("urn:note").unwrap().as_deref(), Some("first"));

    let relation: Relation = package.get("r1").unwrap();
    assert_eq!(relation.member_idrefs().unwrap(), vec!["a2", "a1"]);
    assert_eq!(relation.content_data().unwrap(), "follows");

    let list: List = package.get("l1").unwrap();
    assert_eq!(list.item_idrefs().unwrap(), vec!["t1", "m1"]);
    assert_eq!(list.item(1).unwrap(), Element::from(media.clone()));

    let view: View = package.get("v1").unwrap();
    assert_eq!(view.content_schema_idref().unwrap().as_deref(), Some("res1"));
    let schema: Resource = view.content_schema().unwrap().unwrap();
    assert_eq!(schema.content_data().unwrap(), "schema body");

    let query: Query = package.get("q1").unwrap();
    assert_eq!(query.content_data().unwrap(), "SELECT");
    let stream: Stream = package.get("s1").unwrap();
    assert_eq!(stream.url(), "http://example.com/stream");

    let import: Import = package.get("other").unwrap();
    assert_eq!(import.alias(), "other");
    let imported = import.package().unwrap().unwrap();
    assert_eq!(imported.url(), other_url);

    let tag: Tag = package.get("t1").unwrap();
    assert_eq!(tag.element_ids(&package, false).unwrap(), vec!["a1"]);
    let foreign: Tag = package.get("other:ft").unwrap();
    assert_eq!(foreign.element_ids(&package, false).unwrap(), vec!["a2"]);
    assert_eq!(
        tag.get_meta_element("urn:see-also").unwrap(),
        Some(Element::from(foreign))
    );

    let own = package.own();
    assert_eq!(own.elements().count().unwrap(), 11);
    let kinds: BTreeSet<ElementKind> = own.elements().iter().unwrap().map(|e| e.kind()).collect();
    assert_eq!(kinds, ElementKind::ALL.into_iter().collect());
    package.close().unwrap();
    imported.close().unwrap();
}

#[test]
fn test_identity_is_stable() {
    let package = Package::transient().unwrap();
    let media = package.create_media("m1", "http://example.com/a.avi", None).unwrap();
    let created = package.create_annotation("a1", &media, 0, 1, None).unwrap();

    let fetched: Annotation = package.get("a1").unwrap();
    let listed = package.own().annotations().to_vec().unwrap();
    assert_eq!(created, fetched);
    assert_eq!(listed, vec![created.clone()]);

    fetched.set_begin(1).unwrap();
    assert_eq!(created.begin(), 1);
}

#[test]
fn test_close_twice_leaves_store_intact() {
    let dir = TempDir::new().unwrap();
    let url = sqlite_url(&dir, "p.db", None);
    let package = Package::create(&url).unwrap();
    let tag = package.create_tag("t1").unwrap();
    package.close().unwrap();

    assert!(matches!(package.close(), Err(ModelError::PackageClosed)));
    assert!(matches!(tag.set_meta("urn:k", "v"), Err(ModelError::PackageClosed)));
    assert!(matches!(package.create_tag("t2"), Err(ModelError::PackageClosed)));

    let package = Package::open(&url).unwrap();
    assert!(package.has_element("t1").unwrap());
    assert!(!package.has_element("t2").unwrap());
    assert_eq!(package.own().tags().count().unwrap(), 1);
}

#[test]
fn test_json_export_and_sqlite_import() {
    let dir = TempDir::new().unwrap();
    let json = dir.path().join("export.json");
    let json_url = json.display().to_string();
    let target = sqlite_url(&dir, "imported.db", None);

    let source = Package::transient().unwrap();
    let other = Package::transient().unwrap();
    populate(&source, &other);
    source
        .save_as(&json_url, SaveOptions::default())
        .unwrap();

    let loaded = Package::open(&json_url).unwrap();
    loaded.save_as(&target, SaveOptions::default()).unwrap();
    loaded.close().unwrap();

    let copy = Package::open(&target).unwrap();
    let a1: Annotation = copy.get("a1").unwrap();
    assert_eq!(a1.content_data().unwrap(), r#"{"shot": 1}"#);
    let relation: Relation = copy.get("r1").unwrap();
    assert_eq!(relation.members().unwrap().len(), 2);
    assert_eq!(copy.own().elements().count().unwrap(), 11);
}

#[test]
fn test_deleting_referenced_elements() {
    let package = Package::transient().unwrap();
    let media = package.create_media("m1", "http://example.com/a.avi", None).unwrap();
    let a = package.create_annotation("a1", &media, 0, 1, None).unwrap();
    let r = package.create_relation("r1", &[a.clone()], None).unwrap();

    assert!(matches!(
        package.delete_element("a1"),
        Err(ModelError::ElementInUse(_))
    ));
    r.remove(0).unwrap();
    package.delete_element("r1").unwrap();
    package.delete_element("a1").unwrap();
    package.delete_element("m1").unwrap();
    assert!(package.own().elements().is_empty().unwrap());
    assert!(matches!(a.owner(), Err(ModelError::NoSuchElement(_))));
}

#[test]
fn test_field_reads_survive_close() {
    let package = Package::transient().unwrap();
    let media = package.create_media("m1", "http://example.com/a.avi", None).unwrap();
    let a = package.create_annotation("a1", &media, 5, 9, None).unwrap();
    package.close().unwrap();

    assert_eq!((a.begin(), a.end(), a.media_idref()), (5, 9, "m1".to_string()));
    assert_eq!(media.url(), "http://example.com/a.avi");
    assert!(matches!(a.owner(), Err(ModelError::PackageClosed)));
    assert!(matches!(a.media(), Err(ModelError::PackageClosed)));
    assert!(matches!(a.set_begin(0), Err(ModelError::PackageClosed)));
    assert!(matches!(a.get_meta("urn:k"), Err(ModelError::PackageClosed)));
}
