//! Cross-package imports and the merged views over them

mod common;

use cinelab_model::{AnnotationFilter, Import, ModelError, Package, PackageElement, SaveOptions, Tag};
use common::{db_path, sqlite_url};
use rusqlite::{params, Connection};
use tempfile::TempDir;

/// `top` imports `left` and `right`, which both import `base`.
struct Diamond {
    base: Package,
    left: Package,
    right: Package,
    top: Package,
}

fn diamond() -> Diamond {
    let base = Package::transient().unwrap();
    let media = base.create_media("m", "http://example.com/a.avi", None).unwrap();
    base.create_annotation("b1", &media, 0, 10, None).unwrap();
    base.create_annotation("b2", &media, 40, 50, None).unwrap();

    let left = Package::transient().unwrap();
    left.create_import("base", &base).unwrap();
    left.create_annotation("l1", &media, 5, 10, None).unwrap();

    let right = Package::transient().unwrap();
    right.create_import("base", &base).unwrap();
    right.create_annotation("r1", &media, 5, 8, None).unwrap();
    right.create_annotation("r2", &media, 45, 60, None).unwrap();

    let top = Package::transient().unwrap();
    top.create_import("left", &left).unwrap();
    top.create_import("right", &right).unwrap();

    Diamond {
        base,
        left,
        right,
        top,
    }
}

#[test]
fn test_all_annotations_are_merged_once_in_order() {
    let d = diamond();
    let ids = d.top.all().annotations().ids().unwrap();
    assert_eq!(
        ids,
        vec!["left:base:b1", "right:r1", "left:l1", "left:base:b2", "right:r2"]
    );
    assert_eq!(d.top.own().annotations().count().unwrap(), 0);

    let mut previous = None;
    for annotation in d.top.all().annotations().iter().unwrap() {
        let key = annotation.sort_key().unwrap();
        if let Some(previous) = previous {
            assert!(previous < key);
        }
        previous = Some(key);
    }
}

#[test]
fn test_filtered_annotations_across_imports() {
    let d = diamond();
    let media = d.base.get("m").unwrap();
    let all = d.top.all();
    let at = all
        .annotations_where(AnnotationFilter::new().media(&media).at(7))
        .ids()
        .unwrap();
    assert_eq!(at, vec!["left:base:b1", "right:r1", "left:l1"]);

    let late = all
        .annotations_where(AnnotationFilter::new().begin_min(40))
        .ids()
        .unwrap();
    assert_eq!(late, vec!["left:base:b2", "right:r2"]);
}

#[test]
fn test_imported_elements_resolve_through_aliases() {
    let d = diamond();
    let b1 = d.top.get_element("right:base:b1").unwrap();
    assert_eq!(b1, d.top.get_element("left:base:b1").unwrap());
    assert_eq!(b1.make_idref_for(&d.right).unwrap(), "base:b1");
    assert!(matches!(
        d.top.get_element("nowhere:b1"),
        Err(ModelError::UnreachableImport { .. })
    ));
    assert!(d.left.get_element_opt("r1").unwrap().is_none());
}

#[test]
fn test_inherited_tag_lookup() {
    let d = diamond();
    let tag: Tag = d.base.create_tag("t").unwrap();
    let b1 = d.base.get_element("b1").unwrap();
    let l1 = d.left.get_element("l1").unwrap();
    d.base.associate_tag(&b1, &tag).unwrap();
    d.left.associate_tag(&l1, &tag).unwrap();

    assert!(tag.element_ids(&d.top, false).unwrap().is_empty());
    let mut inherited = tag.element_ids(&d.top, true).unwrap();
    inherited.sort();
    assert_eq!(inherited, vec!["left:base:b1", "left:l1"]);
    assert_eq!(b1.tag_ids(&d.left, true).unwrap(), vec!["base:t"]);
    assert!(b1.tag_ids(&d.left, false).unwrap().is_empty());
}

#[test]
fn test_importers_keep_imports_open() {
    let d = diamond();
    assert!(matches!(d.base.close(), Err(ModelError::ImportedBy { .. })));
    d.top.close().unwrap();
    d.left.close().unwrap();
    d.right.close().unwrap();
    d.base.close().unwrap();
}

#[test]
fn test_file_imports_reopen_together() {
    let dir = TempDir::new().unwrap();
    let base_url = sqlite_url(&dir, "base.db", None);
    let top_url = sqlite_url(&dir, "top.db", None);

    let base = Package::create(&base_url).unwrap();
    let media = base.create_media("m", "http://example.com/a.avi", None).unwrap();
    base.create_annotation("b1", &media, 20, 30, None).unwrap();
    let top = Package::create(&top_url).unwrap();
    top.create_import("base", &base).unwrap();
    top.create_annotation("t1", &media, 10, 20, None).unwrap();
    top.close().unwrap();
    base.close().unwrap();

    let top = Package::open(&top_url).unwrap();
    assert_eq!(
        top.all().annotations().ids().unwrap(),
        vec!["t1", "base:b1"]
    );
    let base = top.imports()[0].1.clone().unwrap();
    assert_eq!(base.url(), base_url);
    assert_eq!(base.importers(), vec![top.clone()]);
}

#[test]
fn test_unresolved_import_is_tolerated() {
    let dir = TempDir::new().unwrap();
    let base_url = sqlite_url(&dir, "base.db", None);
    let top_url = sqlite_url(&dir, "top.db", None);

    let base = Package::create(&base_url).unwrap();
    let top = Package::create(&top_url).unwrap();
    top.create_import("base", &base).unwrap();
    top.create_tag("t").unwrap();
    top.close().unwrap();
    base.close().unwrap();
    std::fs::remove_file(dir.path().join("base.db")).unwrap();

    let top = Package::open(&top_url).unwrap();
    assert_eq!(top.imports(), vec![("base".to_string(), None)]);
    assert_eq!(top.all().tags().count().unwrap(), 1);
    assert!(matches!(
        top.get_element("base:m"),
        Err(ModelError::UnreachableImport { .. })
    ));
}

#[test]
fn test_stored_import_cycle_is_left_unresolved() {
    let dir = TempDir::new().unwrap();
    let a_url = sqlite_url(&dir, "a.db", None);
    let b_url = sqlite_url(&dir, "b.db", None);

    let a = Package::create(&a_url).unwrap();
    let b = Package::create(&b_url).unwrap();
    a.create_import("b", &b).unwrap();
    a.close().unwrap();
    b.close().unwrap();

    let raw = Connection::open(db_path(&dir, "b.db")).unwrap();
    raw.execute("INSERT INTO elements (package, id, kind) VALUES ('', 'a', 'i')", [])
        .unwrap();
    raw.execute(
        "INSERT INTO imports (package, id, url, uri) VALUES ('', 'a', ?1, '')",
        params![a_url],
    )
    .unwrap();
    drop(raw);

    let a = Package::open(&a_url).unwrap();
    let b = a.imports()[0].1.clone().unwrap();
    assert_eq!(b.imports(), vec![("a".to_string(), None)]);
    assert!(a.importers().is_empty());
    a.close().unwrap();
    b.close().unwrap();

    let b = Package::open(&b_url).unwrap();
    let a = b.imports()[0].1.clone().unwrap();
    assert_eq!(a.imports(), vec![("b".to_string(), None)]);
    b.close().unwrap();
    a.close().unwrap();
}

#[test]
fn test_moved_import_keeps_importers_linked() {
    let dir = TempDir::new().unwrap();
    let p_url = sqlite_url(&dir, "p.db", None);
    let moved_url = sqlite_url(&dir, "p2.db", None);
    let q_url = sqlite_url(&dir, "q.db", None);

    let p = Package::create(&p_url).unwrap();
    let q = Package::create(&q_url).unwrap();
    q.create_import("p", &p).unwrap();

    p.save_as(
        &moved_url,
        SaveOptions {
            erase: false,
            change_url: true,
        },
    )
    .unwrap();
    p.create_tag("new").unwrap();
    let import: Import = q.get("p").unwrap();
    assert_eq!(import.url(), p.url());
    assert_eq!(p.url(), moved_url);

    q.close().unwrap();
    p.close().unwrap();

    let q = Package::open(&q_url).unwrap();
    assert!(q.get_element("p:new").is_ok());
    let import: Import = q.get("p").unwrap();
    assert_eq!(import.url(), moved_url);
}

#[test]
fn test_moving_a_transient_import_to_a_file() {
    let dir = TempDir::new().unwrap();
    let target = sqlite_url(&dir, "kept.db", None);
    let q_url = sqlite_url(&dir, "q.db", None);

    let p = Package::transient().unwrap();
    p.create_tag("t").unwrap();
    let q = Package::create(&q_url).unwrap();
    q.create_import("p", &p).unwrap();
    p.save_as(
        &target,
        SaveOptions {
            erase: false,
            change_url: true,
        },
    )
    .unwrap();
    q.close().unwrap();
    p.close().unwrap();

    let q = Package::open(&q_url).unwrap();
    assert!(q.get_element("p:t").is_ok());
}
