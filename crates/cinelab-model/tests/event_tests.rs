//! Change notifications raised by packages and their elements

use std::sync::{Arc, Mutex};

use cinelab_model::cam::{self, CamPackage};
use cinelab_model::consts::CAMSYS_TYPE;
use cinelab_model::{
    Element, ElementKind, EventKind, List, MetaValue, Package, PackageElement, PackageEvent,
    WithContent,
};

const ALL_KINDS: [EventKind; 7] = [
    EventKind::Created,
    EventKind::Changed,
    EventKind::ChangedMeta,
    EventKind::ChangedItems,
    EventKind::ChangedContent,
    EventKind::Deleted,
    EventKind::Closed,
];

fn record(package: &Package, kinds: &[EventKind]) -> Arc<Mutex<Vec<PackageEvent>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    for &kind in kinds {
        let log = Arc::clone(&log);
        package.connect(kind, move |event| log.lock().unwrap().push(event.clone()));
    }
    log
}

#[test]
fn test_every_mutation_is_announced() {
    let package = Package::transient().unwrap();
    let log = record(&package, &ALL_KINDS);

    let media = package.create_media("m", "http://example.com/a.avi", None).unwrap();
    let a = package.create_annotation("a", &media, 0, 10, None).unwrap();
    a.set_begin(3).unwrap();
    a.set_meta("urn:k", "v").unwrap();
    let list = package.create_list("l", &[]).unwrap();
    list.push(&a).unwrap();
    a.set_content_data("shot").unwrap();
    package.set_meta("urn:title", "demo").unwrap();
    list.remove(0).unwrap();
    package.delete_element("l").unwrap();

    let a_elt = a.element().clone();
    let list_elt = list.element().clone();
    let expected = vec![
        PackageEvent::Created(media.element().clone()),
        PackageEvent::Created(a_elt.clone()),
        PackageEvent::Changed {
            element: a_elt.clone(),
            attribute: "begin",
        },
        PackageEvent::ChangedMeta {
            element: Some(a_elt.clone()),
            key: "urn:k".to_string(),
            value: Some(MetaValue::text("v")),
        },
        PackageEvent::Created(list_elt.clone()),
        PackageEvent::ChangedItems(list_elt.clone()),
        PackageEvent::ChangedContent(a_elt),
        PackageEvent::ChangedMeta {
            element: None,
            key: "urn:title".to_string(),
            value: Some(MetaValue::text("demo")),
        },
        PackageEvent::ChangedItems(list_elt),
        PackageEvent::Deleted {
            id: "l".to_string(),
            kind: ElementKind::List,
        },
    ];
    assert_eq!(*log.lock().unwrap(), expected);
}

#[test]
fn test_created_lists_already_hold_their_items() {
    let package = Package::transient().unwrap();
    let tag = package.create_tag("t").unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    package.connect(EventKind::Created, move |event| {
        if let PackageEvent::Created(element) = event {
            if let Some(list) = element.to_kind::<List>() {
                sink.lock().unwrap().extend(list.item_idrefs().unwrap());
            }
        }
    });
    package
        .create_list("l", &[Element::from(tag.clone()), Element::from(tag)])
        .unwrap();
    assert_eq!(*seen.lock().unwrap(), vec!["t", "t"]);
}

#[test]
fn test_blocked_and_disconnected_handlers_are_skipped() {
    let package = Package::transient().unwrap();
    let count = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&count);
    let id = package.connect(EventKind::Created, move |_| *counter.lock().unwrap() += 1);

    package.create_tag("t1").unwrap();
    assert!(package.block_handler(id));
    package.create_tag("t2").unwrap();
    assert!(package.unblock_handler(id));
    package.create_tag("t3").unwrap();
    assert_eq!(*count.lock().unwrap(), 2);

    assert!(package.disconnect(id));
    assert!(!package.has_handler(id));
    package.create_tag("t4").unwrap();
    assert_eq!(*count.lock().unwrap(), 2);
}

#[test]
fn test_close_reports_url_and_uri() {
    let package = Package::transient().unwrap();
    package.set_uri("http://example.com/p").unwrap();
    let url = package.url();
    let log = record(&package, &[EventKind::Closed]);
    package.close().unwrap();
    assert_eq!(
        *log.lock().unwrap(),
        vec![PackageEvent::Closed {
            url,
            uri: "http://example.com/p".to_string(),
        }]
    );
}

#[test]
fn test_rejected_writes_raise_nothing() {
    let package = cam::transient().unwrap();
    let at = package.create_annotation_type("at").unwrap();
    let log = record(&package, &ALL_KINDS);
    assert!(at.set_meta(CAMSYS_TYPE, "relation-type").is_err());
    assert!(package.create_tag("at").is_err());
    assert!(log.lock().unwrap().is_empty());
}
