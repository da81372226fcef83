//! JSON serialization of whole packages.
//!
//! A package file holds the package URI and metadata, every element with its
//! content, metadata and items, and the tag associations the package
//! declares. Loading a file fills a freshly created backend package.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::backend::{Binding, ContentRow, ElementData};
use crate::consts::PARSER_META_PREFIX;
use crate::error::{BackendError, ModelError, Result};
use crate::meta::MetaValue;

pub const FORMAT: &str = "cinelab-json/1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageDump {
    pub format: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uri: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, MetaValue>,
    #[serde(default)]
    pub elements: Vec<ElementDump>,
    /// `(element idref, tag idref)` pairs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taggings: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementDump {
    pub id: String,
    pub data: ElementData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<ContentRow>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, MetaValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<String>,
}

/// Snapshot of everything stored for the bound package.
pub fn dump(binding: &Binding) -> Result<PackageDump> {
    let backend = &binding.backend;
    let package = binding.package_id.as_str();
    let mut elements = Vec::new();
    for row in backend.iter_elements(&[package], None)? {
        let kind = row.data.kind();
        let content = if kind.has_content() {
            backend.get_content(package, &row.id)?
        } else {
            None
        };
        let items = if kind.has_items() {
            backend.iter_items(package, &row.id)?
        } else {
            Vec::new()
        };
        elements.push(ElementDump {
            meta: backend.iter_meta(package, &row.id)?.into_iter().collect(),
            id: row.id,
            data: row.data,
            content,
            items,
        });
    }
    Ok(PackageDump {
        format: FORMAT.to_string(),
        uri: backend.get_uri(package)?,
        meta: backend.iter_meta(package, "")?.into_iter().collect(),
        elements,
        taggings: backend.iter_taggings(package)?,
    })
}

/// Write a dump into the bound package, which is expected to be empty.
pub fn load(binding: &Binding, dump: &PackageDump) -> Result<()> {
    let backend = &binding.backend;
    let package = binding.package_id.as_str();
    if !dump.uri.is_empty() {
        backend.update_uri(package, &dump.uri)?;
    }
    for (key, value) in &dump.meta {
        backend.set_meta(package, "", key, Some(value))?;
    }
    for element in &dump.elements {
        backend.create_element(package, &element.id, &element.data, element.content.as_ref())?;
        for (key, value) in &element.meta {
            backend.set_meta(package, &element.id, key, Some(value))?;
        }
        for (position, item) in element.items.iter().enumerate() {
            backend.insert_item(package, &element.id, position, item)?;
        }
    }
    for (element, tag) in &dump.taggings {
        backend.associate_tag(package, element, tag)?;
    }
    tracing::debug!(
        "loaded {} elements into {}",
        dump.elements.len(),
        binding.url
    );
    Ok(())
}

pub fn read_json(path: &Path) -> Result<PackageDump> {
    let text = fs::read_to_string(path)?;
    let dump: PackageDump = serde_json::from_str(&text)?;
    if !dump.format.starts_with("cinelab-json/") {
        return Err(BackendError::WrongFormat(format!(
            "{}: unknown format {:?}",
            path.display(),
            dump.format
        ))
        .into());
    }
    Ok(dump)
}

/// Parser metadata describes how a file was read and is not written back.
pub fn write_json(path: &Path, dump: &PackageDump) -> Result<()> {
    let mut dump = dump.clone();
    dump.meta.retain(|key, _| !key.starts_with(PARSER_META_PREFIX));
    for element in &mut dump.elements {
        element.meta.retain(|key, _| !key.starts_with(PARSER_META_PREFIX));
    }
    let text = serde_json::to_string_pretty(&dump)?;
    fs::write(path, text)?;
    Ok(())
}

pub fn is_json_url(url: &str) -> bool {
    !url.starts_with("sqlite:") && (url.starts_with("file:") || url.ends_with(".json"))
}

/// Local path of a JSON package URL (a `file:` URL or a plain path).
pub fn json_path(url: &str) -> Result<PathBuf> {
    if url.starts_with("file:") {
        let parsed =
            url::Url::parse(url).map_err(|e| BackendError::InvalidUrl(format!("{url}: {e}")))?;
        return parsed
            .to_file_path()
            .map_err(|_| BackendError::InvalidUrl(url.to_string()).into());
    }
    let path = PathBuf::from(url);
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

pub fn file_url(path: &Path) -> Result<String> {
    url::Url::from_file_path(path)
        .map(String::from)
        .map_err(|_| ModelError::Backend(BackendError::InvalidUrl(path.display().to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::WithContent;
    use crate::element::PackageElement;
    use crate::package::Package;
    use rstest::rstest;
    use tempfile::TempDir;

    #[rstest]
    #[case("file:///tmp/p.json", true)]
    #[case("file:///tmp/p.cxp", true)]
    #[case("/tmp/p.json", true)]
    #[case("p.json", true)]
    #[case("sqlite:/tmp/p.db", false)]
    #[case("sqlite::memory:;p.json", false)]
    #[case("/tmp/p.db", false)]
    fn test_is_json_url(#[case] url: &str, #[case] expected: bool) {
        assert_eq!(is_json_url(url), expected);
    }

    #[test]
    fn test_json_path_and_file_url() {
        assert_eq!(json_path("file:///tmp/a%20b.json").unwrap(), PathBuf::from("/tmp/a b.json"));
        assert!(json_path("relative.json").unwrap().is_absolute());
        assert_eq!(file_url(Path::new("/tmp/a b.json")).unwrap(), "file:///tmp/a%20b.json");
    }

    #[test]
    fn test_dump_and_load() {
        let source = Package::transient().unwrap();
        source.set_uri("http://example.com/p").unwrap();
        source.set_meta("k", "v").unwrap();
        let m = source.create_media("m1", "http://example.com/a.avi", None).unwrap();
        let a = source.create_annotation("a1", &m, 1, 2, None).unwrap();
        a.set_content_data("hello").unwrap();
        a.set_meta("note", "n").unwrap();
        let t = source.create_tag("t1").unwrap();
        source.create_relation("r1", &[a.clone(), a.clone()], None).unwrap();
        source.associate_tag(&a, &t).unwrap();
        source.flush().unwrap();

        let dump = dump(&source.binding().unwrap()).unwrap();
        assert_eq!(dump.format, FORMAT);
        assert_eq!(dump.elements.len(), 4);
        assert_eq!(dump.taggings, vec![("a1".to_string(), "t1".to_string())]);

        let target = Package::transient().unwrap();
        load(&target.binding().unwrap(), &dump).unwrap();
        assert_eq!(target.uri().unwrap(), "http://example.com/p");
        assert_eq!(target.get_meta_text("k").unwrap().as_deref(), Some("v"));
        let copy: crate::element::Annotation = target.get("a1").unwrap();
        assert_eq!(copy.content_data().unwrap(), "hello");
        assert_eq!(copy.get_meta_text("note").unwrap().as_deref(), Some("n"));
        assert_eq!(copy.tag_ids(&target, false).unwrap(), vec!["t1"]);
        let relation: crate::element::Relation = target.get("r1").unwrap();
        assert_eq!(relation.member_idrefs().unwrap(), vec!["a1", "a1"]);
    }

    #[test]
    fn test_parser_meta_is_not_written() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p.json");
        let mut meta = BTreeMap::new();
        meta.insert(format!("{PARSER_META_PREFIX}namespaces"), MetaValue::text("x"));
        meta.insert("kept".to_string(), MetaValue::text("y"));
        let dump = PackageDump {
            format: FORMAT.to_string(),
            uri: String::new(),
            meta,
            elements: Vec::new(),
            taggings: Vec::new(),
        };
        write_json(&path, &dump).unwrap();
        let read = read_json(&path).unwrap();
        assert_eq!(read.meta.keys().collect::<Vec<_>>(), vec!["kept"]);
    }

    #[test]
    fn test_wrong_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p.json");
        fs::write(&path, r#"{"format": "something-else"}"#).unwrap();
        assert!(matches!(
            read_json(&path),
            Err(ModelError::Backend(BackendError::WrongFormat(_)))
        ));
    }
}
