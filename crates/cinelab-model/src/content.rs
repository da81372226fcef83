//! Element content and content handlers.
//!
//! Annotations, relations, views, queries and resources carry a content: a
//! mimetype, the data itself and an optional schema resource. Content writes
//! go straight to the backend.
//!
//! A [`ContentHandler`] turns raw data of a given mimetype into a structured
//! [`ParsedContent`] and back. Handlers are kept in a [`ContentRegistry`];
//! the handler with the highest claim for a mimetype wins.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use lazy_static::lazy_static;

use crate::consts::DEFAULT_MIMETYPE;
use crate::element::{
    Annotation, Element, PackageElement, Query, Relation, Resource, View,
};
use crate::error::{ModelError, Result};
use crate::events::PackageEvent;
use crate::package::Package;

pub use crate::backend::ContentRow as Content;

/// Content given when creating an element.
#[derive(Debug, Clone)]
pub struct NewContent {
    pub mimetype: String,
    pub data: String,
    pub schema: Option<Resource>,
}

impl NewContent {
    pub fn new(mimetype: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            mimetype: mimetype.into(),
            data: data.into(),
            schema: None,
        }
    }

    /// Plain text content.
    pub fn text(data: impl Into<String>) -> Self {
        Self::new(DEFAULT_MIMETYPE, data)
    }

    pub fn with_schema(mut self, schema: &Resource) -> Self {
        self.schema = Some(schema.clone());
        self
    }

    /// The stored form, with the schema as an id-reference from `owner`.
    pub(crate) fn to_row(&self, owner: &Package) -> Result<Content> {
        let schema = match &self.schema {
            Some(resource) => Some(resource.make_idref_for(owner)?),
            None => None,
        };
        Ok(Content {
            mimetype: self.mimetype.clone(),
            data: self.data.clone(),
            schema,
        })
    }

    fn into_row_unchecked(self) -> Content {
        Content {
            mimetype: self.mimetype,
            data: self.data,
            schema: None,
        }
    }
}

impl Default for NewContent {
    fn default() -> Self {
        Self::text("")
    }
}

fn load(element: &Element, owner: &Package) -> Result<Content> {
    if let Some(content) = element.state().content.clone() {
        return Ok(content);
    }
    let binding = owner.binding()?;
    let content = binding
        .backend
        .get_content(&binding.package_id, element.id())?
        .unwrap_or_else(|| NewContent::default().into_row_unchecked());
    element.state().content = Some(content.clone());
    Ok(content)
}

fn write(element: &Element, change: impl FnOnce(&Package, &mut Content) -> Result<()>) -> Result<()> {
    let owner = element.owner_package()?;
    let _cs = owner.enter();
    owner.check_writable()?;
    let mut content = load(element, &owner)?;
    change(&owner, &mut content)?;
    let binding = owner.binding()?;
    binding
        .backend
        .update_content(&binding.package_id, element.id(), &content)?;
    element.state().content = Some(content);
    owner.emit(PackageEvent::ChangedContent(element.clone()));
    Ok(())
}

/// Elements carrying a content.
pub trait WithContent: PackageElement {
    fn content(&self) -> Result<Content> {
        let owner = self.owner()?;
        let _cs = owner.enter();
        load(self.element(), &owner)
    }

    fn content_mimetype(&self) -> Result<String> {
        Ok(self.content()?.mimetype)
    }

    fn content_data(&self) -> Result<String> {
        Ok(self.content()?.data)
    }

    /// Id-reference of the schema, relative to the owner.
    fn content_schema_idref(&self) -> Result<Option<String>> {
        Ok(self.content()?.schema)
    }

    fn content_schema(&self) -> Result<Option<Resource>> {
        let Some(idref) = self.content_schema_idref()? else {
            return Ok(None);
        };
        let owner = self.owner()?;
        let cached = self.element().state().schema_link.upgrade();
        if let Some(inner) = cached {
            let schema = Element::from_inner(inner);
            if schema.make_idref_for(&owner)? == idref {
                return schema.downcast().map(Some);
            }
        }
        let schema: Resource = owner.get(&idref)?;
        self.element().state().schema_link = schema.element().downgrade();
        Ok(Some(schema))
    }

    fn set_content_mimetype(&self, mimetype: &str) -> Result<()> {
        write(self.element(), |_, content| {
            content.mimetype = mimetype.to_string();
            Ok(())
        })
    }

    fn set_content_data(&self, data: &str) -> Result<()> {
        write(self.element(), |_, content| {
            content.data = data.to_string();
            Ok(())
        })
    }

    /// Set or clear the schema. The resource must be reachable from the owner.
    fn set_content_schema(&self, schema: Option<&Resource>) -> Result<()> {
        write(self.element(), |owner, content| {
            content.schema = match schema {
                Some(resource) => Some(resource.make_idref_for(owner)?),
                None => None,
            };
            Ok(())
        })?;
        self.element().state().schema_link = match schema {
            Some(resource) => resource.element().downgrade(),
            None => std::sync::Weak::new(),
        };
        Ok(())
    }

    /// Parse the data with the best handler for the content mimetype.
    fn parsed_content(&self) -> Result<ParsedContent> {
        let content = self.content()?;
        content_handlers().parse(&content.mimetype, &content.data)
    }

    fn set_parsed_content(&self, value: &ParsedContent) -> Result<()> {
        let mimetype = self.content_mimetype()?;
        let data = content_handlers().unparse(&mimetype, value)?;
        self.set_content_data(&data)
    }
}

impl WithContent for Annotation {}
impl WithContent for Relation {}
impl WithContent for View {}
impl WithContent for Query {}
impl WithContent for Resource {}

/// Structured form of a content.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedContent {
    Text(String),
    Pairs(BTreeMap<String, String>),
    Json(serde_json::Value),
}

pub trait ContentHandler: Send + Sync {
    fn name(&self) -> &str;

    /// Confidence in `0..=99` for `mimetype`; 0 refuses.
    fn claims_for_handle(&self, mimetype: &str) -> u8;

    fn parse(&self, data: &str) -> Result<ParsedContent>;

    fn unparse(&self, value: &ParsedContent) -> Result<String>;
}

/// `key=value` lines with form-encoded values.
#[derive(Debug, Default)]
pub struct AvPairsHandler;

impl AvPairsHandler {
    const MIMETYPES: [&'static str; 3] = [
        "application/x-advene-builtin-view",
        "application/x-advene-type-constraint",
        "application/x-advene-structured",
    ];
}

fn unquote_plus(value: &str) -> Result<String> {
    let spaced = value.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .map_err(|e| ModelError::MalformedContent(e.to_string()))
}

fn quote_plus(value: &str) -> String {
    urlencoding::encode(value).replace("%20", "+")
}

impl ContentHandler for AvPairsHandler {
    fn name(&self) -> &str {
        "avpairs"
    }

    fn claims_for_handle(&self, mimetype: &str) -> u8 {
        if Self::MIMETYPES.contains(&mimetype) {
            99
        } else {
            0
        }
    }

    fn parse(&self, data: &str) -> Result<ParsedContent> {
        let mut pairs = BTreeMap::new();
        for line in data.lines().filter(|l| !l.is_empty()) {
            match line.split_once('=') {
                Some((key, value)) => {
                    pairs.insert(key.trim().to_string(), unquote_plus(value.trim())?);
                }
                None => {
                    tracing::warn!("syntax error in content line {:?}", line);
                    pairs.insert("_error".to_string(), line.to_string());
                }
            }
        }
        Ok(ParsedContent::Pairs(pairs))
    }

    fn unparse(&self, value: &ParsedContent) -> Result<String> {
        match value {
            ParsedContent::Pairs(pairs) => Ok(pairs
                .iter()
                .map(|(k, v)| format!("{} = {}\n", k, quote_plus(v)))
                .collect()),
            other => Err(ModelError::MalformedContent(format!(
                "avpairs content expects pairs, got {:?}",
                other
            ))),
        }
    }
}

#[derive(Debug, Default)]
pub struct JsonHandler;

impl ContentHandler for JsonHandler {
    fn name(&self) -> &str {
        "json"
    }

    fn claims_for_handle(&self, mimetype: &str) -> u8 {
        if mimetype == "application/json" {
            99
        } else if mimetype.ends_with("+json") {
            70
        } else {
            0
        }
    }

    fn parse(&self, data: &str) -> Result<ParsedContent> {
        if data.trim().is_empty() {
            return Ok(ParsedContent::Json(serde_json::Value::Null));
        }
        serde_json::from_str(data)
            .map(ParsedContent::Json)
            .map_err(|e| ModelError::MalformedContent(e.to_string()))
    }

    fn unparse(&self, value: &ParsedContent) -> Result<String> {
        match value {
            ParsedContent::Json(json) => Ok(serde_json::to_string(json)?),
            other => Err(ModelError::MalformedContent(format!(
                "json content expects a json value, got {:?}",
                other
            ))),
        }
    }
}

#[derive(Debug, Default)]
pub struct TextHandler;

impl ContentHandler for TextHandler {
    fn name(&self) -> &str {
        "text"
    }

    fn claims_for_handle(&self, mimetype: &str) -> u8 {
        if mimetype.starts_with("text/") {
            50
        } else {
            0
        }
    }

    fn parse(&self, data: &str) -> Result<ParsedContent> {
        Ok(ParsedContent::Text(data.to_string()))
    }

    fn unparse(&self, value: &ParsedContent) -> Result<String> {
        match value {
            ParsedContent::Text(text) => Ok(text.clone()),
            ParsedContent::Json(json) => Ok(json.to_string()),
            ParsedContent::Pairs(_) => Err(ModelError::MalformedContent(
                "text content can not hold pairs".to_string(),
            )),
        }
    }
}

/// Ordered set of content handlers.
pub struct ContentRegistry {
    handlers: RwLock<Vec<Arc<dyn ContentHandler>>>,
}

lazy_static! {
    static ref DEFAULT_HANDLERS: ContentRegistry = ContentRegistry::with_defaults();
}

/// The process-wide content handler registry.
pub fn content_handlers() -> &'static ContentRegistry {
    &DEFAULT_HANDLERS
}

impl ContentRegistry {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(TextHandler));
        registry.register(Arc::new(JsonHandler));
        registry.register(Arc::new(AvPairsHandler));
        registry
    }

    /// Register a handler. Later registrations win ties.
    pub fn register(&self, handler: Arc<dyn ContentHandler>) {
        tracing::debug!("registering content handler {}", handler.name());
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(0, handler);
    }

    pub fn best_for(&self, mimetype: &str) -> Option<Arc<dyn ContentHandler>> {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        let mut best: Option<(u8, &Arc<dyn ContentHandler>)> = None;
        for handler in handlers.iter() {
            let score = handler.claims_for_handle(mimetype);
            if score > 0 && best.map_or(true, |(s, _)| score > s) {
                best = Some((score, handler));
            }
        }
        best.map(|(_, h)| Arc::clone(h))
    }

    fn handler(&self, mimetype: &str) -> Result<Arc<dyn ContentHandler>> {
        self.best_for(mimetype)
            .ok_or_else(|| ModelError::NoContentHandler(mimetype.to_string()))
    }

    pub fn parse(&self, mimetype: &str, data: &str) -> Result<ParsedContent> {
        self.handler(mimetype)?.parse(data)
    }

    pub fn unparse(&self, mimetype: &str, value: &ParsedContent) -> Result<String> {
        self.handler(mimetype)?.unparse(value)
    }
}

impl Default for ContentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::TYPE_CONSTRAINT_MIMETYPE;
    use rstest::rstest;

    #[rstest]
    #[case("application/x-advene-structured", Some("avpairs"))]
    #[case(TYPE_CONSTRAINT_MIMETYPE, Some("avpairs"))]
    #[case("application/json", Some("json"))]
    #[case("application/ld+json", Some("json"))]
    #[case("text/html", Some("text"))]
    #[case("image/png", None)]
    fn test_best_handler(#[case] mimetype: &str, #[case] expected: Option<&str>) {
        let registry = ContentRegistry::with_defaults();
        assert_eq!(
            registry.best_for(mimetype).map(|h| h.name().to_string()).as_deref(),
            expected
        );
    }

    #[test]
    fn test_avpairs_decoding() {
        let parsed = AvPairsHandler
            .parse("title = hello+world%21\n\nbroken line\ncolor=red")
            .unwrap();
        let ParsedContent::Pairs(pairs) = parsed else {
            panic!("expected pairs");
        };
        assert_eq!(pairs["title"], "hello world!");
        assert_eq!(pairs["color"], "red");
        assert_eq!(pairs["_error"], "broken line");

        let mut out = BTreeMap::new();
        out.insert("title".to_string(), "a b&c".to_string());
        assert_eq!(
            AvPairsHandler.unparse(&ParsedContent::Pairs(out)).unwrap(),
            "title = a+b%26c\n"
        );
    }

    #[test]
    fn test_unknown_mimetype() {
        assert!(matches!(
            content_handlers().parse("image/png", ""),
            Err(ModelError::NoContentHandler(_))
        ));
    }

    #[test]
    fn test_content_writes_through() {
        let package = Package::transient().unwrap();
        let schema = package.create_resource("schema", None).unwrap();
        let view = package
            .create_view("v1", Some(NewContent::new("application/json", "{\"a\":1}")))
            .unwrap();
        assert_eq!(
            view.parsed_content().unwrap(),
            ParsedContent::Json(serde_json::json!({"a": 1}))
        );

        view.set_content_schema(Some(&schema)).unwrap();
        view.set_parsed_content(&ParsedContent::Json(serde_json::json!([1, 2])))
            .unwrap();
        assert!(!view.is_dirty());
        assert_eq!(view.content_schema().unwrap(), Some(schema));

        let binding = package.binding().unwrap();
        let stored = binding
            .backend
            .get_content(&binding.package_id, "v1")
            .unwrap()
            .unwrap();
        assert_eq!(stored.data, "[1,2]");
        assert_eq!(stored.schema.as_deref(), Some("schema"));
    }
}
