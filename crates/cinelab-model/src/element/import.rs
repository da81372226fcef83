use super::{CleaningOp, ElementKind, PackageElement};
use crate::backend::ElementData;
use crate::error::Result;
use crate::package::Package;

typed_element!(
    /// A reference to another package. The element id is the import alias.
    Import,
    ElementKind::Import
);

impl Import {
    pub fn alias(&self) -> &str {
        self.id()
    }

    fn fields(&self) -> (String, String) {
        match self.0.data() {
            ElementData::Import { url, uri } => (url, uri),
            _ => (String::new(), String::new()),
        }
    }

    pub fn url(&self) -> String {
        self.fields().0
    }

    pub fn uri(&self) -> String {
        self.fields().1
    }

    /// The imported package, or `None` if it could not be loaded.
    pub fn package(&self) -> Result<Option<Package>> {
        Ok(self.owner()?.imported(self.id()))
    }

    pub(crate) fn record_uri(&self, new_uri: &str) -> Result<()> {
        self.0.update_data(CleaningOp::Import, "uri", |data| {
            if let ElementData::Import { uri, .. } = data {
                *uri = new_uri.to_string();
            }
        })
    }

    pub(crate) fn record_url(&self, new_url: &str) -> Result<()> {
        self.0.update_data(CleaningOp::Import, "url", |data| {
            if let ElementData::Import { url, .. } = data {
                *url = new_url.to_string();
            }
        })
    }
}
