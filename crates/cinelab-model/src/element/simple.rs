//! Element kinds with no fields beyond content or a url.

use super::{CleaningOp, ElementKind};
use crate::backend::ElementData;
use crate::error::Result;

typed_element!(
    /// A rendering recipe over package elements.
    View,
    ElementKind::View
);

typed_element!(Query, ElementKind::Query);

typed_element!(
    /// Arbitrary data attached to a package, such as content schemas.
    Resource,
    ElementKind::Resource
);

typed_element!(
    /// A live data source. Only its url is modeled.
    Stream,
    ElementKind::Stream
);

impl Stream {
    pub fn url(&self) -> String {
        match self.0.data() {
            ElementData::Stream { url } => url,
            _ => String::new(),
        }
    }

    pub fn set_url(&self, new_url: &str) -> Result<()> {
        self.0.update_data(CleaningOp::Stream, "url", |data| {
            if let ElementData::Stream { url } = data {
                *url = new_url.to_string();
            }
        })
    }
}
