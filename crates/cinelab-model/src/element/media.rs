use super::{CleaningOp, ElementKind};
use crate::backend::ElementData;
use crate::consts::FRAME_OF_REFERENCE_PREFIX;
use crate::error::Result;

typed_element!(
    /// A media document (video, audio) that annotations point into.
    Media,
    ElementKind::Media
);

/// Time unit and origin decoded from a frame-of-reference URI in the
/// standard namespace, e.g. `...frame_of_reference/ms;o=0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameOfReference {
    pub unit: String,
    pub origin: i64,
}

impl FrameOfReference {
    /// `None` when `uri` is outside the standard namespace or malformed.
    pub fn parse(uri: &str) -> Option<Self> {
        let rest = uri.strip_prefix(FRAME_OF_REFERENCE_PREFIX)?;
        let (unit, params) = match rest.split_once(';') {
            Some((unit, params)) => (unit, params),
            None => (rest, ""),
        };
        if unit.is_empty() {
            return None;
        }
        let mut origin = 0;
        for param in params.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = param.split_once('=')?;
            if key == "o" {
                origin = value.parse().ok()?;
            }
        }
        Some(Self {
            unit: unit.to_string(),
            origin,
        })
    }
}

impl Media {
    pub fn url(&self) -> String {
        match self.0.data() {
            ElementData::Media { url, .. } => url,
            _ => String::new(),
        }
    }

    pub fn frame_of_reference(&self) -> String {
        match self.0.data() {
            ElementData::Media {
                frame_of_reference, ..
            } => frame_of_reference,
            _ => String::new(),
        }
    }

    pub fn set_url(&self, new_url: &str) -> Result<()> {
        self.0.update_data(CleaningOp::Media, "url", |data| {
            if let ElementData::Media { url, .. } = data {
                *url = new_url.to_string();
            }
        })
    }

    pub fn set_frame_of_reference(&self, uri: &str) -> Result<()> {
        self.0.update_data(CleaningOp::Media, "frame_of_reference", |data| {
            if let ElementData::Media {
                frame_of_reference, ..
            } = data
            {
                *frame_of_reference = uri.to_string();
            }
        })
    }

    /// Decoded frame of reference, if it uses the standard namespace.
    pub fn frame(&self) -> Option<FrameOfReference> {
        FrameOfReference::parse(&self.frame_of_reference())
    }

    pub fn unit(&self) -> Option<String> {
        self.frame().map(|f| f.unit)
    }

    pub fn origin(&self) -> Option<i64> {
        self.frame().map(|f| f.origin)
    }
}
