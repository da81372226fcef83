//! Namespace URIs and reserved metadata keys.

pub const ADVENE_NS_PREFIX: &str = "http://advene.liris.cnrs.fr/ns/";

/// Metadata under this prefix is only meaningful to parsers and is never
/// written by serializers.
pub const PARSER_META_PREFIX: &str = "http://advene.liris.cnrs.fr/ns/parser-meta#";

pub const DC_NS_PREFIX: &str = "http://purl.org/dc/elements/1.1/";
pub const RDFS_NS_PREFIX: &str = "http://www.w3.org/2000/01/rdf-schema#";

pub const FRAME_OF_REFERENCE_PREFIX: &str = "http://advene.liris.cnrs.fr/ns/frame_of_reference/";
pub const DEFAULT_FRAME_OF_REFERENCE: &str =
    "http://advene.liris.cnrs.fr/ns/frame_of_reference/ms;o=0";

pub const CAM_NS_PREFIX: &str = "http://advene.liris.cnrs.fr/ns/cinelab-xml/0.1#";

/// `cam:type`, the type of an annotation or relation.
pub const CAM_TYPE: &str = "http://advene.liris.cnrs.fr/ns/cinelab-xml/0.1#type";

/// `cam:system-type`, the role of a tag or list in the application model.
pub const CAMSYS_TYPE: &str = "http://advene.liris.cnrs.fr/ns/cinelab-xml/0.1#system-type";

pub const DC_TITLE: &str = "http://purl.org/dc/elements/1.1/title";
pub const DC_DESCRIPTION: &str = "http://purl.org/dc/elements/1.1/description";
pub const DC_CREATOR: &str = "http://purl.org/dc/elements/1.1/creator";
pub const DC_CREATED: &str = "http://purl.org/dc/elements/1.1/created";
pub const DC_CONTRIBUTOR: &str = "http://purl.org/dc/elements/1.1/contributor";
pub const DC_MODIFIED: &str = "http://purl.org/dc/elements/1.1/modified";
pub const RDFS_LABEL: &str = "http://www.w3.org/2000/01/rdf-schema#label";

pub const TYPE_CONSTRAINT_MIMETYPE: &str = "application/x-advene-type-constraint";
pub const DEFAULT_MIMETYPE: &str = "text/plain";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_constants_share_their_prefix() {
        assert!(PARSER_META_PREFIX.starts_with(ADVENE_NS_PREFIX));
        assert!(CAM_TYPE.starts_with(CAM_NS_PREFIX));
        assert!(CAMSYS_TYPE.starts_with(CAM_NS_PREFIX));
        assert!(DC_CREATOR.starts_with(DC_NS_PREFIX));
        assert!(RDFS_LABEL.starts_with(RDFS_NS_PREFIX));
        assert!(DEFAULT_FRAME_OF_REFERENCE.starts_with(FRAME_OF_REFERENCE_PREFIX));
    }
}
