use crate::cam::{check_system_type, is_system_tag, system_type, CamTyped};
use crate::consts::{CAMSYS_TYPE, CAM_NS_PREFIX, TYPE_CONSTRAINT_MIMETYPE};
use crate::content::NewContent;
use crate::element::{Annotation, Element, List, Media, PackageElement, Relation, Tag, View};
use crate::error::{ModelError, Result};
use crate::meta::MetaValue;
use crate::package::Package;

fn element_constraint_key() -> String {
    format!("{CAM_NS_PREFIX}element-constraint")
}

/// Id of the view holding the constraints of a type.
pub fn constraint_id(type_id: &str) -> String {
    format!("_constraint_{type_id}")
}

/// Constructors and tag operations of the application model.
pub trait CamPackage {
    /// A tag with no system type.
    fn create_user_tag(&self, id: &str) -> Result<Tag>;
    /// An annotation type, with its type-constraint view.
    fn create_annotation_type(&self, id: &str) -> Result<Tag>;
    /// A relation type, with its type-constraint view.
    fn create_relation_type(&self, id: &str) -> Result<Tag>;
    fn create_user_list(&self, id: &str, items: &[Element]) -> Result<List>;
    fn create_schema(&self, id: &str, items: &[Element]) -> Result<List>;
    fn create_typed_annotation(
        &self,
        id: &str,
        media: &Media,
        begin: i64,
        end: i64,
        annotation_type: &Tag,
        content: Option<NewContent>,
    ) -> Result<Annotation>;
    fn create_typed_relation(
        &self,
        id: &str,
        members: &[Annotation],
        relation_type: &Tag,
        content: Option<NewContent>,
    ) -> Result<Relation>;
    /// Tag `element` with a user tag; system tags are refused.
    fn associate_user_tag(&self, element: &impl PackageElement, tag: &Tag) -> Result<()>;
    fn dissociate_user_tag(&self, element: &impl PackageElement, tag: &Tag) -> Result<()>;
    /// The type-constraint view of an annotation or relation type.
    fn type_constraint(&self, type_tag: &Tag) -> Result<Option<View>>;
}

fn require_cam(package: &Package) -> Result<()> {
    if package.rules().name() != "cam" {
        return Err(ModelError::SemanticError(format!(
            "{} does not use the cam rules",
            package.url()
        )));
    }
    Ok(())
}

fn create_type(package: &Package, id: &str, kind: &str) -> Result<Tag> {
    let _cs = package.enter();
    let view_id = constraint_id(id);
    for taken in [id, view_id.as_str()] {
        if package.has_element(taken)? {
            return Err(ModelError::DuplicateId(taken.to_string()));
        }
    }
    let tag = package.create_tag(id)?;
    tag.element()
        .write_meta(CAMSYS_TYPE, Some(MetaValue::text(kind)), false)?;
    package.create_view(&view_id, Some(NewContent::new(TYPE_CONSTRAINT_MIMETYPE, "")))?;
    tag.element().write_meta(
        &element_constraint_key(),
        Some(MetaValue::IdRef(view_id)),
        false,
    )?;
    tracing::debug!("created {} {} in {}", kind, id, package.url());
    Ok(tag)
}

/// Undo a creation whose typing failed.
fn discard(package: &Package, id: &str, error: ModelError) -> ModelError {
    if let Err(e) = package.delete_element(id) {
        tracing::warn!("could not remove {} after failed typing: {}", id, e);
    }
    error
}

fn check_user_tag(tag: &Tag) -> Result<()> {
    if is_system_tag(tag)? {
        return Err(ModelError::SemanticError(format!(
            "{} is a system tag",
            tag.id()
        )));
    }
    Ok(())
}

impl CamPackage for Package {
    fn create_user_tag(&self, id: &str) -> Result<Tag> {
        self.create_tag(id)
    }

    fn create_annotation_type(&self, id: &str) -> Result<Tag> {
        create_type(self, id, system_type::ANNOTATION_TYPE)
    }

    fn create_relation_type(&self, id: &str) -> Result<Tag> {
        create_type(self, id, system_type::RELATION_TYPE)
    }

    fn create_user_list(&self, id: &str, items: &[Element]) -> Result<List> {
        self.create_list(id, items)
    }

    fn create_schema(&self, id: &str, items: &[Element]) -> Result<List> {
        let _cs = self.enter();
        let schema = self.create_list(id, items)?;
        schema
            .element()
            .write_meta(CAMSYS_TYPE, Some(MetaValue::text(system_type::SCHEMA)), false)?;
        Ok(schema)
    }

    fn create_typed_annotation(
        &self,
        id: &str,
        media: &Media,
        begin: i64,
        end: i64,
        annotation_type: &Tag,
        content: Option<NewContent>,
    ) -> Result<Annotation> {
        let _cs = self.enter();
        require_cam(self)?;
        check_system_type(annotation_type, system_type::ANNOTATION_TYPE)?;
        annotation_type.make_idref_for(self)?;
        let annotation = self.create_annotation(id, media, begin, end, content)?;
        annotation
            .set_cam_type(Some(annotation_type))
            .map_err(|e| discard(self, id, e))?;
        Ok(annotation)
    }

    fn create_typed_relation(
        &self,
        id: &str,
        members: &[Annotation],
        relation_type: &Tag,
        content: Option<NewContent>,
    ) -> Result<Relation> {
        let _cs = self.enter();
        require_cam(self)?;
        check_system_type(relation_type, system_type::RELATION_TYPE)?;
        relation_type.make_idref_for(self)?;
        let relation = self.create_relation(id, members, content)?;
        relation
            .set_cam_type(Some(relation_type))
            .map_err(|e| discard(self, id, e))?;
        Ok(relation)
    }

    fn associate_user_tag(&self, element: &impl PackageElement, tag: &Tag) -> Result<()> {
        check_user_tag(tag)?;
        self.associate_tag(element, tag)
    }

    fn dissociate_user_tag(&self, element: &impl PackageElement, tag: &Tag) -> Result<()> {
        check_user_tag(tag)?;
        self.dissociate_tag(element, tag)
    }

    fn type_constraint(&self, type_tag: &Tag) -> Result<Option<View>> {
        match type_tag.get_meta_element(&element_constraint_key())? {
            Some(element) => element.downcast().map(Some),
            None => Ok(None),
        }
    }
}
