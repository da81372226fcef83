use crate::cam::system_type;
use crate::consts::CAMSYS_TYPE;
use crate::element::{List, Tag, TypedElement};
use crate::error::Result;
use crate::group::{AllGroup, Collection, OwnGroup};

/// Tags and lists of a group, split by system type.
pub trait CamGroup {
    /// Tags with no system type.
    fn user_tags(&self) -> Result<Vec<Tag>>;
    fn annotation_types(&self) -> Result<Vec<Tag>>;
    fn relation_types(&self) -> Result<Vec<Tag>>;
    /// Lists with no system type.
    fn user_lists(&self) -> Result<Vec<List>>;
    fn schemas(&self) -> Result<Vec<List>>;
}

fn with_system_type<T: TypedElement>(
    collection: Collection<T>,
    wanted: Option<&str>,
) -> Result<Vec<T>> {
    let mut found = Vec::new();
    for element in collection.iter()? {
        if element.get_meta_text(CAMSYS_TYPE)?.as_deref() == wanted {
            found.push(element);
        }
    }
    Ok(found)
}

macro_rules! cam_group {
    ($group:ty) => {
        impl CamGroup for $group {
            fn user_tags(&self) -> Result<Vec<Tag>> {
                with_system_type(self.tags(), None)
            }

            fn annotation_types(&self) -> Result<Vec<Tag>> {
                with_system_type(self.tags(), Some(system_type::ANNOTATION_TYPE))
            }

            fn relation_types(&self) -> Result<Vec<Tag>> {
                with_system_type(self.tags(), Some(system_type::RELATION_TYPE))
            }

            fn user_lists(&self) -> Result<Vec<List>> {
                with_system_type(self.lists(), None)
            }

            fn schemas(&self) -> Result<Vec<List>> {
                with_system_type(self.lists(), Some(system_type::SCHEMA))
            }
        }
    };
}

cam_group!(OwnGroup);
cam_group!(AllGroup);
