//! Element ids and id-references.
//!
//! A bare id names an element of the current package. `alias:id` names an
//! element of the package imported under `alias`; aliases nest, so
//! `a:b:id` is resolved left to right.

use crate::error::{ModelError, Result};

/// Check that `id` can name an element or an import alias.
pub fn validate_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && !id
            .chars()
            .any(|c| c == ':' || c == '#' || c.is_whitespace() || c.is_control());
    if valid {
        Ok(())
    } else {
        Err(ModelError::InvalidId(id.to_string()))
    }
}

/// Split the first import alias off an id-reference.
///
/// ```
/// use cinelab_model::idref::split_first;
/// assert_eq!(split_first("a:b:c"), (Some("a"), "b:c"));
/// assert_eq!(split_first("c"), (None, "c"));
/// ```
pub fn split_first(idref: &str) -> (Option<&str>, &str) {
    match idref.split_once(':') {
        Some((alias, rest)) => (Some(alias), rest),
        None => (None, idref),
    }
}

/// Build an id-reference from a chain of aliases and a local id.
pub fn join<S: AsRef<str>>(aliases: &[S], id: &str) -> String {
    let mut out = String::new();
    for alias in aliases {
        out.push_str(alias.as_ref());
        out.push(':');
    }
    out.push_str(id);
    out
}

/// Absolute uri-reference of an element in a package identified by `base`.
pub fn uriref(base: &str, id: &str) -> String {
    format!("{}#{}", base, id)
}
