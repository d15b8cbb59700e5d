//! Cross-file references.
//!
//! Entity payloads point at other entities with one of four syntaxes:
//! `@/<path>` (relative to the project root), `./<path>` and `../<path>`
//! (relative to the referencing file) and `slug:<id>` (symbolic, no file).
//! Path references are normalised without touching the filesystem so graph
//! keys stay canonical.

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::schema::ENTITY_EXTENSIONS;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// `@/suppliers/acme.yaml`, resolved against the project root.
    Absolute(Utf8PathBuf),
    /// `./acme.yaml` or `../suppliers/acme.yaml`, resolved against the
    /// file that contains the reference.
    Relative(Utf8PathBuf),
    /// `slug:acme`; the referent must already exist in the graph or store.
    Slug(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("not a reference (expected '@/', './', '../' or 'slug:'): '{0}'")]
    Unrecognised(String),
    #[error("path reference must end in a known entity extension: '{0}'")]
    MissingExtension(String),
    #[error("slug reference must not carry a file extension: '{0}'")]
    SlugWithExtension(String),
}

impl Reference {
    pub fn parse(raw: &str) -> Result<Self, ReferenceError> {
        if let Some(slug) = raw.strip_prefix("slug:") {
            if slug.is_empty() {
                return Err(ReferenceError::Unrecognised(raw.to_string()));
            }
            if has_entity_extension(Utf8Path::new(slug)) {
                return Err(ReferenceError::SlugWithExtension(raw.to_string()));
            }
            return Ok(Reference::Slug(slug.to_string()));
        }

        if let Some(path) = raw.strip_prefix("@/") {
            let path = Utf8Path::new(path);
            if path.as_str().is_empty() || !has_entity_extension(path) {
                return Err(ReferenceError::MissingExtension(raw.to_string()));
            }
            return Ok(Reference::Absolute(path.to_path_buf()));
        }

        if raw.starts_with("./") || raw.starts_with("../") {
            let path = Utf8Path::new(raw);
            if !has_entity_extension(path) {
                return Err(ReferenceError::MissingExtension(raw.to_string()));
            }
            return Ok(Reference::Relative(path.to_path_buf()));
        }

        Err(ReferenceError::Unrecognised(raw.to_string()))
    }

    /// Quick syntactic check, used to tell references apart from plain
    /// strings before committing to a parse.
    pub fn looks_like(raw: &str) -> bool {
        raw.starts_with("@/")
            || raw.starts_with("./")
            || raw.starts_with("../")
            || raw.starts_with("slug:")
    }

    pub fn is_path(&self) -> bool {
        !matches!(self, Reference::Slug(_))
    }

    /// Canonical path of a path reference. `None` for `slug:` references.
    pub fn resolve(&self, project_root: &Utf8Path, current_file: &Utf8Path) -> Option<Utf8PathBuf> {
        match self {
            Reference::Absolute(p) => Some(normalize_path(&project_root.join(p))),
            Reference::Relative(p) => {
                let dir = current_file.parent().unwrap_or(Utf8Path::new(""));
                Some(normalize_path(&dir.join(p)))
            }
            Reference::Slug(_) => None,
        }
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reference::Absolute(p) => write!(f, "@/{p}"),
            Reference::Relative(p) => write!(f, "{p}"),
            Reference::Slug(s) => write!(f, "slug:{s}"),
        }
    }
}

fn has_entity_extension(path: &Utf8Path) -> bool {
    path.extension()
        .map(|e| ENTITY_EXTENSIONS.contains(&e))
        .unwrap_or(false)
}

/// Normalise a path lexically: resolve `.` and `..` components without
/// consulting the filesystem. Leading `..` on a relative path is kept;
/// `..` at the root stays at the root.
pub fn normalize_path(path: &Utf8Path) -> Utf8PathBuf {
    let mut stack: Vec<Utf8Component> = Vec::new();
    for component in path.components() {
        match component {
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                if matches!(stack.last(), Some(Utf8Component::Normal(_))) {
                    stack.pop();
                } else if !matches!(stack.last(), Some(Utf8Component::RootDir)) {
                    stack.push(component);
                }
            }
            _ => stack.push(component),
        }
    }
    if stack.is_empty() {
        return Utf8PathBuf::from(".");
    }
    stack.iter().map(|c| c.as_str()).collect()
}
