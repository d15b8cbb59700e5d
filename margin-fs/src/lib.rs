//! `margin-core` helper crate for the file system.
//!
//! Entity files live in a collection directory (`suppliers/`,
//! `ingredients/`, `recipes/`); this crate discovers and reads them,
//! writes entities back to disk through the storage contract, and — with
//! the `watch` feature — turns raw filesystem events into semantic
//! created/updated/deleted events for the import pipeline.

pub mod hash;
#[cfg(feature = "watch")]
pub mod watch;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use margin_core::schema::{Document, DocumentFormat, EntityKind, EntityPayload, SchemaError};

/// Name of the collection config dir, never searched for entities.
pub const CONFIG_DIR: &str = ".margin";

const GENERATED_BANNER: &str =
    "# auto-generated by margin; manual edits are overwritten on the next write\n";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("not an entity file: '{0}'")]
    NotEntity(Utf8PathBuf),
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// A file in the collection assumed to hold one entity document.
#[derive(Debug, Clone)]
pub struct EntityEntry {
    path: Utf8PathBuf,
}

impl EntityEntry {
    pub fn new(path: impl AsRef<Utf8Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn into_path(self) -> Utf8PathBuf {
        self.path
    }

    pub fn file_name(&self) -> &str {
        self.path.file_name().unwrap_or(self.path.as_str())
    }

    /// Reads the content of the entry.
    pub fn read(&self) -> Result<EntityContent, Error> {
        if DocumentFormat::from_path(&self.path).is_none() {
            return Err(Error::NotEntity(self.path.clone()));
        }
        let text = std::fs::read_to_string(&self.path)?;
        Ok(EntityContent {
            path: self.path.clone(),
            text,
        })
    }
}

#[derive(Debug, Clone)]
pub struct EntityContent {
    path: Utf8PathBuf,
    text: String,
}

impl EntityContent {
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Parses the outer `{object, data}` document.
    pub fn document(&self) -> Result<Document, Error> {
        let format = DocumentFormat::from_path(&self.path)
            .ok_or_else(|| Error::NotEntity(self.path.clone()))?;
        Ok(margin_core::schema::parse_document(&self.text, format)?)
    }

    /// Parses and validates the typed payload.
    pub fn payload(&self) -> Result<EntityPayload, Error> {
        Ok(EntityPayload::from_document(&self.document()?)?)
    }
}

/// Every entity file under a collection directory.
///
/// The search is depth-first with each directory visited in lexicographic
/// order, so the result is deterministic across platforms. Hidden entries
/// and the config dir are skipped; `max_depth` is the number of directory
/// levels below the root that may be entered.
pub fn all_entities(
    base_path: impl AsRef<std::path::Path>,
    max_depth: usize,
) -> Result<Vec<EntityEntry>, Error> {
    let base_path: &Utf8Path = base_path
        .as_ref()
        .try_into()
        .map_err(|e: camino::FromPathError| e.into_io_error())?;
    let mut found = Vec::new();
    collect_entities(base_path, max_depth, &mut found)?;
    Ok(found)
}

fn collect_entities(
    dir: &Utf8Path,
    depth_left: usize,
    out: &mut Vec<EntityEntry>,
) -> Result<(), Error> {
    let mut children = dir
        .read_dir_utf8()?
        .collect::<Result<Vec<_>, std::io::Error>>()?;
    children.sort_by(|a, b| a.file_name().cmp(b.file_name()));

    for child in children {
        let name = child.file_name();
        if name.starts_with('.') || name == CONFIG_DIR {
            continue;
        }
        let file_type = child.file_type()?;
        if file_type.is_dir() {
            if depth_left > 0 {
                collect_entities(child.path(), depth_left - 1, out)?;
            } else {
                tracing::trace!("not descending into '{}', depth limit hit", child.path());
            }
        } else if file_type.is_file() && DocumentFormat::from_path(child.path()).is_some() {
            out.push(EntityEntry::new(child.path()));
        }
    }
    Ok(())
}

/// How entity mutations reach the filesystem.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StorageMode {
    /// Write entity files so the directory stays the source of truth.
    #[default]
    Filesystem,
    /// No-op; the store is the sole source of truth.
    DatabaseOnly,
}

/// The storage contract shared by both modes.
pub trait Storage: Send + Sync {
    /// Persist the document for `slug`; returns the path written, empty in
    /// database-only mode.
    fn write(
        &self,
        kind: EntityKind,
        slug: &str,
        document: &Document,
        root: &Utf8Path,
        existing_path: Option<&Utf8Path>,
    ) -> Result<Utf8PathBuf, Error>;

    fn delete(&self, path: &Utf8Path) -> Result<(), Error>;

    fn mode(&self) -> StorageMode;
}

pub fn storage_for(mode: StorageMode) -> Box<dyn Storage> {
    match mode {
        StorageMode::Filesystem => Box::new(FilesystemStorage),
        StorageMode::DatabaseOnly => Box::new(DatabaseOnlyStorage),
    }
}

/// Writes `<root>/<type>s/<slug>.yaml`, or wherever the user already keeps
/// the entity.
pub struct FilesystemStorage;

impl Storage for FilesystemStorage {
    fn write(
        &self,
        kind: EntityKind,
        slug: &str,
        document: &Document,
        root: &Utf8Path,
        existing_path: Option<&Utf8Path>,
    ) -> Result<Utf8PathBuf, Error> {
        let path = match existing_path {
            Some(path) => path.to_path_buf(),
            None => root
                .join(kind.plural_dir())
                .join(slug)
                .with_extension("yaml"),
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let format = DocumentFormat::from_path(&path).unwrap_or(DocumentFormat::Yaml);
        let body = match format {
            DocumentFormat::Yaml => {
                let yaml = serde_yaml::to_string(document).map_err(SchemaError::Yaml)?;
                format!("{GENERATED_BANNER}{yaml}")
            }
            DocumentFormat::Json => {
                let json = serde_json::to_string_pretty(document).map_err(SchemaError::Json)?;
                format!("{json}\n")
            }
        };
        std::fs::write(&path, body)?;
        tracing::debug!("wrote {kind} '{slug}' to {path}");
        Ok(path)
    }

    fn delete(&self, path: &Utf8Path) -> Result<(), Error> {
        std::fs::remove_file(path)?;
        Ok(())
    }

    fn mode(&self) -> StorageMode {
        StorageMode::Filesystem
    }
}

/// Used in containerised deployments; both operations are no-ops.
pub struct DatabaseOnlyStorage;

impl Storage for DatabaseOnlyStorage {
    fn write(
        &self,
        _kind: EntityKind,
        _slug: &str,
        _document: &Document,
        _root: &Utf8Path,
        _existing_path: Option<&Utf8Path>,
    ) -> Result<Utf8PathBuf, Error> {
        Ok(Utf8PathBuf::new())
    }

    fn delete(&self, _path: &Utf8Path) -> Result<(), Error> {
        Ok(())
    }

    fn mode(&self) -> StorageMode {
        StorageMode::DatabaseOnly
    }
}
