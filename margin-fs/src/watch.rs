//! Collection watcher: raw filesystem events in, semantic entity events
//! out.
//!
//! Raw notify events are debounced per path, dropped when the content
//! hash has not changed (editors touching mtime, our own writes), then
//! classified with an import-only pipeline run. Classification is strictly
//! serial: one scan at a time, events for a single path in order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use notify::{RecommendedWatcher, Watcher as _};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use margin_core::import::{ImportOptions, Importer};
use margin_core::reference::normalize_path;
use margin_core::schema::{DocumentFormat, EntityKind};

use crate::hash::{content_hash, ContentHash};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(150);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WatchAction {
    Created,
    Updated,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchEvent {
    pub action: WatchAction,
    pub kind: EntityKind,
    pub slug: String,
    pub path: Utf8PathBuf,
}

/// Watcher output. Errors are reported, never fatal to the watcher.
#[derive(Debug)]
pub enum WatchMessage {
    Event(WatchEvent),
    Error(String),
}

pub struct WatchOptions {
    pub debounce: Duration,
    /// Paths already known when the watcher starts, so that a delete of a
    /// file we never saw change still carries its slug.
    pub bootstrap: HashMap<Utf8PathBuf, (EntityKind, String)>,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            bootstrap: HashMap::new(),
        }
    }
}

/// Keeps the underlying notify watcher alive; drop to stop watching.
pub struct CollectionWatcher {
    _watcher: RecommendedWatcher,
}

/// Watch a collection root. Must be called from within a tokio runtime.
pub fn watch(
    root: &Utf8Path,
    importer: Arc<Importer>,
    options: WatchOptions,
) -> notify::Result<(CollectionWatcher, mpsc::Receiver<WatchMessage>)> {
    let WatchOptions {
        debounce,
        bootstrap,
    } = options;

    // notify reports canonical paths; filter and import against the same
    let root = root.canonicalize_utf8()?;

    let (raw_tx, mut raw_rx) = mpsc::channel(16);
    let mut watcher = RecommendedWatcher::new(
        move |res| {
            let _ = raw_tx.blocking_send(res);
        },
        notify::Config::default(),
    )?;
    watcher.watch(root.as_std_path(), notify::RecursiveMode::Recursive)?;

    // stage 1: coalesce event bursts per path
    let (debounced_tx, debounced_rx) = mpsc::channel::<Utf8PathBuf>(64);
    let base = root.clone();
    tokio::spawn(async move {
        let mut pending: HashMap<Utf8PathBuf, JoinHandle<()>> = HashMap::new();
        while let Some(res) = raw_rx.recv().await {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    tracing::error!("error in file watcher: {e}");
                    continue;
                }
            };
            if !matches!(
                event.kind,
                notify::EventKind::Create(_)
                    | notify::EventKind::Modify(_)
                    | notify::EventKind::Remove(_)
            ) {
                continue;
            }
            for path in entity_paths(&base, &event.paths) {
                if let Some(handle) = pending.remove(&path) {
                    handle.abort();
                }
                let tx = debounced_tx.clone();
                let handle = tokio::spawn({
                    let path = path.clone();
                    async move {
                        tokio::time::sleep(debounce).await;
                        let _ = tx.send(path).await;
                    }
                });
                pending.insert(path, handle);
            }
        }
    });

    // stage 2: hash guard + classification, strictly one at a time
    let (out_tx, out_rx) = mpsc::channel(64);
    tokio::spawn(classify_task(
        root,
        importer,
        bootstrap,
        debounced_rx,
        out_tx,
    ));

    Ok((CollectionWatcher { _watcher: watcher }, out_rx))
}

async fn classify_task(
    root: Utf8PathBuf,
    importer: Arc<Importer>,
    mut known: HashMap<Utf8PathBuf, (EntityKind, String)>,
    mut rx: mpsc::Receiver<Utf8PathBuf>,
    tx: mpsc::Sender<WatchMessage>,
) {
    let mut hashes: HashMap<Utf8PathBuf, ContentHash> = HashMap::new();
    while let Some(path) = rx.recv().await {
        match classify(&root, &importer, &mut known, &mut hashes, &path) {
            Ok(Some(event)) => {
                tracing::debug!(?event, "watch event");
                let _ = tx.send(WatchMessage::Event(event)).await;
            }
            Ok(None) => {}
            Err(message) => {
                tracing::warn!("{message}");
                let _ = tx.send(WatchMessage::Error(message)).await;
            }
        }
    }
}

fn classify(
    root: &Utf8Path,
    importer: &Importer,
    known: &mut HashMap<Utf8PathBuf, (EntityKind, String)>,
    hashes: &mut HashMap<Utf8PathBuf, ContentHash>,
    path: &Utf8Path,
) -> Result<Option<WatchEvent>, String> {
    if !path.exists() {
        hashes.remove(path);
        return Ok(known.remove(path).map(|(kind, slug)| WatchEvent {
            action: WatchAction::Deleted,
            kind,
            slug,
            path: path.to_path_buf(),
        }));
    }

    let hash = content_hash(path).map_err(|e| format!("cannot hash '{path}': {e}"))?;
    if hashes.get(path) == Some(&hash) {
        tracing::trace!("unchanged content, dropping '{path}'");
        return Ok(None);
    }

    let mut options = ImportOptions::new(root.to_path_buf());
    options.import_only = true;
    let report = importer.import(&[path.to_path_buf()], &options);
    if let Some(error) = report.errors.first() {
        return Err(error.to_string());
    }
    let resolved = report.resolved.as_ref().ok_or_else(|| {
        format!("'{path}': import-only run returned no resolved entities")
    })?;
    let entity = resolved
        .get(&normalize_path(path))
        .ok_or_else(|| format!("'{path}': no entity resolved for this path"))?;

    let first_seen = !known.contains_key(path) && !hashes.contains_key(path);
    let action = if first_seen {
        WatchAction::Created
    } else {
        WatchAction::Updated
    };
    hashes.insert(path.to_path_buf(), hash);
    known.insert(
        path.to_path_buf(),
        (entity.kind(), entity.slug().to_string()),
    );
    Ok(Some(WatchEvent {
        action,
        kind: entity.kind(),
        slug: entity.slug().to_string(),
        path: path.to_path_buf(),
    }))
}

fn entity_paths<'a>(
    base: &'a Utf8Path,
    paths: &'a [std::path::PathBuf],
) -> impl Iterator<Item = Utf8PathBuf> + 'a {
    paths
        .iter()
        .filter_map(|p| Utf8Path::from_path(p).map(Utf8Path::to_path_buf))
        .filter(move |p| p.starts_with(base))
        .filter(|p| DocumentFormat::from_path(p).is_some())
}
