//! On-disk layout for persistent contexts (spec §6 "Persisted state
//! layout"). The pool only owns existence, exclusivity, and survival of a
//! context's storage directory across restarts — the directory's contents
//! are the driver's business. This module owns the one thing the pool
//! itself writes: the `<id>.meta.json` sidecar that lets a context be
//! reconstructed after the process restarts.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// `{id, proxy, tags, created_at}`, written next to a persistent context's
/// storage directory so it can be found again after a process restart.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ContextMeta {
    pub id: Uuid,
    pub proxy: Option<String>,
    pub tags: BTreeSet<String>,
    pub created_at: u64,
}

impl ContextMeta {
    pub fn new(id: Uuid, proxy: Option<String>, tags: BTreeSet<String>) -> Self {
        Self {
            id,
            proxy,
            tags,
            created_at: unix_now(),
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// The directory a persistent context's driver owns exclusively while
/// alive: `<root>/<id>/`.
pub fn storage_dir(root: &Path, id: Uuid) -> PathBuf {
    root.join(id.to_string())
}

fn meta_path(root: &Path, id: Uuid) -> PathBuf {
    root.join(format!("{id}.meta.json"))
}

/// Writes (or overwrites) the sidecar for a persistent context. Creates
/// `root` if it doesn't exist yet.
pub async fn write_meta(root: &Path, meta: &ContextMeta) -> std::io::Result<()> {
    tokio::fs::create_dir_all(root).await?;
    let bytes = serde_json::to_vec_pretty(meta).expect("ContextMeta always serializes");
    tokio::fs::write(meta_path(root, meta.id), bytes).await
}

/// Drops a context's sidecar. Used only on explicit deletion — surviving a
/// whole-browser restart or a single-context recreation must never remove
/// it.
pub async fn remove_meta(root: &Path, id: Uuid) {
    if let Err(e) = tokio::fs::remove_file(meta_path(root, id)).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(%id, error = %e, "failed to remove context meta sidecar");
        }
    }
}

/// Scans `root` for `<id>.meta.json` sidecars left by persistent contexts
/// from a prior process lifetime, sorted by id for deterministic restore
/// order (spec §3: "iteration order must be deterministic").
pub async fn load_all(root: &Path) -> Vec<ContextMeta> {
    let mut out = Vec::new();
    let Ok(mut entries) = tokio::fs::read_dir(root).await else {
        return out;
    };

    loop {
        let next = entries.next_entry().await;
        let entry = match next {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "error walking persistent contexts directory");
                break;
            }
        };

        let path = entry.path();
        let is_meta = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(".meta.json"));
        if !is_meta {
            continue;
        }

        match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<ContextMeta>(&bytes) {
                Ok(meta) => out.push(meta),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable context meta"),
            },
            Err(e) => warn!(path = %path.display(), error = %e, "failed to read context meta"),
        }
    }

    out.sort_by_key(|m| m.id);
    out
}
