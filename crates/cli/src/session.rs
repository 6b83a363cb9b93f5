use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use datapilot_core::SessionMemory;

/// Checkpoint file for `thread_id` under `session_dir`.
pub fn session_path(session_dir: &Path, thread_id: &str) -> Result<PathBuf> {
    let valid = !thread_id.is_empty()
        && thread_id.len() <= 128
        && thread_id.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !thread_id.starts_with('.');
    if !valid {
        bail!("thread id `{thread_id}` may only contain letters, digits, `-`, `_` and `.`");
    }
    Ok(session_dir.join(format!("{thread_id}.json")))
}

pub fn load(session_dir: &Path, thread_id: &str) -> Result<Option<SessionMemory>> {
    let path = session_path(session_dir, thread_id)?;
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
        Err(error) => {
            return Err(error).with_context(|| format!("reading session `{}`", path.display()))
        }
    };
    let memory = serde_json::from_str::<SessionMemory>(&raw)
        .with_context(|| format!("decoding session `{}`", path.display()))?;
    Ok(Some(memory))
}

pub fn save(session_dir: &Path, memory: &SessionMemory) -> Result<PathBuf> {
    let path = session_path(session_dir, &memory.thread_id)?;
    fs::create_dir_all(session_dir)
        .with_context(|| format!("creating session dir `{}`", session_dir.display()))?;
    let encoded = serde_json::to_string_pretty(memory).context("encoding session")?;
    fs::write(&path, encoded).with_context(|| format!("writing session `{}`", path.display()))?;
    Ok(path)
}

/// Deletes the checkpoint. Returns whether one existed.
pub fn remove(session_dir: &Path, thread_id: &str) -> Result<bool> {
    let path = session_path(session_dir, thread_id)?;
    match fs::remove_file(&path) {
        Ok(()) => Ok(true),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(false),
        Err(error) => Err(error).with_context(|| format!("removing session `{}`", path.display())),
    }
}
