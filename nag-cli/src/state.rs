use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

/// `$NAG_HOME`, or `~/.nag`.
pub fn nag_home() -> Result<PathBuf> {
    if let Some(dir) = std::env::var("NAG_HOME").ok().filter(|d| !d.trim().is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    let home = std::env::var("HOME").context("HOME is not set (or set NAG_HOME)")?;
    Ok(PathBuf::from(home).join(".nag"))
}

pub fn ensure_nag_home() -> Result<PathBuf> {
    let dir = nag_home()?;
    fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    Ok(dir)
}

pub fn tasks_path() -> Result<PathBuf> {
    Ok(ensure_nag_home()?.join("tasks.json"))
}

pub fn journal_dir() -> Result<PathBuf> {
    Ok(ensure_nag_home()?.join("jobs"))
}
