// Copyright (c) 2024-2026 Foreman Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Layered configuration loading.
//!
//! Config is assembled from up to four precedence tiers, lowest first:
//! site (`/etc/foreman`), user (`~/.config/foreman` and the platform config
//! dir), workspace (`.foreman/`, `foreman.yaml`), and an explicit `--config`
//! path.  Discovered files that are absent are skipped silently; the
//! explicit path must exist.  Higher tiers overlay lower ones key-wise.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::Config;

const FILE_NAMES: [&str; 2] = ["config.yaml", "config.yml"];

/// Directories probed for `config.yaml` / `config.yml`, lowest precedence
/// first.
fn search_dirs() -> Vec<PathBuf> {
    let mut dirs_list = vec![PathBuf::from("/etc/foreman")];
    dirs_list.extend(dirs::home_dir().map(|home| home.join(".config/foreman")));
    dirs_list.extend(dirs::config_dir().map(|cfg| cfg.join("foreman")));
    dirs_list.push(PathBuf::from(".foreman"));
    dirs_list
}

/// All discoverable config files in precedence order.
fn candidate_files() -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = search_dirs()
        .into_iter()
        .flat_map(|dir| FILE_NAMES.into_iter().map(move |name| dir.join(name)))
        .collect();
    // Bare workspace-root files take precedence over the dot-directory.
    files.extend(["foreman.yaml", "foreman.yml"].into_iter().map(PathBuf::from));
    files
}

/// Load configuration, overlaying every discovered file and finally the
/// explicit `extra` path (e.g. the `--config` CLI flag) when given.
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let mut merged: Option<Mapping> = None;

    for path in candidate_files().into_iter().filter(|p| p.is_file()) {
        merged = Some(overlay_file(merged.take().unwrap_or_default(), &path)?);
    }
    if let Some(path) = extra {
        // Unlike discovered tiers, a path the user named must be readable.
        merged = Some(overlay_file(merged.take().unwrap_or_default(), path)?);
    }

    match merged {
        None => Ok(Config::default()),
        Some(map) => Ok(serde_yaml::from_value(Value::Mapping(map)).unwrap_or_default()),
    }
}

/// Parse one file and overlay it onto `base`.
fn overlay_file(base: Mapping, path: &Path) -> anyhow::Result<Mapping> {
    debug!(path = %path.display(), "applying config layer");
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let layer: Value =
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(match layer {
        Value::Mapping(top) => overlay(base, top),
        // An empty or non-mapping document contributes nothing.
        _ => base,
    })
}

/// Overlay `top` onto `base`: mappings combine key-wise recursively, every
/// other value kind replaces the base entry outright.
fn overlay(mut base: Mapping, top: Mapping) -> Mapping {
    for (key, incoming) in top {
        let resolved = match (base.remove(&key), incoming) {
            (Some(Value::Mapping(below)), Value::Mapping(above)) => {
                Value::Mapping(overlay(below, above))
            }
            (_, above) => above,
        };
        base.insert(key, resolved);
    }
    base
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn map(s: &str) -> Mapping {
        serde_yaml::from_str(s).unwrap()
    }

    fn overlaid(base: &str, top: &str) -> Value {
        Value::Mapping(overlay(map(base), map(top)))
    }

    #[test]
    fn overlay_scalar_top_wins() {
        let out = overlaid("x: 1", "x: 2");
        assert_eq!(out["x"].as_i64(), Some(2));
    }

    #[test]
    fn overlay_keeps_keys_absent_from_top() {
        let out = overlaid("a: 1\nb: 2", "b: 99");
        assert_eq!(out["a"].as_i64(), Some(1));
        assert_eq!(out["b"].as_i64(), Some(99));
    }

    #[test]
    fn overlay_combines_nested_tables_keywise() {
        let out = overlaid(
            "model:\n  kind: openrouter\n  model: openai/gpt-4o",
            "model:\n  model: google/gemini-2.0-flash",
        );
        assert_eq!(out["model"]["kind"].as_str(), Some("openrouter"));
        assert_eq!(
            out["model"]["model"].as_str(),
            Some("google/gemini-2.0-flash")
        );
    }

    #[test]
    fn overlay_scalar_replaces_table_outright() {
        let out = overlaid("leader:\n  mode: file", "leader: disabled");
        assert_eq!(out["leader"].as_str(), Some("disabled"));
    }

    #[test]
    fn load_explicit_path_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "orchestrator:\n  max_workers: 7\n  poll_interval_secs: 5\n",
        )
        .unwrap();
        let cfg = load(Some(&path)).unwrap();
        assert_eq!(cfg.orchestrator.max_workers, 7);
        assert_eq!(cfg.orchestrator.poll_interval_secs, 5);
    }

    #[test]
    fn load_missing_explicit_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(Some(&dir.path().join("nope.yaml"))).unwrap_err();
        assert!(err.to_string().contains("nope.yaml"));
    }

    #[test]
    fn load_without_files_returns_defaults() {
        // No explicit path; any system-level files merge over defaults, but
        // the call itself must not fail.
        let cfg = load(None).unwrap();
        assert!(!cfg.model.kind.is_empty());
    }

    #[test]
    fn empty_explicit_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "").unwrap();
        let cfg = load(Some(&path)).unwrap();
        assert_eq!(cfg.orchestrator.max_workers, 2);
    }
}
