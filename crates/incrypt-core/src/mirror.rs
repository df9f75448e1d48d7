//! The encrypted-mirror manager.
//!
//! Each remote URL gets one bare mirror clone under
//! `<gitdir>/incrypt/<sha1(url)>/`. All object-graph work happens against
//! this local mirror; moving it to and from the real remote is delegated to
//! the `git` CLI, which owns transports, credentials, and proxies.

use std::path::{Path, PathBuf};
use std::process::Command;

use git2::Repository;

use crate::crypto;
use crate::error::{IncryptError, Result};

/// Remote-helper URL prefix, stripped before the URL reaches any transport.
const URL_SCHEME: &str = "incrypt::";

pub struct Mirror {
    url: String,
    hash: String,
    path: PathBuf,
    repo: Repository,
}

/// `incrypt::<url>` → `<url>`; bare URLs pass through.
pub fn strip_scheme(url: &str) -> &str {
    url.strip_prefix(URL_SCHEME).unwrap_or(url)
}

impl Mirror {
    /// Open the mirror for `url`, cloning it on first use.
    pub fn open(cr: &Repository, url: &str) -> Result<Self> {
        let url = strip_scheme(url).to_string();
        let hash = hex::encode(crypto::sha1(url.as_bytes()));
        let path = cr.path().join("incrypt").join(&hash);

        if !path.join("HEAD").exists() {
            tracing::info!(%url, path = %path.display(), "cloning encrypted mirror");
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            run_git(
                None,
                &["clone", "--quiet", "--mirror", &url, &path_str(&path)?],
            )?;
            // A mirror remote implies push --mirror semantics; every push
            // here uses explicit refspecs instead.
            run_git(Some(&path), &["config", "remote.origin.mirror", "false"])?;
        }

        let repo = Repository::open(&path)?;
        Ok(Self {
            url,
            hash,
            path,
            repo,
        })
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    /// Hex SHA-1 of the remote URL; namespaces the shadow references.
    pub fn url_hash(&self) -> &str {
        &self.hash
    }

    /// Incremental fetch from the real remote, pruning refs deleted there.
    pub fn fetch(&self) -> Result<()> {
        tracing::debug!(url = %self.url, "fetching encrypted mirror");
        run_git(Some(&self.path), &["fetch", "--quiet", "--prune", "origin"])
    }

    /// Push the given refspecs to the real remote.
    pub fn push(&self, refspecs: &[String], atomic: bool) -> Result<()> {
        tracing::debug!(url = %self.url, ?refspecs, atomic, "pushing encrypted mirror");
        let mut args = vec!["push", "--quiet"];
        if atomic {
            args.push("--atomic");
        }
        args.push("origin");
        args.extend(refspecs.iter().map(String::as_str));
        run_git(Some(&self.path), &args)
    }
}

fn path_str(path: &Path) -> Result<String> {
    path.to_str()
        .map(str::to_string)
        .ok_or_else(|| IncryptError::Transport(format!("non-UTF-8 mirror path {}", path.display())))
}

fn run_git(cwd: Option<&Path>, args: &[&str]) -> Result<()> {
    let mut cmd = Command::new("git");
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    // The helper runs with the cleartext repository's environment; the
    // mirror's git must discover the mirror instead.
    for var in [
        "GIT_DIR",
        "GIT_WORK_TREE",
        "GIT_INDEX_FILE",
        "GIT_OBJECT_DIRECTORY",
        "GIT_ALTERNATE_OBJECT_DIRECTORIES",
        "GIT_COMMON_DIR",
        "GIT_NAMESPACE",
    ] {
        cmd.env_remove(var);
    }
    let output = cmd
        .args(args)
        .output()
        .map_err(|e| IncryptError::Transport(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(IncryptError::Transport(format!(
            "git {} exited with {}: {}",
            args.first().unwrap_or(&""),
            output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string()),
            stderr.trim()
        )));
    }
    Ok(())
}
