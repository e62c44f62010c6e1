//! Build information for the status endpoint
//!
//! A commit stamped at build time through `GIT_REV_PARSE` wins. Otherwise the commit is
//! read from the enclosing git repository at runtime, searching the working directory
//! and its parents the way `git` itself does.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Symbolic refs followed before giving up
const MAX_REF_DEPTH: usize = 5;

#[derive(Error, Debug)]
pub enum GitLookupError {
    #[error("no git repository found above {0}")]
    NotARepository(PathBuf),

    #[error("cannot resolve ref '{0}'")]
    UnresolvedRef(String),

    #[error("malformed HEAD: '{0}'")]
    MalformedHead(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Commit hash of this build, or a placeholder saying why it is unknown
pub fn git_commit() -> String {
    commit_or_lookup(option_env!("GIT_REV_PARSE"), || {
        std::env::current_dir()
            .map_err(GitLookupError::from)
            .and_then(|cwd| find_git_commit(&cwd))
    })
}

fn commit_or_lookup(
    stamped: Option<&str>,
    lookup: impl FnOnce() -> Result<String, GitLookupError>,
) -> String {
    if let Some(hash) = stamped.map(str::trim).filter(|hash| !hash.is_empty()) {
        return hash.to_string();
    }

    match lookup() {
        Ok(hash) => hash,
        Err(e) => format!("Git hash not available: {}", e),
    }
}

/// Commit hash `HEAD` points at, for the repository containing `start`
pub fn find_git_commit(start: &Path) -> Result<String, GitLookupError> {
    let git_dir = find_git_dir(start)?;
    let common_dir = match fs::read_to_string(git_dir.join("commondir")) {
        Ok(rel) => git_dir.join(rel.trim()),
        Err(_) => git_dir.clone(),
    };

    let mut target = fs::read_to_string(git_dir.join("HEAD"))?.trim().to_string();
    for _ in 0..MAX_REF_DEPTH {
        let refname = match target.strip_prefix("ref:") {
            Some(name) => name.trim().to_string(),
            None if is_object_id(&target) => return Ok(target),
            None => return Err(GitLookupError::MalformedHead(target)),
        };

        target = read_ref(&git_dir, &common_dir, &refname)?
            .ok_or(GitLookupError::UnresolvedRef(refname))?;
    }

    Err(GitLookupError::UnresolvedRef(target))
}

/// Locate the git directory for `start`, following `.git` files of worktrees
fn find_git_dir(start: &Path) -> Result<PathBuf, GitLookupError> {
    for dir in start.ancestors() {
        let candidate = dir.join(".git");
        if candidate.is_dir() {
            return Ok(candidate);
        }
        if candidate.is_file() {
            let contents = fs::read_to_string(&candidate)?;
            if let Some(path) = contents.trim().strip_prefix("gitdir:") {
                return Ok(dir.join(path.trim()));
            }
        }
    }

    Err(GitLookupError::NotARepository(start.to_path_buf()))
}

/// Value of a ref from its loose file or `packed-refs`
fn read_ref(git_dir: &Path, common_dir: &Path, refname: &str) -> Result<Option<String>, io::Error> {
    for dir in [git_dir, common_dir] {
        match fs::read_to_string(dir.join(refname)) {
            Ok(value) => return Ok(Some(value.trim().to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }

    let packed = match fs::read_to_string(common_dir.join("packed-refs")) {
        Ok(packed) => packed,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    Ok(packed
        .lines()
        .filter(|line| !line.starts_with('#') && !line.starts_with('^'))
        .filter_map(|line| line.split_once(' '))
        .find(|(_, name)| name.trim() == refname)
        .map(|(hash, _)| hash.to_string()))
}

/// SHA-1 or SHA-256 object id
fn is_object_id(value: &str) -> bool {
    matches!(value.len(), 40 | 64) && value.chars().all(|c| c.is_ascii_hexdigit())
}
