//! Locating git's configuration files and executables.
//!
//! - [`git_system_config`] - the installation-wide `gitconfig`
//! - [`git_global_config`] - the user's `~/.gitconfig`
//! - [`git_local_config`] - the repository's `.git/config`, following `gitdir:` redirects
//! - [`find_app`] - a `PATH` search honouring `PATHEXT`

use std::env;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

/// Find an executable on `PATH`.
pub fn find_app(name: &str) -> Option<PathBuf> {
    let path = env::var_os("PATH")?;
    let pathext = env::var("PATHEXT").ok();
    find_app_in(name, &path, pathext.as_deref(), |candidate| candidate.is_file())
}

/// Search the directories of `path` for `name`, trying each `PATHEXT` extension.
///
/// `exists` decides whether a candidate is present.
pub fn find_app_in(
    name: &str,
    path: &OsStr,
    pathext: Option<&str>,
    exists: impl Fn(&Path) -> bool,
) -> Option<PathBuf> {
    let extensions: Vec<&str> = match pathext {
        Some(exts) => exts.split(';').filter(|e| !e.is_empty()).collect(),
        None => vec![""],
    };

    for dir in env::split_paths(path) {
        for ext in &extensions {
            let candidate = dir.join(format!("{}{}", name, ext));
            if exists(&candidate) {
                return Some(candidate);
            }
        }
    }
    None
}

/// The system-wide git configuration, located relative to the `git` on `PATH`.
pub fn git_system_config() -> Option<PathBuf> {
    let git = find_app("git")?;
    let prefix = git.parent()?.parent()?;
    system_config_candidates(prefix)
        .into_iter()
        .find(|candidate| candidate.is_file())
}

/// Places an installation rooted at `prefix` keeps its `gitconfig`.
pub fn system_config_candidates(prefix: &Path) -> Vec<PathBuf> {
    let mut candidates = vec![
        prefix.join("etc").join("gitconfig"),
        prefix.join("mingw64").join("etc").join("gitconfig"),
        prefix.join("mingw32").join("etc").join("gitconfig"),
    ];
    if prefix == Path::new("/usr") {
        candidates.push(PathBuf::from("/etc/gitconfig"));
    }
    candidates
}

/// The user's global git configuration.
pub fn git_global_config() -> Option<PathBuf> {
    let dirs = directories::BaseDirs::new()?;
    global_config_in(dirs.home_dir())
}

/// `.gitconfig` in `home`, if present.
pub fn global_config_in(home: &Path) -> Option<PathBuf> {
    let config = home.join(".gitconfig");
    config.is_file().then_some(config)
}

/// The local repository configuration for `start`, if it is inside a repository.
pub fn git_local_config(start: &Path) -> Option<PathBuf> {
    let config = find_git_dir(start)?.join("config");
    config.is_file().then_some(config)
}

/// Walk up from `start` to the nearest `.git` and return the git directory.
///
/// A `.git` file holding `gitdir: <path>` (worktrees, submodules) is followed;
/// relative paths resolve against the directory containing the file.
pub fn find_git_dir(start: &Path) -> Option<PathBuf> {
    for dir in start.ancestors() {
        let marker = dir.join(".git");
        if marker.is_dir() {
            return Some(marker);
        }
        if marker.is_file() {
            let content = fs::read_to_string(&marker).ok()?;
            let target = parse_gitdir(&content)?;
            let target = Path::new(target);
            let resolved = if target.is_absolute() {
                target.to_path_buf()
            } else {
                dir.join(target)
            };
            return resolved.is_dir().then_some(resolved);
        }
    }
    None
}

fn parse_gitdir(content: &str) -> Option<&str> {
    content.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        if key.trim().eq_ignore_ascii_case("gitdir") {
            let value = value.trim();
            (!value.is_empty()).then_some(value)
        } else {
            None
        }
    })
}
