//! Location model and the file-system service the interpreter talks to.
//!
//! Shell paths use `\` (or `/`) separators and may start with a mapped drive
//! such as `fs0:`. A [`FileSystem`] maps those onto host paths; the
//! interpreter never touches `std::fs` directly.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

/// Current working location: an optional mapped drive plus a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellLocation {
    /// Lower-cased drive name, `None` for plain host paths.
    pub drive: Option<String>,
    /// Host directory the drive maps to; `..` never climbs above it.
    pub root: PathBuf,
    /// Host directory of the location.
    pub dir: PathBuf,
}

impl ShellLocation {
    /// A location on the host file system without a drive mapping.
    pub fn host(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let root = dir
            .ancestors()
            .last()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));
        Self {
            drive: None,
            root,
            dir,
        }
    }

    /// The root directory of a mapped drive.
    pub fn drive_root(drive: &str, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            drive: Some(drive.to_ascii_lowercase()),
            dir: root.clone(),
            root,
        }
    }
}

impl fmt::Display for ShellLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.drive {
            Some(drive) => {
                let rel = self.dir.strip_prefix(&self.root).unwrap_or(Path::new(""));
                let parts: Vec<String> = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                write!(f, "{}:\\{}", drive.to_ascii_uppercase(), parts.join("\\"))
            }
            None => write!(f, "{}", self.dir.display()),
        }
    }
}

/// What the interpreter needs to know about a resolved file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    pub size: u64,
    pub is_dir: bool,
}

/// File-system service supplied by the host.
pub trait FileSystem {
    /// Host directory a drive name (without the colon) maps to.
    fn drive_root(&self, drive: &str) -> Option<PathBuf>;

    /// Metadata of a host path, `None` when it does not exist.
    fn metadata(&self, path: &Path) -> Option<FileInfo>;

    /// Whole contents of a file.
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Open a file for writing, creating it when missing. Without `append`
    /// an existing file is truncated.
    fn create(&self, path: &Path, append: bool) -> io::Result<Box<dyn Write>>;

    /// Map shell path text onto a location, relative to `current`.
    ///
    /// Returns `None` only when the text names an unmapped drive. The target
    /// is not required to exist.
    fn locate(&self, current: &ShellLocation, name: &str) -> Option<ShellLocation> {
        let name = name.trim();
        if let Some((drive, rest)) = split_drive(name) {
            let root = self.drive_root(drive)?;
            let mut loc = ShellLocation::drive_root(drive, root);
            loc.dir = join_clamped(&loc.root, &loc.root, rest);
            return Some(loc);
        }
        if let Some(rest) = name.strip_prefix(['\\', '/']) {
            let mut loc = current.clone();
            loc.dir = join_clamped(&current.root, &current.root, rest);
            return Some(loc);
        }
        let mut loc = current.clone();
        loc.dir = join_clamped(&current.root, &current.dir, name);
        Some(loc)
    }

    /// Host path for shell path text.
    fn resolve(&self, current: &ShellLocation, name: &str) -> Option<PathBuf> {
        self.locate(current, name).map(|loc| loc.dir)
    }
}

/// Split `fs0:\dir` into `("fs0", "\dir")`.
pub fn split_drive(name: &str) -> Option<(&str, &str)> {
    let colon = name.find(':')?;
    let drive = &name[..colon];
    if drive.is_empty() || !drive.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    Some((drive, &name[colon + 1..]))
}

/// Lexically join shell path text onto `base`, never leaving `root`.
fn join_clamped(root: &Path, base: &Path, rel: &str) -> PathBuf {
    let mut dir = base.to_path_buf();
    for part in rel.split(['\\', '/']) {
        match part {
            "" | "." => {}
            ".." => {
                if dir != root && dir.starts_with(root) {
                    dir.pop();
                }
            }
            part => dir.push(part),
        }
    }
    // Keep `dir` free of `.`/`..` even when `base` carried them.
    dir.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// [`FileSystem`] over the host's `std::fs`, with a drive → directory map.
#[derive(Debug, Clone, Default)]
pub struct HostFileSystem {
    mappings: BTreeMap<String, PathBuf>,
}

impl HostFileSystem {
    pub fn new(mappings: impl IntoIterator<Item = (String, PathBuf)>) -> Self {
        Self {
            mappings: mappings
                .into_iter()
                .map(|(drive, root)| (drive.to_ascii_lowercase(), root))
                .collect(),
        }
    }

    pub fn drives(&self) -> impl Iterator<Item = &str> {
        self.mappings.keys().map(String::as_str)
    }
}

impl FileSystem for HostFileSystem {
    fn drive_root(&self, drive: &str) -> Option<PathBuf> {
        self.mappings.get(&drive.to_ascii_lowercase()).cloned()
    }

    fn metadata(&self, path: &Path) -> Option<FileInfo> {
        let meta = fs::metadata(path).ok()?;
        Some(FileInfo {
            size: meta.len(),
            is_dir: meta.is_dir(),
        })
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn create(&self, path: &Path, append: bool) -> io::Result<Box<dyn Write>> {
        let file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(path)?;
        Ok(Box::new(file))
    }
}
