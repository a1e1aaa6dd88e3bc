//! Tar archives of files, directories and inline content for injection into
//! a container's filesystem.
//!
//! Entries are validated when added. Each call to
//! [`ArchiveBuilder::build_archive`] stages the entries into a fresh
//! temporary directory and packs that directory into a POSIX tar stream with
//! paths relative to the extraction root.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use tar::{EntryType, Header};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::ArchiveError;

/// Highest permission value an entry may carry.
pub const MAX_MODE: u32 = 0o777;

const DEFAULT_FILE_MODE: u32 = 0o644;
const DEFAULT_DIR_MODE: u32 = 0o755;

/// One staged item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveEntry {
    /// A regular file; without a mode the source's permission bits are kept.
    File {
        source: PathBuf,
        target: String,
        mode: Option<u32>,
    },
    /// A directory copied recursively. A mode applies to the target
    /// directory itself; its contents keep their source permission bits.
    Directory {
        source: PathBuf,
        target: String,
        mode: Option<u32>,
    },
    /// Literal bytes, `0o644` unless a mode is given.
    Inline {
        bytes: Vec<u8>,
        target: String,
        mode: Option<u32>,
    },
}

impl ArchiveEntry {
    pub fn target(&self) -> &str {
        match self {
            ArchiveEntry::File { target, .. }
            | ArchiveEntry::Directory { target, .. }
            | ArchiveEntry::Inline { target, .. } => target,
        }
    }

    pub fn mode(&self) -> Option<u32> {
        match self {
            ArchiveEntry::File { mode, .. }
            | ArchiveEntry::Directory { mode, .. }
            | ArchiveEntry::Inline { mode, .. } => *mode,
        }
    }

    fn validate(&self) -> Result<(), ArchiveError> {
        if self.target().is_empty() {
            return Err(ArchiveError::EmptyTarget);
        }
        relative_target(self.target())?;
        if let Some(mode) = self.mode() {
            if mode > MAX_MODE {
                return Err(ArchiveError::InvalidMode(mode));
            }
        }

        match self {
            ArchiveEntry::File { source, target, .. } => {
                if !source.exists() {
                    return Err(ArchiveError::SourceNotFound(source.clone()));
                }
                if !source.is_file() {
                    return Err(ArchiveError::NotAFile(source.clone()));
                }
                if relative_target(target)?.as_os_str().is_empty() {
                    return Err(ArchiveError::InvalidTarget(target.clone()));
                }
            }
            ArchiveEntry::Directory { source, .. } => {
                if !source.exists() {
                    return Err(ArchiveError::SourceNotFound(source.clone()));
                }
                if !source.is_dir() {
                    return Err(ArchiveError::NotADirectory(source.clone()));
                }
            }
            ArchiveEntry::Inline { target, .. } => {
                if relative_target(target)?.as_os_str().is_empty() {
                    return Err(ArchiveError::InvalidTarget(target.clone()));
                }
            }
        }
        Ok(())
    }
}

/// Accumulates archive entries and packs them into tar streams.
#[derive(Debug, Clone, Default)]
pub struct ArchiveBuilder {
    entries: Vec<ArchiveEntry>,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a validated entry.
    ///
    /// # Errors
    ///
    /// Returns an `ArchiveError` if the target is empty or escapes the
    /// extraction root, the mode exceeds `0o777`, or the source is missing or
    /// of the wrong kind.
    pub fn add(&mut self, entry: ArchiveEntry) -> Result<&mut Self, ArchiveError> {
        entry.validate()?;
        self.entries.push(entry);
        Ok(self)
    }

    /// Adds a regular file.
    pub fn add_file(
        &mut self,
        source: impl Into<PathBuf>,
        target: impl Into<String>,
        mode: Option<u32>,
    ) -> Result<&mut Self, ArchiveError> {
        self.add(ArchiveEntry::File {
            source: source.into(),
            target: target.into(),
            mode,
        })
    }

    /// Adds a directory, recursively.
    pub fn add_directory(
        &mut self,
        source: impl Into<PathBuf>,
        target: impl Into<String>,
        mode: Option<u32>,
    ) -> Result<&mut Self, ArchiveError> {
        self.add(ArchiveEntry::Directory {
            source: source.into(),
            target: target.into(),
            mode,
        })
    }

    /// Adds literal content.
    pub fn add_inline(
        &mut self,
        bytes: impl Into<Vec<u8>>,
        target: impl Into<String>,
        mode: Option<u32>,
    ) -> Result<&mut Self, ArchiveError> {
        self.add(ArchiveEntry::Inline {
            bytes: bytes.into(),
            target: target.into(),
            mode,
        })
    }

    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Discards all pending entries. Archives already built are unaffected.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Stages every entry into a fresh temporary directory and packs it.
    ///
    /// Later entries overwrite earlier ones at the same target. With no
    /// entries the result is a valid, empty archive.
    pub fn build_archive(&self) -> Result<Vec<u8>, ArchiveError> {
        let staging = tempfile::Builder::new()
            .prefix("ephemera-archive-")
            .tempdir()?;
        let mut modes: BTreeMap<PathBuf, u32> = BTreeMap::new();

        for entry in &self.entries {
            stage_entry(entry, staging.path(), &mut modes)?;
        }

        let archive = pack(staging.path(), &modes)?;
        debug!(
            entries = self.entries.len(),
            bytes = archive.len(),
            "Built archive"
        );
        Ok(archive)
    }
}

/// Converts a target path into a path relative to the extraction root.
fn relative_target(target: &str) -> Result<PathBuf, ArchiveError> {
    let mut relative = PathBuf::new();
    for component in Path::new(target).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            Component::ParentDir => return Err(ArchiveError::InvalidTarget(target.to_string())),
        }
    }
    Ok(relative)
}

fn stage_entry(
    entry: &ArchiveEntry,
    staging: &Path,
    modes: &mut BTreeMap<PathBuf, u32>,
) -> Result<(), ArchiveError> {
    let relative = relative_target(entry.target())?;
    let dest = staging.join(&relative);

    match entry {
        ArchiveEntry::File { source, mode, .. } => {
            ensure_parent(&dest)?;
            fs::copy(source, &dest)?;
            let mode = mode.unwrap_or(source_mode(&fs::metadata(source)?));
            modes.insert(relative, mode);
        }
        ArchiveEntry::Inline { bytes, mode, .. } => {
            ensure_parent(&dest)?;
            fs::write(&dest, bytes)?;
            modes.insert(relative, mode.unwrap_or(DEFAULT_FILE_MODE));
        }
        ArchiveEntry::Directory { source, mode, .. } => {
            for item in WalkDir::new(source).follow_links(true) {
                let item = item.map_err(std::io::Error::from)?;
                let inner = item
                    .path()
                    .strip_prefix(source)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
                let item_relative = relative.join(inner);
                let item_dest = staging.join(&item_relative);
                let metadata = item.metadata().map_err(std::io::Error::from)?;

                if metadata.is_dir() {
                    fs::create_dir_all(&item_dest)?;
                } else if metadata.is_file() {
                    ensure_parent(&item_dest)?;
                    fs::copy(item.path(), &item_dest)?;
                } else {
                    continue;
                }

                let item_mode = match mode {
                    Some(mode) if item.depth() == 0 => *mode,
                    _ => source_mode(&metadata),
                };
                if !item_relative.as_os_str().is_empty() {
                    modes.insert(item_relative, item_mode);
                }
            }
        }
    }
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<(), ArchiveError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn pack(staging: &Path, modes: &BTreeMap<PathBuf, u32>) -> Result<Vec<u8>, ArchiveError> {
    let mtime = chrono::Utc::now().timestamp().max(0) as u64;
    let mut builder = tar::Builder::new(Vec::new());

    for item in WalkDir::new(staging).min_depth(1).sort_by_file_name() {
        let item = item.map_err(std::io::Error::from)?;
        let relative = item
            .path()
            .strip_prefix(staging)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        let is_dir = item.file_type().is_dir();
        let default_mode = if is_dir {
            DEFAULT_DIR_MODE
        } else {
            DEFAULT_FILE_MODE
        };
        let mode = modes.get(relative).copied().unwrap_or(default_mode);

        let mut header = Header::new_gnu();
        header.set_mode(mode);
        header.set_mtime(mtime);

        if is_dir {
            header.set_entry_type(EntryType::Directory);
            header.set_size(0);
            builder.append_data(&mut header, relative, std::io::empty())?;
        } else {
            let data = fs::read(item.path())?;
            header.set_entry_type(EntryType::Regular);
            header.set_size(data.len() as u64);
            builder.append_data(&mut header, relative, data.as_slice())?;
        }
    }

    Ok(builder.into_inner()?)
}

#[cfg(unix)]
fn source_mode(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & MAX_MODE
}

#[cfg(not(unix))]
fn source_mode(metadata: &fs::Metadata) -> u32 {
    match (metadata.is_dir(), metadata.permissions().readonly()) {
        (true, _) => DEFAULT_DIR_MODE,
        (false, true) => 0o444,
        (false, false) => DEFAULT_FILE_MODE,
    }
}
