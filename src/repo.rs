//! Repository access: refs, loose objects, and pack discovery.
//!
//! Opens a `.git` directory (or a worktree containing one), scans branch
//! heads under `refs/heads/`, and memory-maps every pack/index pair under
//! `objects/pack/`. Object reads try the loose store first, then each
//! pack in turn.
//!
//! `REF_DELTA` bases that live outside the pack being read are satisfied
//! by a resolver backed by the loose store and the sibling packs. The
//! resolver performs a single level of cross-pack resolution; a chain
//! that needs a second cross-pack hop surfaces as `NotInPack`.

use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use crate::loose::{parse_loose, LooseError, LooseLimits};
use crate::object::{Object, ObjectType};
use crate::object_id::ObjectId;
use crate::pack::{ExternalBases, PackError, PackReader};
use crate::source::MmapSource;

/// A branch head: a name under `refs/heads/` and the commit it points to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ref {
    pub name: String,
    pub id: ObjectId,
}

/// Errors from repository access.
#[derive(Debug)]
#[non_exhaustive]
pub enum RepoError {
    /// The path does not look like a Git repository.
    NotARepository { path: PathBuf },
    /// Filesystem access failed.
    Io { path: PathBuf, detail: String },
    /// A ref file does not hold 40 hex digits.
    BadRef { name: String },
    /// The object exists nowhere in this repository.
    NotFound { id: ObjectId },
    /// A loose object hashed to something other than its path.
    HashMismatch { expected: ObjectId, actual: ObjectId },
    /// Loose object failure.
    Loose(LooseError),
    /// Pack failure.
    Pack(PackError),
}

impl fmt::Display for RepoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotARepository { path } => {
                write!(f, "not a git repository: {}", path.display())
            }
            Self::Io { path, detail } => {
                write!(f, "repository I/O error at {}: {detail}", path.display())
            }
            Self::BadRef { name } => write!(f, "malformed ref: {name}"),
            Self::NotFound { id } => write!(f, "object {id} not found"),
            Self::HashMismatch { expected, actual } => {
                write!(f, "loose object hash mismatch: expected {expected}, got {actual}")
            }
            Self::Loose(err) => write!(f, "{err}"),
            Self::Pack(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for RepoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Loose(err) => Some(err),
            Self::Pack(err) => Some(err),
            _ => None,
        }
    }
}

impl From<LooseError> for RepoError {
    fn from(err: LooseError) -> Self {
        Self::Loose(err)
    }
}

impl From<PackError> for RepoError {
    fn from(err: PackError) -> Self {
        Self::Pack(err)
    }
}

fn io_error(path: &Path, err: &io::Error) -> RepoError {
    RepoError::Io {
        path: path.to_path_buf(),
        detail: err.to_string(),
    }
}

/// A read-only view of one Git repository.
#[derive(Debug)]
pub struct Repository {
    git_dir: PathBuf,
    branches: Vec<Ref>,
    packs: Vec<PackReader<MmapSource>>,
    loose_limits: LooseLimits,
}

impl Repository {
    /// Opens a repository at `path`, which may be either the `.git`
    /// directory itself or a worktree containing one.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RepoError> {
        let path = path.as_ref();
        let dotted = path.join(".git");
        let git_dir = if dotted.is_dir() {
            dotted
        } else {
            path.to_path_buf()
        };
        if !git_dir.join("objects").is_dir() {
            return Err(RepoError::NotARepository {
                path: path.to_path_buf(),
            });
        }

        let branches = scan_branches(&git_dir)?;
        let packs = open_packs(&git_dir)?;

        Ok(Self {
            git_dir,
            branches,
            packs,
            loose_limits: LooseLimits::default(),
        })
    }

    /// Returns the resolved `.git` directory.
    #[must_use]
    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    /// Returns the branch heads found at open, sorted by name.
    #[must_use]
    pub fn branches(&self) -> &[Ref] {
        &self.branches
    }

    /// Returns the number of packs discovered at open.
    #[must_use]
    pub fn pack_count(&self) -> usize {
        self.packs.len()
    }

    /// Reads and parses an object: loose store first, then each pack.
    pub fn read_object(&self, id: &ObjectId) -> Result<Object, RepoError> {
        if let Some(object) = self.read_loose(id)? {
            return Ok(object);
        }

        for (skip, pack) in self.packs.iter().enumerate() {
            let siblings = SiblingBases { repo: self, skip };
            match pack.extract_with(id, &siblings) {
                Ok(object) => return Ok(object),
                Err(PackError::NotInPack { id: missing }) if missing == *id => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(RepoError::NotFound { id: *id })
    }

    /// Reads a loose object if present, verifying it hashes to `id`.
    fn read_loose(&self, id: &ObjectId) -> Result<Option<Object>, RepoError> {
        let path = self.loose_path(id);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_error(&path, &err)),
        };
        let object = parse_loose(file, &self.loose_limits)?;
        if object.id() != *id {
            return Err(RepoError::HashMismatch {
                expected: *id,
                actual: object.id(),
            });
        }
        Ok(Some(object))
    }

    /// `objects/xx/yyyy…` path for an identifier.
    fn loose_path(&self, id: &ObjectId) -> PathBuf {
        let hex = id.to_string();
        self.git_dir
            .join("objects")
            .join(&hex[..2])
            .join(&hex[2..])
    }
}

/// External-base resolver over the loose store and the sibling packs of
/// the pack currently being read.
struct SiblingBases<'a> {
    repo: &'a Repository,
    skip: usize,
}

impl ExternalBases for SiblingBases<'_> {
    fn resolve_base(&self, id: &ObjectId) -> Option<(ObjectType, Vec<u8>)> {
        if let Ok(Some(object)) = self.repo.read_loose(id) {
            return Some((object.kind(), object.payload()));
        }
        for (i, pack) in self.repo.packs.iter().enumerate() {
            if i == self.skip {
                continue;
            }
            if let Ok(resolved) = pack.extract_raw(id) {
                return Some(resolved);
            }
        }
        None
    }
}

/// Reads `refs/heads/*`, each file holding 40 hex digits.
fn scan_branches(git_dir: &Path) -> Result<Vec<Ref>, RepoError> {
    let heads = git_dir.join("refs").join("heads");
    let entries = match fs::read_dir(&heads) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(io_error(&heads, &err)),
    };

    let mut branches = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| io_error(&heads, &err))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let contents = fs::read(&path).map_err(|err| io_error(&path, &err))?;
        let trimmed = contents.trim_ascii();
        let id = ObjectId::from_hex(trimmed).ok_or(RepoError::BadRef { name: name.clone() })?;
        branches.push(Ref { name, id });
    }
    branches.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(branches)
}

/// Opens every `*.idx` / `*.pack` pair under `objects/pack/`.
fn open_packs(git_dir: &Path) -> Result<Vec<PackReader<MmapSource>>, RepoError> {
    let pack_dir = git_dir.join("objects").join("pack");
    let entries = match fs::read_dir(&pack_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(io_error(&pack_dir, &err)),
    };

    let mut idx_paths: Vec<PathBuf> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| io_error(&pack_dir, &err))?;
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "idx") {
            idx_paths.push(path);
        }
    }
    idx_paths.sort();

    let mut packs = Vec::new();
    for idx_path in idx_paths {
        let pack_path = idx_path.with_extension("pack");
        if !pack_path.is_file() {
            continue;
        }
        let pack_source = MmapSource::open(&pack_path).map_err(PackError::Source)?;
        let idx_source = MmapSource::open(&idx_path).map_err(PackError::Source)?;
        packs.push(PackReader::open(pack_source, idx_source)?);
    }
    Ok(packs)
}
