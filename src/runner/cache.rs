//! Fingerprint cache
//!
//! A node that declares inputs or outputs can be skipped when its files are
//! unchanged since the last successful run. Records live as one JSON file per
//! cache key under a per-project directory of the user cache root.
//!
//! Checking a record first compares `(size, mtime)` of every input and
//! output. Only when that cheap check fails are the inputs hashed with
//! SHA-256 and compared with the stored digests.

use crate::error::{CacheError, CacheResult};
use crate::runner::{ResolvedNode, Task};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};

/// Environment variable overriding the cache root
pub const CACHE_DIR_ENV: &str = "CTASK_CACHE_DIR";

/// Recorded state of one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSignature {
    pub size: u64,

    /// Modification time in nanoseconds since the Unix epoch
    pub modified: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// Persisted fingerprints of one node.
///
/// Unknown fields are ignored so older binaries can read newer records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintRecord {
    #[serde(default)]
    pub task: String,

    /// Hash of the unrendered command and declared variables
    #[serde(default)]
    pub definition: String,

    #[serde(default)]
    pub inputs: BTreeMap<String, FileSignature>,

    #[serde(default)]
    pub outputs: BTreeMap<String, FileSignature>,
}

/// Everything the cache needs to know about a node
#[derive(Debug, Clone)]
pub struct CacheSubject {
    pub task_name: String,
    pub args: Vec<String>,
    pub environment: Option<String>,

    /// Input glob patterns, already rendered
    pub inputs: Vec<String>,

    /// Output glob patterns, already rendered
    pub outputs: Vec<String>,

    /// Directory the patterns are relative to
    pub base_dir: PathBuf,

    pub definition: String,
}

impl CacheSubject {
    pub fn new(
        node: &ResolvedNode,
        environment: Option<&str>,
        inputs: Vec<String>,
        outputs: Vec<String>,
        base_dir: PathBuf,
    ) -> Self {
        CacheSubject {
            task_name: node.task.name.clone(),
            args: node.args.clone(),
            environment: environment.map(str::to_string),
            inputs,
            outputs,
            base_dir,
            definition: definition_hash(&node.task),
        }
    }

    /// Only nodes with at least one input or output pattern are cached
    pub fn is_eligible(&self) -> bool {
        !self.inputs.is_empty() || !self.outputs.is_empty()
    }

    /// Stable key over the node identity, its patterns and the expanded paths
    fn key(&self, inputs: &BTreeSet<PathBuf>, outputs: &BTreeSet<PathBuf>) -> String {
        let mut hasher = Sha256::new();
        let mut field = |label: &str, value: &str| {
            hasher.update(label.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"\0");
        };

        field("task", &self.task_name);
        for arg in &self.args {
            field("arg", arg);
        }
        field("environment", self.environment.as_deref().unwrap_or_default());
        for pattern in &self.inputs {
            field("input-pattern", pattern);
        }
        for pattern in &self.outputs {
            field("output-pattern", pattern);
        }
        for path in inputs {
            field("input", &path.to_string_lossy());
        }
        for path in outputs {
            field("output", &path.to_string_lossy());
        }

        format!("{:x}", hasher.finalize())
    }
}

/// Hash of the parts of a task definition that change what it produces
pub fn definition_hash(task: &Task) -> String {
    let mut hasher = Sha256::new();
    hasher.update(task.command.display().as_bytes());
    for (key, value) in &task.env {
        hasher.update(b"\0");
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Fingerprint store rooted at one directory
#[derive(Debug, Clone)]
pub struct FingerprintCache {
    dir: PathBuf,
}

impl FingerprintCache {
    /// Create a cache storing records directly in `dir`
    pub fn new(dir: PathBuf) -> Self {
        FingerprintCache { dir }
    }

    /// Cache for a project, under the user cache root
    pub fn for_project(project_root: &Path) -> Option<Self> {
        let root = cache_root()?;
        let canonical = project_root
            .canonicalize()
            .unwrap_or_else(|_| project_root.to_path_buf());
        let digest = format!(
            "{:x}",
            Sha256::digest(canonical.to_string_lossy().as_bytes())
        );
        Some(Self::new(root.join(&digest[..16])))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// True when the node's previous results are still valid.
    ///
    /// Store errors are logged and count as a miss.
    pub fn should_skip(&self, subject: &CacheSubject) -> bool {
        match self.check(subject) {
            Ok(hit) => hit,
            Err(e) => {
                warn!(task = %subject.task_name, error = %e, "ignoring unreadable cache");
                false
            }
        }
    }

    /// Record fresh fingerprints after a successful run
    pub fn record(&self, subject: &CacheSubject) -> CacheResult<()> {
        let inputs = expand_patterns(&subject.inputs, &subject.base_dir);
        let outputs = expand_patterns(&subject.outputs, &subject.base_dir);
        let key = subject.key(&inputs.files, &outputs.files);

        let record = FingerprintRecord {
            task: subject.task_name.clone(),
            definition: subject.definition.clone(),
            inputs: fingerprint_files(&inputs.files)?,
            outputs: fingerprint_files(&outputs.files)?,
        };

        self.store(&key, &record)?;
        debug!(task = %subject.task_name, key = %key, "recorded fingerprints");
        Ok(())
    }

    fn store(&self, key: &str, record: &FingerprintRecord) -> CacheResult<()> {
        fs::create_dir_all(&self.dir).map_err(|error| CacheError::Io {
            path: self.dir.clone(),
            error,
        })?;

        let path = self.record_path(key);
        let json = serde_json::to_string_pretty(record).map_err(|error| CacheError::Json {
            path: path.clone(),
            error,
        })?;
        fs::write(&path, json).map_err(|error| CacheError::Io { path, error })
    }

    fn check(&self, subject: &CacheSubject) -> CacheResult<bool> {
        if !subject.is_eligible() {
            return Ok(false);
        }

        let inputs = expand_patterns(&subject.inputs, &subject.base_dir);
        let outputs = expand_patterns(&subject.outputs, &subject.base_dir);
        if !outputs.unmatched.is_empty() {
            debug!(task = %subject.task_name, missing = ?outputs.unmatched, "declared outputs missing");
            return Ok(false);
        }

        let key = subject.key(&inputs.files, &outputs.files);
        let Some(record) = self.load(&key)? else {
            debug!(task = %subject.task_name, key = %key, "no cache record");
            return Ok(false);
        };

        if record.definition != subject.definition {
            debug!(task = %subject.task_name, "task definition changed");
            return Ok(false);
        }
        if !same_paths(&record.inputs, &inputs.files) || !same_paths(&record.outputs, &outputs.files)
        {
            return Ok(false);
        }

        if metadata_matches(&record.inputs, &inputs.files)?
            && metadata_matches(&record.outputs, &outputs.files)?
        {
            debug!(task = %subject.task_name, "cache hit on file metadata");
            return Ok(true);
        }

        let mut refreshed = BTreeMap::new();
        for path in &inputs.files {
            let stored = record
                .inputs
                .get(&path_key(path))
                .and_then(|sig| sig.sha256.as_deref());
            let Some(stored) = stored else {
                return Ok(false);
            };
            let digest = hash_file(path)?;
            if digest != stored {
                debug!(task = %subject.task_name, path = %path.display(), "input content changed");
                return Ok(false);
            }
            let (size, modified) = stat(path)?;
            refreshed.insert(
                path_key(path),
                FileSignature {
                    size,
                    modified,
                    sha256: Some(digest),
                },
            );
        }

        if !outputs.files.iter().all(|path| path.exists()) {
            return Ok(false);
        }
        debug!(task = %subject.task_name, "cache hit on content hash");

        // Catch the stored metadata up so the next check takes the fast path.
        let updated = fingerprint_files(&outputs.files).and_then(|outputs| {
            self.store(
                &key,
                &FingerprintRecord {
                    inputs: refreshed,
                    outputs,
                    ..record
                },
            )
        });
        if let Err(e) = updated {
            warn!(task = %subject.task_name, error = %e, "could not refresh fingerprints");
        }
        Ok(true)
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    fn load(&self, key: &str) -> CacheResult<Option<FingerprintRecord>> {
        let path = self.record_path(key);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(CacheError::Io { path, error }),
        };

        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|error| CacheError::Json { path, error })
    }
}

/// User cache root: `CTASK_CACHE_DIR`, else the platform cache directory
pub fn cache_root() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os(CACHE_DIR_ENV) {
        if !dir.is_empty() {
            return Some(PathBuf::from(dir));
        }
    }
    ProjectDirs::from("", "", "ctask").map(|dirs| dirs.cache_dir().to_path_buf())
}

/// Files matched by a set of patterns
#[derive(Debug, Default)]
struct ExpandedPaths {
    files: BTreeSet<PathBuf>,

    /// Patterns that matched nothing on disk
    unmatched: Vec<String>,
}

/// Expand glob patterns relative to `base`. Matched directories contribute
/// every file beneath them.
fn expand_patterns(patterns: &[String], base: &Path) -> ExpandedPaths {
    let mut expanded = ExpandedPaths::default();

    for pattern in patterns {
        let trimmed = pattern.trim_end_matches(['/', '\\']);
        let full = base.join(if trimmed.is_empty() { "." } else { trimmed });
        let full = full.to_string_lossy();

        let entries = match glob::glob(&full) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(pattern = %pattern, error = %e, "invalid glob pattern");
                expanded.unmatched.push(pattern.clone());
                continue;
            }
        };

        let mut matched = false;
        for entry in entries.flatten() {
            matched = true;
            if entry.is_dir() {
                let nested = entry.join("**").join("*");
                if let Ok(files) = glob::glob(&nested.to_string_lossy()) {
                    expanded
                        .files
                        .extend(files.flatten().filter(|p| p.is_file()));
                }
            } else {
                expanded.files.insert(entry);
            }
        }

        if !matched {
            expanded.unmatched.push(pattern.clone());
        }
    }

    expanded
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn same_paths(recorded: &BTreeMap<String, FileSignature>, current: &BTreeSet<PathBuf>) -> bool {
    recorded.len() == current.len() && current.iter().all(|p| recorded.contains_key(&path_key(p)))
}

/// Read `(size, mtime)` of a file
fn stat(path: &Path) -> CacheResult<(u64, u64)> {
    let meta = fs::metadata(path).map_err(|error| CacheError::Io {
        path: path.to_path_buf(),
        error,
    })?;
    let modified = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or_default();
    Ok((meta.len(), modified))
}

fn metadata_matches(
    recorded: &BTreeMap<String, FileSignature>,
    current: &BTreeSet<PathBuf>,
) -> CacheResult<bool> {
    for path in current {
        let Some(sig) = recorded.get(&path_key(path)) else {
            return Ok(false);
        };
        let (size, modified) = match stat(path) {
            Ok(meta) => meta,
            Err(_) => return Ok(false),
        };
        if sig.size != size || sig.modified != modified {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Streamed SHA-256 digest of a file, hex encoded
pub fn hash_file(path: &Path) -> CacheResult<String> {
    let io_err = |error: io::Error| CacheError::Io {
        path: path.to_path_buf(),
        error,
    };
    let mut reader = BufReader::new(File::open(path).map_err(io_err)?);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher).map_err(io_err)?;
    Ok(format!("{:x}", hasher.finalize()))
}

fn fingerprint_files(paths: &BTreeSet<PathBuf>) -> CacheResult<BTreeMap<String, FileSignature>> {
    let mut signatures = BTreeMap::new();
    for path in paths {
        let (size, modified) = stat(path)?;
        signatures.insert(
            path_key(path),
            FileSignature {
                size,
                modified,
                sha256: Some(hash_file(path)?),
            },
        );
    }
    Ok(signatures)
}
