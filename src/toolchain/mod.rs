//! The boundary to external compiler and test engines.
//!
//! Tasks never shell out on their own; they go through a [`Toolchain`], which
//! turns a [`ResolvedConfig`] into concrete invocations and translates the
//! results back into plain data: an [`ArtifactSet`] for compilation and a
//! [`TestReport`] for test runs. Implementations keep no state between calls.

mod process;
mod solc;

use std::collections::BTreeMap;
use std::fmt::Display;
use std::fs;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{PathsConfig, ResolvedConfig};
use crate::core::Hash32;
use crate::error::ToolchainError;

pub use solc::SolcToolchain;

/// Adapter to a compiler and a test engine.
pub trait Toolchain: Send + Sync {
    /// Compiles the project sources described by `config`.
    fn compile(&self, config: &ResolvedConfig) -> Result<ArtifactSet, ToolchainError>;

    /// Runs the project's test suite against freshly compiled `artifacts`.
    fn test(
        &self,
        config: &ResolvedConfig,
        artifacts: &ArtifactSet,
    ) -> Result<TestReport, ToolchainError>;
}

/// A single compiled contract.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    /// Source unit name, e.g. `contracts/Lock.sol`.
    pub source: String,
    /// Contract name, e.g. `Lock`.
    pub name: String,
    pub abi: Value,
    pub bytecode: Vec<u8>,
}

impl Artifact {
    /// Fully qualified name: `<source>:<name>`.
    pub fn id(&self) -> String {
        format!("{}:{}", self.source, self.name)
    }

    pub fn bytecode_hash(&self) -> Hash32 {
        Hash32::hash(&self.bytecode)
    }
}

/// On-disk representation of an [`Artifact`].
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ArtifactFile<'a> {
    #[serde(rename = "_format")]
    format: &'static str,
    contract_name: &'a str,
    source_name: &'a str,
    abi: &'a Value,
    bytecode: String,
}

/// Compiled contracts keyed by their fully qualified name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArtifactSet {
    artifacts: BTreeMap<String, Artifact>,
}

impl ArtifactSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, artifact: Artifact) {
        self.artifacts.insert(artifact.id(), artifact);
    }

    /// Looks up an artifact by its fully qualified name.
    pub fn get(&self, id: &str) -> Option<&Artifact> {
        self.artifacts.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts.values()
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Hash over every contract's name and bytecode.
    pub fn fingerprint(&self) -> Hash32 {
        let mut hasher = blake3::Hasher::new();
        for (id, artifact) in &self.artifacts {
            hasher.update(id.as_bytes());
            hasher.update(&artifact.bytecode);
        }
        hasher.finalize().into()
    }

    /// Writes one `<dir>/<source>/<Contract>.json` file per artifact.
    pub fn write_to(&self, dir: &Utf8Path) -> std::io::Result<Vec<Utf8PathBuf>> {
        let mut written = Vec::with_capacity(self.artifacts.len());

        for artifact in self.artifacts.values() {
            let folder = dir.join(&artifact.source);
            fs::create_dir_all(&folder)?;

            let path = folder.join(format!("{}.json", artifact.name));
            let file = ArtifactFile {
                format: "kiln-artifact-1",
                contract_name: &artifact.name,
                source_name: &artifact.source,
                abi: &artifact.abi,
                bytecode: format!("0x{}", hex::encode(&artifact.bytecode)),
            };

            fs::write(&path, serde_json::to_vec_pretty(&file)?)?;
            written.push(path);
        }

        Ok(written)
    }
}

impl<'a> IntoIterator for &'a ArtifactSet {
    type Item = &'a Artifact;
    type IntoIter = std::collections::btree_map::Values<'a, String, Artifact>;

    fn into_iter(self) -> Self::IntoIter {
        self.artifacts.values()
    }
}

/// Outcome of a test run. A failing suite is still a report, not an error.
#[derive(Debug, Clone, PartialEq)]
pub struct TestReport {
    pub success: bool,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        })
    }
}

/// A message reported by the compiler.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    /// `file:start..end` when the compiler pointed at a location.
    pub location: Option<String>,
    /// Pre-rendered message with a source excerpt, if the compiler gave one.
    pub formatted: Option<String>,
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(formatted) = &self.formatted {
            return f.write_str(formatted.trim_end());
        }

        match &self.location {
            Some(location) => write!(f, "{}: {} ({})", self.severity, self.message, location),
            None => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}

/// Reads a `remappings.txt` style file: one `prefix=target` per line, blank
/// lines and `#` comments ignored.
pub fn read_remappings(path: &Utf8Path) -> std::io::Result<Vec<String>> {
    let contents = fs::read_to_string(path)?;

    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter(|line| line.contains('='))
        .map(String::from)
        .collect())
}

/// One `name/=<lib>/name/src/` remapping for every directory inside each of
/// the library folders. Missing folders are skipped.
pub fn library_remappings(root: &Utf8Path, libs: &[Utf8PathBuf]) -> std::io::Result<Vec<String>> {
    let mut remappings = Vec::new();

    for lib in libs {
        let dir = root.join(lib);
        if !dir.is_dir() {
            continue;
        }

        for entry in dir.read_dir_utf8()? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                let name = entry.file_name();
                remappings.push(format!("{name}/={lib}/{name}/src/"));
            }
        }
    }

    Ok(remappings)
}

/// Import remappings implied by the project layout: the file named by
/// `toolchain.remappingsFile`, when it exists, plus [`library_remappings`] for
/// the folders listed in `foundry.libs`. Sorted, without duplicates.
pub fn project_remappings(
    config: &ResolvedConfig,
    paths: &PathsConfig,
) -> Result<Vec<String>, ToolchainError> {
    let mut remappings = Vec::new();

    if let Some(file) = config.get_as::<Utf8PathBuf>("toolchain.remappingsFile")? {
        let file = paths.resolve(&file);
        if file.is_file() {
            remappings.extend(read_remappings(&file)?);
        }
    }

    let libs = config.get_as::<Vec<Utf8PathBuf>>("foundry.libs")?.unwrap_or_default();
    remappings.extend(library_remappings(&paths.root, &libs)?);

    remappings.sort();
    remappings.dedup();
    Ok(remappings)
}
