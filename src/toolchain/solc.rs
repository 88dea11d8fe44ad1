use std::collections::BTreeMap;
use std::fs;
use std::process::Command;
use std::time::Duration;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::config::{CompilerConfig, PathsConfig, ProjectConfig, ResolvedConfig};
use crate::error::ToolchainError;
use crate::toolchain::{
    Artifact, ArtifactSet, Diagnostic, Severity, TestReport, Toolchain, process, project_remappings,
};

/// Drives a `solc` binary through its standard-JSON interface and runs the
/// configured test command.
#[derive(Debug, Clone, Copy, Default)]
pub struct SolcToolchain;

impl SolcToolchain {
    pub fn new() -> Self {
        Self
    }
}

impl Toolchain for SolcToolchain {
    fn compile(&self, config: &ResolvedConfig) -> Result<ArtifactSet, ToolchainError> {
        let project = ProjectConfig::from_resolved(config)?;
        let Some(compiler) = project.solidity.primary() else {
            return Err(ToolchainError::EmptyKey("solidity.compilers".into()));
        };

        let sources = collect_sources(&project.paths)?;
        if sources.is_empty() {
            tracing::info!("No sources found in {}", project.paths.sources());
            return Ok(ArtifactSet::new());
        }

        let mut remappings = compiler.settings.remappings.clone();
        remappings.extend(project_remappings(config, &project.paths)?);
        remappings.sort();
        remappings.dedup();

        let binary = locate_binary(config, &project.paths, &compiler.version)?;
        check_version(&binary, &compiler.version)?;

        let input = standard_input(&compiler, &sources, &remappings);
        let timeout = config.get_as::<u64>("toolchain.timeout")?.map(Duration::from_millis);

        tracing::info!(
            "Compiling {} file(s) with solc {}",
            sources.len(),
            compiler.version
        );

        let mut command = Command::new(binary.as_str());
        command.arg("--standard-json").current_dir(&project.paths.root);

        let captured = process::run(command, Some(serde_json::to_vec(&input)?), timeout)?;
        if !captured.status.success() && captured.stdout.trim().is_empty() {
            return Err(ToolchainError::Exit {
                program: binary.to_string(),
                status: captured.status.to_string(),
                stderr: captured.stderr,
            });
        }

        parse_output(&captured.stdout)
    }

    fn test(
        &self,
        config: &ResolvedConfig,
        artifacts: &ArtifactSet,
    ) -> Result<TestReport, ToolchainError> {
        let project = ProjectConfig::from_resolved(config)?;
        let argv = config
            .get_as::<Vec<String>>("test.command")?
            .unwrap_or_else(|| vec!["npx".into(), "mocha".into()]);
        let timeout = config.get_as::<u64>("test.timeout")?.map(Duration::from_millis);

        let Some((program, args)) = argv.split_first() else {
            return Err(ToolchainError::EmptyKey("test.command".into()));
        };

        let version = project
            .solidity
            .primary()
            .map(|compiler| compiler.version)
            .unwrap_or_default();

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(&project.paths.root)
            .env("KILN_ARTIFACTS", project.paths.artifacts().as_str())
            .env("KILN_NETWORK", &project.default_network)
            .env("KILN_SOLC_VERSION", version);

        if let Some(url) = project.network().and_then(|n| n.url.as_deref()) {
            command.env("KILN_NETWORK_URL", url);
        }

        tracing::info!(
            "Testing {} contract(s) with `{}`",
            artifacts.len(),
            argv.join(" ")
        );

        let captured = process::run(command, None, timeout)?;

        Ok(TestReport {
            success: captured.status.success(),
            exit_code: captured.status.code(),
            stdout: captured.stdout,
            stderr: captured.stderr,
            duration: captured.duration,
        })
    }
}

/// Reads every `.sol` file under the sources directory. Keys are source unit
/// names: paths relative to the project root with forward slashes.
fn collect_sources(paths: &PathsConfig) -> Result<BTreeMap<String, String>, ToolchainError> {
    let pattern = format!("{}/**/*.sol", glob::Pattern::escape(paths.sources().as_str()));
    let mut sources = BTreeMap::new();

    for entry in glob::glob(&pattern)? {
        let path = entry?;
        let Some(path) = Utf8Path::from_path(&path) else {
            tracing::warn!("Skipping non UTF-8 path {}", path.display());
            continue;
        };

        sources.insert(source_unit_name(&paths.root, path), fs::read_to_string(path)?);
    }

    Ok(sources)
}

/// Sources outside the root keep their full path.
fn source_unit_name(root: &Utf8Path, path: &Utf8Path) -> String {
    let Ok(relative) = path.strip_prefix(root) else {
        return path.to_string();
    };

    relative
        .components()
        .filter(|c| !matches!(c, Utf8Component::CurDir))
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join("/")
}

/// Picks the compiler binary: an explicit `toolchain.solc`, then a cached
/// `solc-<version>`, then `solc` from `PATH`.
fn locate_binary(
    config: &ResolvedConfig,
    paths: &PathsConfig,
    version: &str,
) -> Result<Utf8PathBuf, ToolchainError> {
    if let Some(binary) = config.get_as::<Utf8PathBuf>("toolchain.solc")? {
        return Ok(binary);
    }

    let cached = paths.cache().join("compilers").join(format!("solc-{version}"));
    if cached.is_file() {
        return Ok(cached);
    }

    Ok(Utf8PathBuf::from("solc"))
}

fn check_version(binary: &Utf8Path, requested: &str) -> Result<(), ToolchainError> {
    let mut command = Command::new(binary.as_str());
    command.arg("--version");

    let captured = process::run(command, None, Some(Duration::from_secs(30)))?;
    let found = parse_version(&captured.stdout).unwrap_or_default();

    if found != requested {
        return Err(ToolchainError::VersionMismatch {
            program: binary.to_string(),
            requested: requested.to_string(),
            found: if found.is_empty() { "no version".into() } else { found },
        });
    }

    Ok(())
}

/// Extracts `0.8.19` from `Version: 0.8.19+commit.7dd6d404.Linux.g++`.
fn parse_version(output: &str) -> Option<String> {
    output
        .lines()
        .find_map(|line| line.trim().strip_prefix("Version:"))
        .map(|rest| rest.trim())
        .map(|version| version.split(['+', '-']).next().unwrap_or(version).to_string())
}

fn standard_input(
    compiler: &CompilerConfig,
    sources: &BTreeMap<String, String>,
    remappings: &[String],
) -> Value {
    let sources: serde_json::Map<String, Value> = sources
        .iter()
        .map(|(name, content)| (name.clone(), json!({ "content": content })))
        .collect();

    let mut settings = json!({
        "optimizer": {
            "enabled": compiler.settings.optimizer.enabled,
            "runs": compiler.settings.optimizer.runs,
        },
        "remappings": remappings,
        "outputSelection": {
            "*": { "*": ["abi", "evm.bytecode.object"] }
        }
    });

    if let Some(evm_version) = &compiler.settings.evm_version {
        settings["evmVersion"] = Value::String(evm_version.clone());
    }

    json!({
        "language": "Solidity",
        "sources": sources,
        "settings": settings,
    })
}

#[derive(Deserialize)]
struct SolcOutput {
    #[serde(default)]
    errors: Vec<SolcError>,
    #[serde(default)]
    contracts: BTreeMap<String, BTreeMap<String, SolcContract>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SolcError {
    severity: Severity,
    message: String,
    formatted_message: Option<String>,
    source_location: Option<SourceLocation>,
}

#[derive(Deserialize)]
struct SourceLocation {
    file: String,
    start: i64,
    end: i64,
}

#[derive(Deserialize)]
struct SolcContract {
    #[serde(default)]
    abi: Value,
    evm: Option<SolcEvm>,
}

#[derive(Deserialize)]
struct SolcEvm {
    bytecode: Option<SolcBytecode>,
}

#[derive(Deserialize)]
struct SolcBytecode {
    #[serde(default)]
    object: String,
}

fn parse_output(stdout: &str) -> Result<ArtifactSet, ToolchainError> {
    let output: SolcOutput = serde_json::from_str(stdout)?;

    let (errors, others): (Vec<_>, Vec<_>) = output
        .errors
        .into_iter()
        .map(|error| Diagnostic {
            severity: error.severity,
            message: error.message,
            location: error
                .source_location
                .map(|loc| format!("{}:{}..{}", loc.file, loc.start, loc.end)),
            formatted: error.formatted_message,
        })
        .partition(|diagnostic| diagnostic.severity == Severity::Error);

    for diagnostic in &others {
        tracing::warn!("{}", diagnostic);
    }

    if !errors.is_empty() {
        return Err(ToolchainError::Diagnostics(errors));
    }

    let mut artifacts = ArtifactSet::new();
    let mut unlinked = Vec::new();

    for (source, contracts) in output.contracts {
        for (name, contract) in contracts {
            let object = contract
                .evm
                .and_then(|evm| evm.bytecode)
                .map(|bytecode| bytecode.object)
                .unwrap_or_default();

            let Ok(bytecode) = hex::decode(object.trim_start_matches("0x")) else {
                unlinked.push(Diagnostic {
                    severity: Severity::Error,
                    message: format!("bytecode of {name} contains unlinked library references"),
                    location: Some(source.clone()),
                    formatted: None,
                });
                continue;
            };

            artifacts.insert(Artifact {
                source: source.clone(),
                name,
                abi: contract.abi,
                bytecode,
            });
        }
    }

    if !unlinked.is_empty() {
        return Err(ToolchainError::Diagnostics(unlinked));
    }

    Ok(artifacts)
}
