//! The general purpose plugin: project layout defaults and the `clean`,
//! `compile` and `test` tasks.

use std::fs;
use std::sync::Arc;

use anyhow::{Context, bail};
use camino::Utf8PathBuf;
use serde_json::json;

use crate::config::{ConfigFragment, ProjectConfig};
use crate::engine::TaskDefinition;
use crate::plugin::PluginDescriptor;
use crate::toolchain::{ArtifactSet, TestReport, Toolchain};

pub const NAME: &str = "toolbox";

/// Compiler version used when the user doesn't pick one.
pub const DEFAULT_SOLIDITY: &str = "0.8.18";

/// Default values for every key the toolbox tasks read.
pub fn defaults() -> ConfigFragment {
    ConfigFragment::new()
        .set("solidity", DEFAULT_SOLIDITY)
        .set("defaultNetwork", "hardhat")
        .set("networks.hardhat", json!({ "chainId": 31337 }))
        .set("networks.localhost", json!({ "url": "http://127.0.0.1:8545" }))
        .set("paths.root", ".")
        .set("paths.sources", "contracts")
        .set("paths.tests", "test")
        .set("paths.cache", "cache")
        .set("paths.artifacts", "artifacts")
        .set("test.command", json!(["npx", "mocha"]))
        .set("test.timeout", 40000)
        .require("solidity")
}

pub fn toolbox(toolchain: Arc<dyn Toolchain>) -> PluginDescriptor {
    PluginDescriptor::new(NAME)
        .fragment(defaults())
        .task(clean())
        .task(compile(toolchain.clone()))
        .task(test(toolchain))
}

fn clean() -> TaskDefinition {
    TaskDefinition::build("clean")
        .describe("Clears the cache and deletes all artifacts")
        .run(|ctx, _| {
            let project = ProjectConfig::from_resolved(ctx.config)?;
            let mut removed: Vec<Utf8PathBuf> = Vec::new();

            for dir in [project.paths.artifacts(), project.paths.cache()] {
                if dir.exists() {
                    fs::remove_dir_all(&dir).with_context(|| format!("couldn't remove {dir}"))?;
                    tracing::info!("Removed {}", dir);
                    removed.push(dir);
                }
            }

            Ok(removed)
        })
}

fn compile(toolchain: Arc<dyn Toolchain>) -> TaskDefinition {
    TaskDefinition::build("compile")
        .describe("Compiles the entire project")
        .run(move |ctx, _| {
            let project = ProjectConfig::from_resolved(ctx.config)?;
            let artifacts = toolchain.compile(ctx.config)?;

            let dir = project.paths.artifacts();
            let written = artifacts
                .write_to(&dir)
                .with_context(|| format!("couldn't write artifacts to {dir}"))?;

            tracing::info!("Compiled {} contract(s) into {}", written.len(), dir);

            Ok(artifacts)
        })
}

fn test(toolchain: Arc<dyn Toolchain>) -> TaskDefinition {
    TaskDefinition::build("test")
        .describe("Runs the project's tests")
        .depends_on(["compile"])
        .run(move |ctx, inputs| {
            let artifacts = inputs.get::<ArtifactSet>("compile")?;
            let report: TestReport = toolchain.test(ctx.config, artifacts)?;

            if !report.success {
                bail!(
                    "tests failed (exit code {}):\n{}{}",
                    report
                        .exit_code
                        .map_or_else(|| "none".to_string(), |code| code.to_string()),
                    report.stdout,
                    report.stderr
                );
            }

            tracing::info!("Tests passed in {:.2?}", report.duration);
            Ok(report)
        })
}
