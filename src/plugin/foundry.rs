//! Interop with Foundry project layouts: library remappings and a generated
//! `foundry.toml`.

use std::collections::BTreeMap;
use std::fs;

use anyhow::Context;
use camino::Utf8PathBuf;
use serde::Serialize;
use serde_json::json;

use crate::config::{ConfigFragment, ProjectConfig, ResolvedConfig};
use crate::engine::TaskDefinition;
use crate::plugin::PluginDescriptor;
use crate::toolchain::project_remappings;

pub const NAME: &str = "foundry";

pub fn defaults() -> ConfigFragment {
    ConfigFragment::new()
        .set("foundry.config", "foundry.toml")
        .set("foundry.libs", json!(["lib"]))
        .set("foundry.out", "out")
        .set("toolchain.remappingsFile", "remappings.txt")
}

pub fn foundry() -> PluginDescriptor {
    PluginDescriptor::new(NAME)
        .fragment(defaults())
        .task(remappings())
        .task(init())
}

fn remappings() -> TaskDefinition {
    TaskDefinition::build("foundry:remappings")
        .describe("Lists the import remappings of the installed libraries")
        .run(|ctx, _| {
            let project = ProjectConfig::from_resolved(ctx.config)?;

            // Same list the compiler receives.
            let remappings = project_remappings(ctx.config, &project.paths)?;
            for remapping in &remappings {
                tracing::info!("{}", remapping);
            }

            Ok(remappings)
        })
}

fn init() -> TaskDefinition {
    TaskDefinition::build("init-foundry")
        .describe("Initializes a foundry.toml next to the project")
        .run(|ctx, _| {
            let project = ProjectConfig::from_resolved(ctx.config)?;
            let name = ctx
                .config
                .get_as::<Utf8PathBuf>("foundry.config")?
                .unwrap_or_else(|| "foundry.toml".into());
            let path = project.paths.resolve(&name);

            if path.exists() {
                tracing::warn!("{} already exists, leaving it untouched", path);
                return Ok(None);
            }

            let contents = render_foundry_toml(ctx.config, &project)?;
            fs::write(&path, contents).with_context(|| format!("couldn't write {path}"))?;
            tracing::info!("Created {}", path);

            Ok(Some(path))
        })
}

#[derive(Serialize)]
struct FoundryToml {
    profile: BTreeMap<&'static str, Profile>,
}

#[derive(Serialize)]
struct Profile {
    src: Utf8PathBuf,
    out: Utf8PathBuf,
    libs: Vec<Utf8PathBuf>,
    test: Utf8PathBuf,
    cache_path: Utf8PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    solc_version: Option<String>,
}

fn render_foundry_toml(config: &ResolvedConfig, project: &ProjectConfig) -> anyhow::Result<String> {
    let profile = Profile {
        src: project.paths.sources.clone(),
        out: config.get_as("foundry.out")?.unwrap_or_else(|| "out".into()),
        libs: config.get_as("foundry.libs")?.unwrap_or_default(),
        test: project.paths.tests.clone(),
        cache_path: "cache_forge".into(),
        solc_version: project.solidity.primary().map(|compiler| compiler.version),
    };

    let file = FoundryToml {
        profile: BTreeMap::from([("default", profile)]),
    };

    Ok(toml::to_string(&file)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8Path;
    use crate::config::resolve;
    use crate::engine::{RunOptions, Runner, TaskGraphBuilder};

    fn config(root: &Utf8Path, user: ConfigFragment) -> ResolvedConfig {
        let user = user.set("solidity", "0.8.19").set("paths.root", root.as_str());
        resolve(&[(foundry().contributor(), defaults())], &user).unwrap()
    }

    fn run_with(root: &Utf8Path, target: &str, user: ConfigFragment) -> crate::engine::RunOutput {
        let mut builder = TaskGraphBuilder::new();
        builder.add_tasks(foundry().task_definitions().iter().cloned());
        let graph = builder.build().unwrap();

        Runner::new(RunOptions::default().with_jobs(1))
            .run(&graph, target, &config(root, user))
            .unwrap()
    }

    fn run(root: &Utf8Path, target: &str) -> crate::engine::RunOutput {
        run_with(root, target, ConfigFragment::new())
    }

    #[test]
    fn test_remappings_task() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        fs::create_dir_all(root.join("lib/forge-std")).unwrap();

        let output = run(root, "foundry:remappings");
        assert_eq!(
            output.get::<Vec<String>>(),
            Some(&vec!["forge-std/=lib/forge-std/src/".to_string()])
        );
    }

    #[test]
    fn test_remappings_task_reads_configured_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        fs::create_dir_all(root.join("lib/forge-std")).unwrap();
        fs::write(root.join("remappings.txt"), "ignored/=nowhere/\n").unwrap();
        fs::write(root.join("deps.txt"), "solmate/=vendor/solmate/src/\n").unwrap();

        let user = ConfigFragment::new().set("toolchain.remappingsFile", "deps.txt");
        let output = run_with(root, "foundry:remappings", user);
        assert_eq!(
            output.get::<Vec<String>>(),
            Some(&vec![
                "forge-std/=lib/forge-std/src/".to_string(),
                "solmate/=vendor/solmate/src/".to_string(),
            ])
        );
    }

    #[test]
    fn test_init_writes_once() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();

        let output = run(root, "init-foundry");
        assert_eq!(
            output.get::<Option<Utf8PathBuf>>(),
            Some(&Some(root.join("foundry.toml")))
        );

        let written: toml::Table = toml::from_str(&fs::read_to_string(root.join("foundry.toml")).unwrap()).unwrap();
        let profile = &written["profile"]["default"];
        assert_eq!(profile["src"].as_str(), Some("contracts"));
        assert_eq!(profile["out"].as_str(), Some("out"));
        assert_eq!(profile["solc_version"].as_str(), Some("0.8.19"));

        let again = run(root, "init-foundry");
        assert_eq!(again.get::<Option<Utf8PathBuf>>(), Some(&None));
    }
}
