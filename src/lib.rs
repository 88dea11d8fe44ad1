#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

pub mod config;
mod core;
pub mod engine;
mod error;
pub mod plugin;
mod project;
pub mod toolchain;
mod utils;

pub use crate::config::{ConfigFragment, ConfigModel, Contributor, ResolvedConfig};
pub use crate::core::{CancelToken, Hash32, TaskValue};
pub use crate::engine::{
    Diagnostics, Inputs, RunOptions, RunOutput, Runner, TaskContext, TaskDef, TaskDefinition,
    TaskGraph, TaskGraphBuilder, TaskResult,
};
pub use crate::error::*;
pub use crate::plugin::{PluginCatalog, PluginDescriptor, PluginRegistry};
pub use crate::project::{Prepared, Project};
pub use crate::toolchain::{ArtifactSet, SolcToolchain, Toolchain};
pub use crate::utils::as_overhead;

#[cfg(feature = "logging")]
pub use crate::utils::init_logging;
