//! Devfile model, parsing and validation.
//!
//! This module maps the devfile YAML onto typed structs, resolves
//! variables and provides the lookups the reconcilers and command
//! handlers need (default commands, events, endpoints, image components).

mod commands;
mod parser;
mod spec;
mod validator;

pub use commands::is_debug_port;
pub use parser::{find_devfile, parse_var_flags, DevfileParser, DEVFILE_NAMES};
pub use spec::{
    ApplyCommand, Command, CommandGroup, CommandGroupKind, CommandKind, Component, ComponentKind,
    CompositeCommand, ContainerComponent, DevfileObj, Dockerfile, Endpoint, EnvVar, Events, ExecCommand,
    Exposure, ImageComponent, KubernetesComponent, Metadata, VolumeComponent, VolumeMount,
    DEFAULT_SOURCE_MAPPING,
};
pub use validator::{DevfileValidator, ValidationError, ValidationResult};

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::Result;

/// Parses and validates the devfile at `path`.
///
/// # Errors
///
/// Returns an error if the devfile cannot be parsed or is invalid.
pub fn parse_and_validate(path: &Path, variables: BTreeMap<String, String>) -> Result<DevfileObj> {
    let devfile = DevfileParser::new().with_variables(variables).load_file(path)?;
    DevfileValidator::new().validate(&devfile)?;
    Ok(devfile)
}
