//! Walking devfile commands and events.

use futures::future::{join_all, BoxFuture, FutureExt};
use tracing::{debug, warn};

use crate::devfile::{Command, CommandGroupKind, CommandKind, ComponentKind, DevfileObj};
use crate::error::{AstraError, DevfileError, ExecError, Result};

use super::CommandHandler;

/// Runs `command`, descending into composite commands.
///
/// Children without a group of their own run as the group of the closest
/// composite having one. Sequential composites stop at the first failing
/// child. Parallel ones wait for every child and report all failures
/// together.
fn execute_command<'a>(
    devfile: &'a DevfileObj,
    command: &'a Command,
    handler: &'a dyn CommandHandler,
    parent_group: Option<CommandGroupKind>,
) -> BoxFuture<'a, Result<()>> {
    async move {
        let group = command.group().map(|g| g.kind).or(parent_group);
        match &command.kind {
            CommandKind::Exec(exec) => handler.execute(command, exec, group).await,
            CommandKind::Composite(composite) => {
                let children = composite
                    .commands
                    .iter()
                    .map(|id| {
                        devfile.find_command(id).ok_or_else(|| {
                            AstraError::from(DevfileError::validation(
                                format!("composite command {:?} references unknown command {id:?}", command.id),
                                "commands",
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;

                if !composite.parallel.unwrap_or(false) {
                    for child in children {
                        execute_command(devfile, child, handler, group).await?;
                    }
                    return Ok(());
                }

                let results = join_all(children.iter().map(|child| execute_command(devfile, child, handler, group))).await;
                let failures: Vec<String> = children
                    .iter()
                    .zip(results)
                    .filter_map(|(child, result)| result.err().map(|e| format!("{}: {e}", child.id)))
                    .collect();
                if failures.is_empty() {
                    Ok(())
                } else {
                    Err(ExecError::Composite {
                        command: command.id.clone(),
                        failures,
                    }
                    .into())
                }
            }
            CommandKind::Apply(apply) => {
                let component = devfile.find_component(&apply.component).ok_or_else(|| DevfileError::ComponentNotFound {
                    name: apply.component.clone(),
                })?;
                match &component.kind {
                    ComponentKind::Image(image) => handler.apply_image(&component.name, image).await,
                    ComponentKind::Kubernetes(k) => handler.apply_kubernetes(&component.name, k).await,
                    ComponentKind::Openshift(o) => handler.apply_openshift(&component.name, o).await,
                    ComponentKind::Container(_) | ComponentKind::Volume(_) => Err(ExecError::Unsupported {
                        command: command.id.clone(),
                        reason: format!("component {:?} cannot be applied", component.name),
                    }
                    .into()),
                }
            }
        }
    }
    .boxed()
}

/// Runs the command of group `kind`, by name or the default one.
///
/// With `ignore_missing`, a missing command is not an error.
///
/// # Errors
///
/// Returns an error if the command cannot be resolved or fails.
pub async fn execute_command_by_name_and_kind(
    devfile: &DevfileObj,
    name: Option<&str>,
    kind: CommandGroupKind,
    handler: &dyn CommandHandler,
    ignore_missing: bool,
) -> Result<()> {
    let Some(command) = devfile.get_command(name, kind)? else {
        if ignore_missing {
            debug!("No {} command to run", kind);
            return Ok(());
        }
        return Err(DevfileError::CommandNotFound {
            name: name.map(String::from),
            kind: kind.to_string(),
        }
        .into());
    };
    execute_command(devfile, command, handler, None).await
}

/// Runs a command by id, whatever its group.
///
/// # Errors
///
/// Returns an error if no command has this id, or if it fails.
pub async fn execute_command_by_name(
    devfile: &DevfileObj,
    name: &str,
    handler: &dyn CommandHandler,
) -> Result<()> {
    let command = devfile.find_command(name).ok_or_else(|| {
        DevfileError::validation(format!("no command named {name:?} found in the devfile"), "commands")
    })?;
    execute_command(devfile, command, handler, None).await
}

/// Runs the build command, if any.
///
/// # Errors
///
/// Returns an error if the build command fails.
pub async fn build(devfile: &DevfileObj, name: Option<&str>, handler: &dyn CommandHandler) -> Result<()> {
    execute_command_by_name_and_kind(devfile, name, CommandGroupKind::Build, handler, true).await
}

async fn exec_events(devfile: &DevfileObj, events: &[String], event: &str, handler: &dyn CommandHandler) -> Result<()> {
    for id in events {
        let Some(command) = devfile.find_command(id) else {
            warn!("Unable to find the {} event command {:?}", event, id);
            continue;
        };
        execute_command(devfile, command, handler, None)
            .await
            .map_err(|e| AstraError::internal(format!("unable to execute {event} event {id:?}: {e}")))?;
    }
    Ok(())
}

/// Runs the post-start event commands.
///
/// # Errors
///
/// Returns an error on the first failing event.
pub async fn exec_post_start_events(devfile: &DevfileObj, handler: &dyn CommandHandler) -> Result<()> {
    exec_events(devfile, &devfile.events.post_start, "postStart", handler).await
}

/// Runs the pre-stop event commands.
///
/// # Errors
///
/// Returns an error on the first failing event.
pub async fn exec_pre_stop_events(devfile: &DevfileObj, handler: &dyn CommandHandler) -> Result<()> {
    exec_events(devfile, &devfile.events.pre_stop, "preStop", handler).await
}
