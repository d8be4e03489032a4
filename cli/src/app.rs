//! Turns parsed arguments into manager commands and prints their outcome.

use crate::cli::{Cli, Commands, ConfigAction};
use crate::config::{self, AppConfig};
use crate::config_store::ConfigStore;
use crate::error::{AppError, AppResult};
use crate::logger;
use crate::reporter;
use server::files::read_lines;
use server::service_bus_manager::{
    ServiceBusCommand, ServiceBusError, ServiceBusManager, ServiceBusResponse,
};
use std::io::{self, Write};

/// Capacity of the progress channel between the manager and the printer.
const PROGRESS_CAPACITY: usize = 64;

pub async fn run(cli: Cli) -> AppResult<()> {
    let config = config::load_config()?;
    logger::setup_logger(config.logging(), cli.debug)?;

    let mut store = ConfigStore::load(config.store().path()?)?;

    if let Commands::Config { action } = cli.command {
        let message = apply_config_action(&mut store, action)?;
        println!("{message}");
        return Ok(());
    }

    let connection = match cli.command.connection() {
        Some(argument) => store.resolve_connection(argument)?,
        None => return Err(AppError::InvalidArgument("missing connection string".to_string())),
    };
    let command = build_command(cli.command).await?;
    if let Some(notice) = notice(&command) {
        println!("{notice}");
    }

    let manager = connect(&connection, &config).await?;
    execute(manager, command, io::stdout()).await?;
    Ok(())
}

async fn connect(connection: &str, config: &AppConfig) -> AppResult<ServiceBusManager> {
    log::debug!("Connecting to service bus");
    let manager = ServiceBusManager::connect(
        connection,
        config.bulk().clone(),
        config.output().clone(),
    )
    .await?;
    Ok(manager)
}

/// Applies a `config` subcommand and returns the line to print.
pub fn apply_config_action(store: &mut ConfigStore, action: ConfigAction) -> AppResult<String> {
    match action {
        ConfigAction::List => Ok(store.list()),
        ConfigAction::Update { key, value } => {
            store.update(&key, &value);
            store.save()?;
            Ok(format!("{key} value updated in config"))
        }
        ConfigAction::Remove { key } => {
            store.remove(&key)?;
            store.save()?;
            Ok(format!("{key} removed from config"))
        }
    }
}

/// Builds the manager command for a queue subcommand.
///
/// Argument problems the manager would only find after connecting are
/// reported here instead.
pub async fn build_command(command: Commands) -> AppResult<ServiceBusCommand> {
    let command = match command {
        Commands::Pull { target, n_lines } => ServiceBusCommand::PullMessages {
            queue_name: target.queue,
            dead_letter: target.dlq,
            lines_per_file: usize::try_from(n_lines).map_err(|_| {
                AppError::InvalidArgument(format!("{n_lines} lines per file is too large"))
            })?,
        },
        Commands::Delete { target, all, delay } => ServiceBusCommand::DeleteMessages {
            queue_name: target.queue,
            dead_letter: target.dlq,
            all,
            throttle: delay,
        },
        Commands::Requeue { target, all } => {
            if !target.dlq {
                return Err(AppError::InvalidArgument(
                    "requeue moves messages off the deadletter subqueue, pass --dlq".to_string(),
                ));
            }
            ServiceBusCommand::RequeueMessages {
                queue_name: target.queue,
                dead_letter: true,
                all,
            }
        }
        Commands::Send {
            queue, file, ..
        } => ServiceBusCommand::SendMessages {
            queue_name: queue,
            payloads: read_lines(&file).await?,
        },
        Commands::Tidy {
            target,
            pattern,
            execute,
        } => {
            if pattern.trim().is_empty() {
                return Err(AppError::InvalidArgument(
                    "pattern must be specified, else all messages risk being deleted".to_string(),
                ));
            }
            ServiceBusCommand::TidyMessages {
                queue_name: target.queue,
                dead_letter: target.dlq,
                pattern,
                execute,
            }
        }
        Commands::Config { .. } => {
            return Err(AppError::InvalidArgument(
                "config does not operate on a queue".to_string(),
            ));
        }
    };
    Ok(command)
}

/// Warning printed before a command runs.
pub fn notice(command: &ServiceBusCommand) -> Option<&'static str> {
    match command {
        ServiceBusCommand::TidyMessages { execute: false, .. } => Some(
            "Tidy executing as a dry run. Pass '-x' to action. \
             Every checked message is abandoned, which counts towards its delivery limit",
        ),
        _ => None,
    }
}

/// Runs `command` on `manager`, printing progress and the outcome to `out`.
///
/// A queue that is empty when the command starts is reported as
/// [`AppError::NothingToDo`]; a source that runs dry later is not an error.
pub async fn execute<W>(
    mut manager: ServiceBusManager,
    command: ServiceBusCommand,
    out: W,
) -> AppResult<W>
where
    W: Write + Send + 'static,
{
    let progress = manager.subscribe(PROGRESS_CAPACITY);
    let describe = command.clone();
    let printer = tokio::spawn(reporter::print_progress(progress, out, move |total| {
        reporter::start_line(&describe, total)
    }));

    let response = manager.execute_command(command.clone()).await;
    // Dropping the manager closes the progress channel, which ends the
    // printer even when the command failed before emitting anything.
    drop(manager);

    let mut out = printer
        .await
        .map_err(|e| AppError::Io(io::Error::other(e.to_string())))??;

    match response {
        ServiceBusResponse::Error {
            error: ServiceBusError::NoMessagesToProcess,
        } => {
            out.flush()?;
            return Err(AppError::NothingToDo(
                reporter::nothing_to_do(&command).to_string(),
            ));
        }
        ServiceBusResponse::Error {
            error: ServiceBusError::QueueEmpty,
        } => writeln!(out, "{}", reporter::nothing_to_do(&command))?,
        ServiceBusResponse::Error { error } => return Err(error.into()),
        response => {
            if let Some(summary) = reporter::summary(&response) {
                writeln!(out, "{summary}")?;
            }
        }
    }
    out.flush()?;
    Ok(out)
}
