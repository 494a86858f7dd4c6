use clap::Parser;
use piggy_env::cli::{Cli, Command};
use piggy_env::error::AgentError;
use piggy_env::settings::AgentSettings;
use piggy_env::{env, exec, install, logging, proxy, standalone};
use std::collections::BTreeMap;
use std::process::exit;
use tracing::{debug, error, warn};

fn main() {
    let cli = Cli::parse();
    let settings = AgentSettings::resolve(&cli);
    logging::init(settings.debug);

    if let Some(Command::Install { destination }) = &cli.command {
        if let Err(err) = install::install(destination) {
            error!("failed to install: {err}");
            exit(1);
        }
        return;
    }

    if let Err(err) = run(&cli, &settings) {
        error!("{err}");
        exit(1);
    }
}

/// The wrapper flow: fetch secrets, substitute placeholders, exec the user
/// command. Returning from this function means the exec did not happen.
fn run(cli: &Cli, settings: &AgentSettings) -> Result<(), AgentError> {
    if cli.user_command.is_empty() {
        return Err(AgentError::MissingCommand);
    }
    if let Some(delay) = settings.initial_delay {
        debug!(?delay, "sleeping before fetching secrets");
        std::thread::sleep(delay);
    }

    let os_env = env::collect_os_env();
    let secrets = match fetch_secrets(cli, settings) {
        Ok(secrets) => secrets,
        Err(err) if settings.ignore_no_env => {
            warn!("continuing without secrets: {err}");
            BTreeMap::new()
        }
        Err(err) => return Err(err),
    };

    let sanitized = env::substitute(&os_env, &secrets);
    if !settings.ignore_no_env {
        if let Some(name) = sanitized.unresolved().first() {
            return Err(AgentError::UnresolvedReference(name.to_string()));
        }
    }

    debug!(command = %cli.user_command.join(" "), "spawning process");
    Err(exec::exec_user_command(&cli.user_command, &sanitized))
}

fn fetch_secrets(
    cli: &Cli,
    settings: &AgentSettings,
) -> Result<BTreeMap<String, String>, AgentError> {
    if settings.standalone {
        debug!("running in standalone mode");
        standalone::fetch_secrets()
    } else {
        debug!("running in lookup mode");
        let proxy_settings = proxy::ProxySettings::from_env(settings.retries);
        proxy::request_secrets(&proxy_settings, &proxy::command_signature(&cli.user_command))
    }
}
