use std::error::Error;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::ArgMatches;
use wsingest_config::{Config, OverridableConfig};
use wsingest_server::WebSocketInput;

use crate::cliapp::make_app;
use crate::setup;
use crate::sink::LineSink;

/// The config folder used when `--config` is not passed.
const DEFAULT_CONFIG_PATH: &str = ".wsingest";

/// Runs the command line application.
pub fn execute() -> Result<()> {
    let app = make_app();
    let matches = app.get_matches();
    let config_path = matches
        .get_one::<PathBuf>("config")
        .map(PathBuf::as_path)
        .unwrap_or(Path::new(DEFAULT_CONFIG_PATH));

    match matches.subcommand() {
        Some(("config", matches)) => manage_config(config_path, matches),
        Some(("run", matches)) => {
            let overrides = extract_config_args(matches).or(OverridableConfig::from_env());
            let mut config = Config::from_path(config_path)?;
            config.apply_override(overrides)?;
            run(config)
        }
        Some((name, _)) => bail!("unknown subcommand `{name}`"),
        None => bail!("no subcommand given"),
    }
}

/// Extracts config overrides from the arguments of the `run` subcommand.
fn extract_config_args(matches: &ArgMatches) -> OverridableConfig {
    let arg = |name: &str| matches.get_one::<String>(name).cloned();

    OverridableConfig {
        mode: arg("mode"),
        url: arg("url"),
        service_address: arg("service_address"),
        path: arg("path"),
        data_format: arg("data_format"),
        log_level: arg("log_level"),
    }
}

fn manage_config(config_path: &Path, matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("init", matches)) => init_config(config_path, matches.get_flag("overwrite")),
        Some(("show", matches)) => {
            let mut config = Config::from_path(config_path)?;
            config.apply_override(OverridableConfig::from_env())?;
            let format = matches.get_one::<String>("format").map(String::as_str);
            show_config(&config, format)
        }
        _ => bail!("unknown config subcommand"),
    }
}

fn init_config(config_path: &Path, overwrite: bool) -> Result<()> {
    if Config::config_exists(config_path) && !overwrite {
        bail!(
            "a config already exists in {}, pass --overwrite to replace it",
            config_path.display()
        );
    }

    let file = Config::init_path(config_path)?;
    writeln!(io::stdout(), "wrote sample config to {}", file.display())?;
    Ok(())
}

fn show_config(config: &Config, format: Option<&str>) -> Result<()> {
    let mut stdout = io::stdout().lock();
    match format {
        Some("debug") => writeln!(stdout, "{config:#?}")?,
        _ => write!(stdout, "{}", config.to_yaml_string()?)?,
    }
    Ok(())
}

/// Runs the input until Ctrl-C or until the connection ends.
pub fn run(config: Config) -> Result<()> {
    setup::init_logging(&config);
    setup::dump_spawn_infos(&config);
    setup::check_config(&config)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("wsingest")
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;

    runtime.block_on(serve(config))
}

async fn serve(config: Config) -> Result<()> {
    let mut input = WebSocketInput::from_config(&config)?;
    input
        .start(Arc::new(LineSink::stdout()))
        .await
        .context("failed to start the websocket input")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => wsingest_log::info!("received ctrl-c, shutting down"),
            Err(error) => wsingest_log::error!(
                error = &error as &dyn Error,
                "failed to listen for ctrl-c, shutting down"
            ),
        },
        _ = input.finished() => wsingest_log::info!("websocket input finished, shutting down"),
    }

    input.stop().await;
    Ok(())
}
