use anyhow::Result;
use wsingest_config::{Config, InputMode};

/// Validates that the config describes a usable input before anything is started.
pub fn check_config(config: &Config) -> Result<()> {
    config.validate_input()?;
    Ok(())
}

/// Print spawn infos to the log.
pub fn dump_spawn_infos(config: &Config) {
    if config.path().as_os_str().is_empty() {
        wsingest_log::info!("launching wsingest without config folder");
    } else {
        wsingest_log::info!(
            "launching wsingest from config folder {}",
            config.path().display()
        );
    }

    let mode = config.input_mode();
    wsingest_log::info!("  input mode: {mode}");
    match mode {
        InputMode::Client => match config.client_url() {
            Ok(url) => wsingest_log::info!("  url: {url}"),
            Err(_) => wsingest_log::info!("  url: -"),
        },
        InputMode::Server => {
            wsingest_log::info!("  service address: {}", config.input().service_address);
            wsingest_log::info!("  path: {}", config.upgrade_path());
        }
    }
    wsingest_log::info!("  data format: {}", config.data_format());
    wsingest_log::info!("  log level: {}", config.logging().level);
}

/// Initialize the logging system.
pub fn init_logging(config: &Config) {
    wsingest_log::init(config.logging());
}
