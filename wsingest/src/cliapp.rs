//! This module implements the definition of the command line app.

use clap::builder::ValueParser;
use clap::{Arg, ArgAction, Command};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const ABOUT: &str = "Streams metrics from a WebSocket connection.";

pub fn make_app() -> Command {
    Command::new("wsingest")
        .disable_help_subcommand(true)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .propagate_version(true)
        .max_term_width(79)
        .version(VERSION)
        .about(ABOUT)
        .arg(
            Arg::new("config")
                .value_name("CONFIG")
                .long("config")
                .short('c')
                .global(true)
                .env("WSINGEST_CONFIG")
                .value_parser(ValueParser::path_buf())
                .help("The path to the config folder."),
        )
        .subcommand(
            Command::new("run")
                .about("Run the websocket input")
                .after_help(
                    "This runs the input in the foreground until it's shut down with Ctrl-C or \
                     the connection ends.  Every received metric is printed to stdout in line \
                     protocol.",
                )
                .arg(
                    Arg::new("mode")
                        .long("mode")
                        .value_name("MODE")
                        .value_parser(["client", "server"])
                        .help("Dial a websocket server or accept a single peer."),
                )
                .arg(
                    Arg::new("url")
                        .long("url")
                        .value_name("URL")
                        .help("The websocket URL to dial in client mode."),
                )
                .arg(
                    Arg::new("service_address")
                        .long("service-address")
                        .value_name("ADDRESS")
                        .help("The address to listen on in server mode, e.g. `:3210`."),
                )
                .arg(
                    Arg::new("path")
                        .long("path")
                        .value_name("PATH")
                        .help("The HTTP path accepting the websocket upgrade in server mode."),
                )
                .arg(
                    Arg::new("data_format")
                        .long("data-format")
                        .value_name("FORMAT")
                        .value_parser(["influx", "json"])
                        .help("The format of incoming messages."),
                )
                .arg(
                    Arg::new("log_level")
                        .long("log-level")
                        .value_name("LEVEL")
                        .value_parser(["error", "warn", "info", "debug", "trace"])
                        .help("The log level for wsingest."),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Manage the wsingest config")
                .after_help(
                    "This command provides basic config management.  It can be used to \
                     initialize a new config and to print out the current config.",
                )
                .subcommand_required(true)
                .arg_required_else_help(true)
                .subcommand(
                    Command::new("init")
                        .about("Initialize a new config")
                        .after_help(
                            "This writes a commented sample config.  An existing config is \
                             only replaced when `--overwrite` is passed.",
                        )
                        .arg(
                            Arg::new("overwrite")
                                .long("overwrite")
                                .action(ArgAction::SetTrue)
                                .help("Overwrite an existing config instead of failing."),
                        ),
                )
                .subcommand(
                    Command::new("show")
                        .about("Show the entire config out for debugging purposes")
                        .after_help(
                            "This dumps out the entire config including the values which are \
                             not in the config file but filled in from defaults.",
                        )
                        .arg(
                            Arg::new("format")
                                .short('f')
                                .long("format")
                                .value_parser(["debug", "yaml"])
                                .default_value("yaml")
                                .help("The output format"),
                        ),
                ),
        )
}
