//! The wsingest binary.
//!
//! Connects a WebSocket input to a sink that prints every received metric as line protocol to
//! standard output. The input either dials a WebSocket server or accepts a single peer, depending
//! on the configuration:
//!
//! ```text
//! wsingest run --url ws://localhost:3210/telegraf
//! wsingest run --service-address :3210 --path /watch --data-format json
//! ```
//!
//! Configuration is read from `config.yml` in the folder passed with `--config` (default
//! `.wsingest`). Use `wsingest config init` to write a commented sample.

mod cli;
mod cliapp;
mod setup;
mod sink;

use std::process;

pub fn main() {
    let exit_code = match cli::execute() {
        Ok(()) => 0,
        Err(err) => {
            wsingest_log::ensure_error(&err);
            1
        }
    };

    process::exit(exit_code);
}
