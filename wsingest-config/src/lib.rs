//! Configuration for the wsingest connector.
//!
//! The configuration is loaded from a folder containing a `config.yml` file. All values have
//! defaults, so a missing folder yields a fully working server mode configuration listening on
//! port 3210. Individual values can be overridden with [`OverridableConfig`], which is populated
//! from command line arguments and `WSINGEST_*` environment variables.
//!
//! ```yaml
//! input:
//!   mode: client
//!   url: ws://localhost:3210/telegraf
//!   data_format: influx
//! logging:
//!   level: debug
//! ```

#![warn(missing_docs)]

mod address;
mod config;
mod overrides;

pub use self::address::*;
pub use self::config::*;
pub use self::overrides::*;
