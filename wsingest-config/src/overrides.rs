use std::env;

/// Configuration values overridden by command line arguments or environment variables.
///
/// All values are kept as raw strings and validated in [`Config::apply_override`], so that errors
/// can name the offending field.
///
/// [`Config::apply_override`]: crate::Config::apply_override
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OverridableConfig {
    /// The operation mode, `client` or `server`.
    pub mode: Option<String>,
    /// The WebSocket URL to dial in client mode.
    pub url: Option<String>,
    /// The address to listen on in server mode.
    pub service_address: Option<String>,
    /// The HTTP path accepting upgrades in server mode.
    pub path: Option<String>,
    /// The data format of incoming messages.
    pub data_format: Option<String>,
    /// The log level.
    pub log_level: Option<String>,
}

impl OverridableConfig {
    /// Reads overrides from `WSINGEST_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads overrides through the given variable lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.is_empty());

        Self {
            mode: var("WSINGEST_MODE"),
            url: var("WSINGEST_URL"),
            service_address: var("WSINGEST_SERVICE_ADDRESS"),
            path: var("WSINGEST_PATH"),
            data_format: var("WSINGEST_DATA_FORMAT"),
            log_level: var("WSINGEST_LOG_LEVEL"),
        }
    }

    /// Combines two sets of overrides, preferring values from `self`.
    pub fn or(self, other: Self) -> Self {
        Self {
            mode: self.mode.or(other.mode),
            url: self.url.or(other.url),
            service_address: self.service_address.or(other.service_address),
            path: self.path.or(other.path),
            data_format: self.data_format.or(other.data_format),
            log_level: self.log_level.or(other.log_level),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_from_lookup() {
        let vars = HashMap::from([
            ("WSINGEST_MODE", "client"),
            ("WSINGEST_URL", "ws://localhost:3210/telegraf"),
            ("WSINGEST_PATH", ""),
        ]);

        let overrides =
            OverridableConfig::from_lookup(|key| vars.get(key).map(|v| (*v).to_owned()));

        assert_eq!(overrides.mode.as_deref(), Some("client"));
        assert_eq!(
            overrides.url.as_deref(),
            Some("ws://localhost:3210/telegraf")
        );
        assert_eq!(overrides.path, None);
        assert_eq!(overrides.data_format, None);
    }

    #[test]
    fn test_or_prefers_self() {
        let cli = OverridableConfig {
            mode: Some("server".to_owned()),
            ..Default::default()
        };
        let env = OverridableConfig {
            mode: Some("client".to_owned()),
            path: Some("/ws".to_owned()),
            ..Default::default()
        };

        let merged = cli.or(env);
        assert_eq!(merged.mode.as_deref(), Some("server"));
        assert_eq!(merged.path.as_deref(), Some("/ws"));
    }
}
