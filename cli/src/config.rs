//! CLI configuration, layered with `figment` the way the reference CLI
//! layers its own: built-in defaults, then an optional config file,
//! then environment variables, each overriding the last.

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of stripe-scanner worker threads (spec.md §4.3).
    pub threads: usize,
    /// Print one line per matching rule's tags and metadata, not just
    /// its identifier.
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config { threads: 4, verbose: false }
    }
}

impl Config {
    /// Loads configuration from, in increasing priority: built-in
    /// defaults, `path` if given and present, then `WARDEN_*`
    /// environment variables.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("WARDEN_"));
        figment.extract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_with_no_config_file() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.threads, 4);
        assert!(!config.verbose);
    }
}
