use std::path::PathBuf;

use clap::Parser;

use crate::config::{ConfigInputs, DEFAULT_CONFIG_FILE};

#[derive(Parser, Debug)]
#[command(name = "dqd")]
#[command(about = "Pull messages from queues and dispatch them to handlers")]
pub struct Cli {
    /// Config file to merge (repeatable). A missing default file is ignored.
    #[arg(short, long = "config", default_value = DEFAULT_CONFIG_FILE)]
    pub config: Vec<PathBuf>,

    /// Directory whose *.yaml / *.yml files are merged first (repeatable)
    #[arg(long = "config-dir", default_values = ["/etc/dqd", "/dqd/config"])]
    pub config_dir: Vec<PathBuf>,

    /// Override a config value, e.g. --set pipes.default.rate.fixed=4
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub set: Vec<String>,
}

impl Cli {
    pub fn into_inputs(self) -> ConfigInputs {
        ConfigInputs {
            dirs: self.config_dir,
            files: self.config,
            overrides: self.set,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let inputs = Cli::parse_from(["dqd"]).into_inputs();
        assert_eq!(inputs.files, vec![PathBuf::from(DEFAULT_CONFIG_FILE)]);
        assert_eq!(
            inputs.dirs,
            vec![PathBuf::from("/etc/dqd"), PathBuf::from("/dqd/config")]
        );
        assert!(inputs.overrides.is_empty());
    }

    #[test]
    fn test_repeatable_flags() {
        let inputs = Cli::parse_from([
            "dqd",
            "-c",
            "a.yaml",
            "--config",
            "b.yaml",
            "--config-dir",
            "/conf",
            "--set",
            "logLevel=debug",
            "--set",
            "metricsPort=9000",
        ])
        .into_inputs();

        assert_eq!(
            inputs.files,
            vec![PathBuf::from("a.yaml"), PathBuf::from("b.yaml")]
        );
        assert_eq!(inputs.dirs, vec![PathBuf::from("/conf")]);
        assert_eq!(inputs.overrides, vec!["logLevel=debug", "metricsPort=9000"]);
    }

    #[test]
    fn test_cli_is_well_formed() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
