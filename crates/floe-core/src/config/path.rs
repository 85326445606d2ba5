//! Configuration path types and command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// A configuration source - either a single file or a directory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigPath {
    /// A single configuration file.
    File(PathBuf),
    /// A directory containing configuration files.
    Dir(PathBuf),
}

impl ConfigPath {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    pub fn dir(path: impl Into<PathBuf>) -> Self {
        Self::Dir(path.into())
    }

    /// Files first, then directories, preserving order within each group.
    pub fn from_cli_args(config_files: &[PathBuf], config_dirs: &[PathBuf]) -> Vec<Self> {
        config_files
            .iter()
            .map(ConfigPath::file)
            .chain(config_dirs.iter().map(ConfigPath::dir))
            .collect()
    }
}

/// Check if a path has a YAML extension.
pub fn is_yaml_file(path: &std::path::Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext == "yaml" || ext == "yml")
        .unwrap_or(false)
}

#[derive(Parser, Debug)]
#[command(version, about = "Load extracted JSON documents into warehouse tables")]
pub struct CliArgs {
    /// Path to configuration file (can be specified multiple times)
    #[arg(short, long)]
    pub config: Vec<PathBuf>,

    /// Path to configuration directory (can be specified multiple times)
    #[arg(short = 'C', long = "config-dir")]
    pub config_dirs: Vec<PathBuf>,

    /// Only run the named unit(s); runs every configured unit when omitted
    #[arg(short, long = "unit")]
    pub units: Vec<String>,

    /// Deployment environment, overrides `global.environment`
    #[arg(long, env = "FLOE_ENVIRONMENT")]
    pub environment: Option<String>,
}

impl CliArgs {
    /// Convert CLI arguments to configuration paths.
    pub fn config_paths(&self) -> Vec<ConfigPath> {
        ConfigPath::from_cli_args(&self.config, &self.config_dirs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_is_yaml_file() {
        assert!(is_yaml_file(Path::new("units.yaml")));
        assert!(is_yaml_file(Path::new("units.yml")));
        assert!(!is_yaml_file(Path::new("units.toml")));
        assert!(!is_yaml_file(Path::new("README")));
    }

    #[test]
    fn test_files_precede_dirs() {
        let paths = ConfigPath::from_cli_args(
            &[PathBuf::from("a.yaml")],
            &[PathBuf::from("conf.d"), PathBuf::from("more.d")],
        );
        assert_eq!(
            paths,
            vec![
                ConfigPath::file("a.yaml"),
                ConfigPath::dir("conf.d"),
                ConfigPath::dir("more.d"),
            ]
        );
    }

    #[test]
    fn test_cli_parses_units() {
        let args = CliArgs::parse_from(["floe", "-c", "units.yaml", "--unit", "jobs", "-u", "invoices"]);
        assert_eq!(args.config, vec![PathBuf::from("units.yaml")]);
        assert_eq!(args.units, vec!["jobs".to_string(), "invoices".to_string()]);
    }
}
