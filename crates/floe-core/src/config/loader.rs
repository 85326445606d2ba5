//! Multi-file configuration loading.

use std::path::Path;

use indexmap::IndexMap;

use crate::config::{ConfigPath, interpolate, is_yaml_file};
use crate::error::ConfigError;

/// Trait for configs that can be merged from multiple files.
///
/// Components (units) are keyed and must be unique across files; the
/// remaining sections are merged by [`Mergeable::merge_settings`].
pub trait Mergeable: Sized + Default {
    type Key: Eq + std::hash::Hash + Clone + std::fmt::Display;
    type Component;

    fn components(&self) -> &IndexMap<Self::Key, Self::Component>;
    fn components_mut(&mut self) -> &mut IndexMap<Self::Key, Self::Component>;

    /// Fold the non-component sections of `other` into `self`.
    fn merge_settings(&mut self, other: Self);

    fn parse_yaml(contents: &str) -> Result<Self, ConfigError>;

    fn merge(&mut self, mut other: Self) -> Result<(), ConfigError> {
        let duplicates: Vec<String> = other
            .components()
            .keys()
            .filter(|key| self.components().contains_key(*key))
            .map(|key| key.to_string())
            .collect();

        if !duplicates.is_empty() {
            return Err(ConfigError::DuplicateComponents { keys: duplicates });
        }

        for (key, component) in other.components_mut().drain(..) {
            self.components_mut().insert(key, component);
        }

        self.merge_settings(other);
        Ok(())
    }
}

/// Load and merge every configuration source, collecting all errors.
pub fn load_from_paths<C: Mergeable>(paths: &[ConfigPath]) -> Result<C, ConfigError> {
    let mut config = C::default();
    let mut errors = Vec::new();

    for path in paths {
        let (display, loaded) = match path {
            ConfigPath::File(file_path) => (file_path.display(), load_file::<C>(file_path)),
            ConfigPath::Dir(dir_path) => (dir_path.display(), load_dir::<C>(dir_path)),
        };
        match loaded.and_then(|partial| config.merge(partial)) {
            Ok(()) => {}
            Err(e) => errors.push(format!("{display}: {e}")),
        }
    }

    if !errors.is_empty() {
        return Err(ConfigError::MultipleErrors { errors });
    }
    Ok(config)
}

/// Read, interpolate and parse a single YAML file.
pub fn load_file<C: Mergeable>(path: &Path) -> Result<C, ConfigError> {
    if !is_yaml_file(path) {
        return Err(ConfigError::UnsupportedFormat {
            path: path.to_path_buf(),
        });
    }

    let contents =
        std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile { source })?;

    let result = interpolate(&contents);
    if !result.is_ok() {
        return Err(ConfigError::EnvInterpolation {
            message: result.errors.join("\n"),
        });
    }

    C::parse_yaml(&result.text)
}

fn load_dir<C: Mergeable>(dir: &Path) -> Result<C, ConfigError> {
    let mut config = C::default();
    let mut errors = Vec::new();

    let mut files: Vec<_> = std::fs::read_dir(dir)
        .map_err(|source| ConfigError::ReadDir {
            path: dir.to_path_buf(),
            source,
        })?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_yaml_file(path))
        .collect();

    // Deterministic merge order
    files.sort();

    for path in files {
        if let Err(e) = load_file::<C>(&path).and_then(|partial| config.merge(partial)) {
            errors.push(format!("{}: {}", path.display(), e));
        }
    }

    if !errors.is_empty() {
        return Err(ConfigError::MultipleErrors { errors });
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Debug, Default, Deserialize)]
    struct TestConfig {
        #[serde(default)]
        units: IndexMap<String, u32>,
        #[serde(default)]
        label: Option<String>,
    }

    impl Mergeable for TestConfig {
        type Key = String;
        type Component = u32;

        fn components(&self) -> &IndexMap<String, u32> {
            &self.units
        }

        fn components_mut(&mut self) -> &mut IndexMap<String, u32> {
            &mut self.units
        }

        fn merge_settings(&mut self, other: Self) {
            if other.label.is_some() {
                self.label = other.label;
            }
        }

        fn parse_yaml(contents: &str) -> Result<Self, ConfigError> {
            serde_yaml::from_str(contents).map_err(|source| ConfigError::YamlParse { source })
        }
    }

    fn write(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_merges_directory_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b.yaml", "units: {b: 2}\nlabel: second");
        write(dir.path(), "a.yml", "units: {a: 1}\nlabel: first");
        write(dir.path(), "notes.txt", "ignored");

        let config: TestConfig = load_from_paths(&[ConfigPath::dir(dir.path())]).unwrap();
        assert_eq!(config.units.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(config.label.as_deref(), Some("second"));
    }

    #[test]
    fn test_duplicate_units_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "a.yaml", "units: {jobs: 1}");
        let b = write(dir.path(), "b.yaml", "units: {jobs: 2}");

        let err = load_from_paths::<TestConfig>(&[ConfigPath::file(a), ConfigPath::file(b)])
            .unwrap_err();
        assert!(err.to_string().contains("Duplicate unit keys: jobs"));
    }

    #[test]
    fn test_non_yaml_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "units.toml", "");
        let err = load_from_paths::<TestConfig>(&[ConfigPath::file(path)]).unwrap_err();
        assert!(err.to_string().contains("only .yaml/.yml supported"));
    }
}
