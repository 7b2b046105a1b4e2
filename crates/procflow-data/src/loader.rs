//! File plumbing shared by the loaders: the error type, description
//! formats, file discovery and name lookups.

use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use procflow_core::config::ModelConfig;
use procflow_core::model::ModelError;
use procflow_core::schedule::ScheduleError;

// ===========================================================================
// Errors
// ===========================================================================

#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    /// No `{file}.ron`, `.toml` or `.json` in the directory.
    #[error("{dir}: no {file}.ron, {file}.toml or {file}.json")]
    MissingRequired { file: String, dir: PathBuf },

    #[error("{file}: expected a .ron, .toml or .json extension")]
    UnsupportedFormat { file: PathBuf },

    /// The same description exists in two formats.
    #[error("ambiguous description: both {a} and {b} exist")]
    ConflictingFormats { a: PathBuf, b: PathBuf },

    #[error("{file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    /// Malformed CSV: bad quoting, ragged rows, unreadable file.
    #[error("{file}: {error}")]
    Csv {
        file: PathBuf,
        #[source]
        error: csv::Error,
    },

    /// A well-formed CSV row with unusable content.
    #[error("{file}, line {line}: {detail}")]
    InvalidRow {
        file: PathBuf,
        line: usize,
        detail: String,
    },

    #[error("{file}: schedule '{name}': {error}")]
    Schedule {
        file: PathBuf,
        name: String,
        #[source]
        error: ScheduleError,
    },

    #[error("{file}: no {expected_kind} named '{name}'")]
    UnresolvedRef {
        file: PathBuf,
        name: String,
        expected_kind: &'static str,
    },

    #[error("{file}: '{name}' is defined twice")]
    DuplicateName { file: PathBuf, name: String },

    /// The model builder rejected part of the description.
    #[error("{file}: {error}")]
    Model {
        file: PathBuf,
        #[source]
        error: ModelError,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DataLoadError {
    pub(crate) fn model(file: &Path) -> impl FnOnce(ModelError) -> Self + '_ {
        move |error| DataLoadError::Model {
            file: file.to_path_buf(),
            error,
        }
    }

    pub(crate) fn csv(file: &Path) -> impl FnOnce(csv::Error) -> Self + '_ {
        move |error| DataLoadError::Csv {
            file: file.to_path_buf(),
            error,
        }
    }
}

// ===========================================================================
// Formats
// ===========================================================================

/// Serialization formats accepted for configs and topology descriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

impl Format {
    /// Lookup order used by [`find_data_file`].
    pub const ALL: [Format; 3] = [Format::Ron, Format::Toml, Format::Json];

    pub fn extension(self) -> &'static str {
        match self {
            Format::Ron => "ron",
            Format::Toml => "toml",
            Format::Json => "json",
        }
    }

    /// The format named by the file's extension.
    pub fn from_path(path: &Path) -> Result<Self, DataLoadError> {
        let ext = path.extension().and_then(|e| e.to_str());
        Self::ALL
            .into_iter()
            .find(|f| Some(f.extension()) == ext)
            .ok_or_else(|| DataLoadError::UnsupportedFormat {
                file: path.to_path_buf(),
            })
    }

    /// Deserialize `text`; the error detail is the parser's message.
    pub fn parse<T: DeserializeOwned>(self, text: &str) -> Result<T, String> {
        match self {
            Format::Ron => ron::from_str(text).map_err(|e| e.to_string()),
            Format::Toml => toml::from_str(text).map_err(|e| e.to_string()),
            Format::Json => serde_json::from_str(text).map_err(|e| e.to_string()),
        }
    }
}

/// Shorthand for [`Format::from_path`].
pub fn detect_format(path: &Path) -> Result<Format, DataLoadError> {
    Format::from_path(path)
}

// ===========================================================================
// Discovery and reading
// ===========================================================================

/// The `{stem}.{ext}` file in `dir`, for any supported extension.
///
/// More than one match is an error rather than a silent pick.
pub fn find_data_file(dir: &Path, stem: &str) -> Result<Option<PathBuf>, DataLoadError> {
    let mut matches = Format::ALL
        .into_iter()
        .map(|f| dir.join(format!("{stem}.{}", f.extension())))
        .filter(|p| p.is_file());
    match (matches.next(), matches.next()) {
        (Some(a), Some(b)) => Err(DataLoadError::ConflictingFormats { a, b }),
        (found, _) => Ok(found),
    }
}

/// [`find_data_file`], with absence reported as `MissingRequired`.
pub fn require_data_file(dir: &Path, stem: &str) -> Result<PathBuf, DataLoadError> {
    match find_data_file(dir, stem)? {
        Some(path) => Ok(path),
        None => Err(DataLoadError::MissingRequired {
            file: stem.to_string(),
            dir: dir.to_path_buf(),
        }),
    }
}

/// Read `path` and deserialize it in the format its extension names.
pub fn deserialize_file<T: DeserializeOwned>(path: &Path) -> Result<T, DataLoadError> {
    let format = Format::from_path(path)?;
    let text = std::fs::read_to_string(path)?;
    format.parse(&text).map_err(|detail| DataLoadError::Parse {
        file: path.to_path_buf(),
        detail,
    })
}

/// Run settings; absent fields keep their defaults.
pub fn load_model_config(path: &Path) -> Result<ModelConfig, DataLoadError> {
    deserialize_file(path)
}

// ===========================================================================
// Name lookups
// ===========================================================================

pub fn resolve_name<'a, V>(
    names: &'a HashMap<String, V>,
    name: &str,
    file: &Path,
    expected_kind: &'static str,
) -> Result<&'a V, DataLoadError> {
    names.get(name).ok_or_else(|| DataLoadError::UnresolvedRef {
        file: file.to_path_buf(),
        name: name.to_string(),
        expected_kind,
    })
}

/// Fails if `name` is already taken.
pub fn check_duplicate<V>(
    names: &HashMap<String, V>,
    name: &str,
    file: &Path,
) -> Result<(), DataLoadError> {
    if !names.contains_key(name) {
        return Ok(());
    }
    Err(DataLoadError::DuplicateName {
        file: file.to_path_buf(),
        name: name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use procflow_core::schedule::TimeUnit;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn formats_follow_the_extension() {
        for format in Format::ALL {
            let path = PathBuf::from(format!("run.{}", format.extension()));
            assert_eq!(Format::from_path(&path).unwrap(), format);
        }
        for name in ["run.yaml", "run", "run.RON"] {
            assert!(matches!(
                detect_format(Path::new(name)),
                Err(DataLoadError::UnsupportedFormat { .. })
            ));
        }
    }

    #[test]
    fn parse_reports_parser_detail() {
        let parsed: Vec<u32> = Format::Json.parse("[1, 2]").unwrap();
        assert_eq!(parsed, [1, 2]);
        let detail = Format::Ron.parse::<Vec<u32>>("[1, ").unwrap_err();
        assert!(!detail.is_empty());
    }

    #[test]
    fn discovery_in_a_directory() {
        let dir = TempDir::new().unwrap();
        assert_eq!(find_data_file(dir.path(), "model").unwrap(), None);
        let err = require_data_file(dir.path(), "model").unwrap_err();
        assert!(err.to_string().ends_with("no model.ron, model.toml or model.json"));

        fs::write(dir.path().join("model.toml"), "").unwrap();
        assert_eq!(
            require_data_file(dir.path(), "model").unwrap(),
            dir.path().join("model.toml")
        );

        fs::write(dir.path().join("model.json"), "{}").unwrap();
        match find_data_file(dir.path(), "model") {
            Err(DataLoadError::ConflictingFormats { a, b }) => {
                assert_eq!(a, dir.path().join("model.toml"));
                assert_eq!(b, dir.path().join("model.json"));
            }
            other => panic!("expected a conflict, got {other:?}"),
        }
    }

    #[test]
    fn directories_are_not_description_files() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("model.ron")).unwrap();
        assert_eq!(find_data_file(dir.path(), "model").unwrap(), None);
    }

    #[test]
    fn model_config_in_each_format() {
        let dir = TempDir::new().unwrap();
        let ron_path = dir.path().join("run.ron");
        fs::write(&ron_path, "(duration: 480.0, warm_up: 60.0, seed: 7, time_unit: hours)").unwrap();
        let config = load_model_config(&ron_path).unwrap();
        assert_eq!(config.duration, 480.0);
        assert_eq!(config.warm_up, 60.0);
        assert_eq!(config.seed, 7);
        assert_eq!(config.time_unit, TimeUnit::Hours);
        assert_eq!(config.entity_pool_size, 500);

        let toml_path = dir.path().join("run.toml");
        fs::write(&toml_path, "duration = 100.0\ncollect_entity_type_stats = false\n").unwrap();
        let config = load_model_config(&toml_path).unwrap();
        assert_eq!(config.duration, 100.0);
        assert!(!config.collect_entity_type_stats);

        let json_path = dir.path().join("run.json");
        fs::write(&json_path, r#"{"duration": 50.0, "routing_retry_delay": 2.5}"#).unwrap();
        let config = load_model_config(&json_path).unwrap();
        assert_eq!(config.routing_retry_delay, 2.5);
        assert_eq!(config.retry_log_interval, 100);
    }

    #[test]
    fn parse_errors_name_the_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.json");
        fs::write(&path, "{ not json").unwrap();
        match load_model_config(&path) {
            Err(DataLoadError::Parse { file, .. }) => assert_eq!(file, path),
            other => panic!("expected a parse error, got {other:?}"),
        }
        let missing = dir.path().join("absent.toml");
        assert!(matches!(load_model_config(&missing), Err(DataLoadError::Io(_))));
    }

    #[test]
    fn name_lookups() {
        let names = HashMap::from([("Day".to_string(), 3)]);
        let file = Path::new("model.toml");

        assert_eq!(*resolve_name(&names, "Day", file, "schedule").unwrap(), 3);
        let err = resolve_name(&names, "Night", file, "schedule").unwrap_err();
        assert_eq!(err.to_string(), "model.toml: no schedule named 'Night'");

        assert!(check_duplicate(&names, "Night", file).is_ok());
        let err = check_duplicate(&names, "Day", file).unwrap_err();
        assert_eq!(err.to_string(), "model.toml: 'Day' is defined twice");
    }
}
