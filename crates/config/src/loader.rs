use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{
    Error, Result,
    env_subst::substitute_env,
    schema::{CourierConfig, CredentialsConfig},
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "courier.toml",
    "courier.yaml",
    "courier.yml",
    "courier.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<CourierConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&substitute_env(&raw), path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./courier.{toml,yaml,yml,json}` (project-local)
/// 2. `<user config dir>/courier/courier.{toml,yaml,yml,json}`
///
/// Returns `CourierConfig::default()` if no config file is found or the file
/// fails to parse.
pub fn discover_and_load() -> CourierConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    CourierConfig::default()
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
        .or_else(|| {
            let dir = config_dir()?;
            CONFIG_FILENAMES
                .iter()
                .map(|name| dir.join(name))
                .find(|p| p.exists())
        })
}

/// Returns the user-global config directory (`~/.config/courier/` on Linux).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "courier").map(|d| d.config_dir().to_path_buf())
}

/// Returns the user data directory (`~/.local/share/courier/` on Linux).
pub fn data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "courier")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".courier"))
}

/// Where credential cooldowns are persisted.
pub fn cooldown_store_path(credentials: &CredentialsConfig) -> PathBuf {
    credentials
        .store_path
        .clone()
        .unwrap_or_else(|| data_dir().join("credential-cooldowns.json"))
}

/// Parse already env-substituted config text, choosing the format by extension.
pub fn parse_config(raw: &str, path: &Path) -> Result<CourierConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        other => Err(Error::UnsupportedFormat {
            extension: other.to_string(),
        }),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_yaml_and_json() {
        let yaml = "dispatch:\n  collect_debounce_ms: 250\n";
        let cfg = parse_config(yaml, Path::new("courier.yaml")).unwrap();
        assert_eq!(cfg.dispatch.collect_debounce_ms, 250);

        let json = r#"{"runner": {"max_retries": 7}}"#;
        let cfg = parse_config(json, Path::new("courier.json")).unwrap();
        assert_eq!(cfg.runner.max_retries, 7);
    }

    #[test]
    fn rejects_unknown_extension() {
        let err = parse_config("", Path::new("courier.ini")).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat { ref extension } if extension == "ini"));
    }

    #[test]
    fn load_config_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courier.toml");
        std::fs::write(&path, "[delivery]\ntext_limit = 2000\n").unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.delivery.text_limit, 2000);
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = load_config(Path::new("/nonexistent/courier.toml")).unwrap_err();
        assert!(matches!(err, Error::Read { .. }));
    }

    #[test]
    fn cooldown_path_prefers_config() {
        let creds = CredentialsConfig {
            store_path: Some(PathBuf::from("/tmp/cd.json")),
        };
        assert_eq!(cooldown_store_path(&creds), PathBuf::from("/tmp/cd.json"));
        assert!(
            cooldown_store_path(&CredentialsConfig::default())
                .ends_with("credential-cooldowns.json")
        );
    }
}
