/// Configuration loading from a JSON config file
use crate::config::types::{Config, HostauditError, Result};
use std::path::Path;

/// Load a base [`Config`] from a JSON file. Missing keys take their defaults.
pub fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        HostauditError::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    let config: Config = serde_json::from_str(&content).map_err(|e| {
        HostauditError::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })?;

    log::info!("Loaded configuration from {}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_partial_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"fail_on_count": 5, "disable_scanners": ["suid"], "parallel": false}}"#
        )
        .unwrap();

        let config = load_config_file(file.path()).unwrap();
        assert_eq!(config.fail_on_count, Some(5));
        assert_eq!(config.disable_scanners, vec!["suid".to_string()]);
        assert!(!config.parallel);
        assert_eq!(config.min_severity, "info");
    }

    #[test]
    fn malformed_config_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();

        let err = load_config_file(file.path()).unwrap_err();
        assert!(matches!(err, HostauditError::Config(_)));
    }

    #[test]
    fn missing_config_is_a_config_error() {
        let err = load_config_file(Path::new("/nonexistent/hostaudit.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/hostaudit.json"));
    }
}
