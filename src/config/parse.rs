use super::types::*;
use crate::config::{expand_env_vars, expand_tilde, ENV_VAR_PATTERN};
use crate::source::seek::Whence;
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let text = fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    parse_config(&text).map_err(|e| match e {
        ConfigError::YamlParse(inner) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), inner),
        )),
        other => other,
    })
}

/// Parse and validate a config document. JSON documents are accepted as well.
pub fn parse_config(text: &str) -> Result<Config, ConfigError> {
    let text = expand_env_vars(text);
    check_unexpanded_vars(&text)?;

    let mut config: Config = serde_yaml::from_str(&text)?;
    config.path = expand_tilde(&config.path);

    validate_config(&config)?;
    Ok(config)
}

fn check_unexpanded_vars(text: &str) -> Result<(), ConfigError> {
    let Ok(re) = Regex::new(ENV_VAR_PATTERN) else {
        return Ok(());
    };
    let mut unexpanded: Vec<String> = re
        .captures_iter(text)
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
        .collect();

    if unexpanded.is_empty() {
        return Ok(());
    }

    unexpanded.sort();
    unexpanded.dedup();
    Err(ConfigError::Validation(format!(
        "environment variables are not set: {}",
        unexpanded.join(", ")
    )))
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    validate_collector(config, &mut errors);
    validate_batching(config, &mut errors);
    validate_sources(config, &mut errors);

    if Whence::from_code(config.first_whence).is_none() {
        errors.push(format!(
            "first_whence must be 0 (file start) or 2 (file end), got {}",
            config.first_whence
        ));
    }
    if Whence::from_code(config.follow_whence).is_none() {
        errors.push(format!(
            "follow_whence must be 0 (file start) or 2 (file end), got {}",
            config.follow_whence
        ));
    }

    if let Some(second) = config.start_second {
        if second > 59 {
            errors.push(format!("start_second must be within 0..=59, got {}", second));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

fn validate_collector(config: &Config, errors: &mut Vec<String>) {
    match reqwest::Url::parse(&config.url) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
        Ok(url) => errors.push(format!(
            "url must use http or https, got scheme '{}'",
            url.scheme()
        )),
        Err(e) => errors.push(format!("url '{}' is invalid: {}", config.url, e)),
    }

    if config.timeout == 0 {
        errors.push("timeout must be at least 1 second".to_string());
    }
}

fn validate_batching(config: &Config, errors: &mut Vec<String>) {
    if config.line_num == 0 {
        errors.push("line_num must be greater than 0".to_string());
    }

    let tuning = &config.tuning;
    if tuning.flush_interval.is_zero() {
        errors.push("tuning.flush_interval must be non-zero".to_string());
    }
    if tuning.report_interval.is_zero() {
        errors.push("tuning.report_interval must be non-zero".to_string());
    }
    if tuning.poll_interval.is_zero() {
        errors.push("tuning.poll_interval must be non-zero".to_string());
    }
    if tuning.line_buffer == 0 {
        errors.push("tuning.line_buffer must be greater than 0".to_string());
    }
}

fn validate_sources(config: &Config, errors: &mut Vec<String>) {
    if config.files.is_empty() {
        errors.push("files must list at least one source".to_string());
    }

    let mut seen = HashSet::new();
    for (i, name) in config.files.iter().enumerate() {
        if name.trim().is_empty() {
            errors.push(format!("files[{}]: source name cannot be empty", i));
            continue;
        }
        if name.contains('/') || name.contains('\\') || name == ".." {
            errors.push(format!(
                "files[{}]: source name '{}' must be a single directory name",
                i, name
            ));
        }
        if !seen.insert(name.as_str()) {
            errors.push(format!("files[{}]: duplicate source '{}'", i, name));
        }
    }
}
