use crate::config::generate::generate_starter_config;
use std::fs;
use std::path::{Path, PathBuf};

pub fn init(stdout: bool, path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config_content = generate_starter_config();

    if stdout {
        print!("{}", config_content);
        return Ok(());
    }

    let config_path = match path {
        Some(path) => path,
        None => default_config_path(),
    };

    if let Err(e) = write_config(&config_content, &config_path) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    println!("Config file written to {}", config_path.display());
    Ok(())
}

/// `~/.config/tailship/config.yml`, or `/etc/tailship/config.yml` without a
/// home directory.
fn default_config_path() -> PathBuf {
    match dirs::home_dir() {
        Some(home_dir) => home_dir.join(".config/tailship/config.yml"),
        None => PathBuf::from("/etc/tailship/config.yml"),
    }
}

/// Write `config_content` to `path`. Refuses to replace an existing file.
pub fn write_config(config_content: &str, path: &Path) -> Result<(), String> {
    if path.exists() {
        return Err(format!(
            "Config file already exists at {}. Remove it first or use --stdout to print the config",
            path.display()
        ));
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Cannot create directory {}: {}", parent.display(), e))?;
    }

    fs::write(path, config_content)
        .map_err(|e| format!("Cannot write to {}: {}", path.display(), e))
}

pub fn validate(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path.ok_or("No config file found. Use --config to specify a path.")?;

    println!("Validating config file: {}", path.display());

    match crate::config::load_config(&path) {
        Ok(config) => {
            println!(
                "Config is valid: {} source(s) under {}",
                config.files.len(),
                config.path.display()
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("Config validation failed:\n{}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_config_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/tailship/config.yml");

        write_config("url: x\n", &path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "url: x\n");
    }

    #[test]
    fn test_write_config_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yml");
        fs::write(&path, "original").unwrap();

        let err = write_config("replacement", &path).unwrap_err();
        assert!(err.contains("already exists"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "original");
    }
}
