//! Config command implementations

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::output::{print_error, print_info, print_success, print_warning};
use dm_core::config::{self, ConfigFile};
use dm_core::fsutil;

fn resolve(config_path: Option<&PathBuf>) -> PathBuf {
    config_path
        .cloned()
        .unwrap_or_else(config::default_config_path)
}

/// Get a config value by key
pub fn config_get(config_path: Option<&PathBuf>, key: &str) -> Result<bool> {
    let path = resolve(config_path);

    if !path.exists() {
        print_error(&format!("Config file not found: {:?}", path));
        print_info("Run 'devmanager config init' to create one");
        return Ok(false);
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let table: toml::Table =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Navigate through the key path (e.g., "update.max_attempts")
    let mut current: &toml::Value = &toml::Value::Table(table);
    for part in key.split('.') {
        match current.as_table().and_then(|t| t.get(part)) {
            Some(v) => current = v,
            None => {
                print_error(&format!("Key not found: {}", key));
                return Ok(false);
            }
        }
    }

    match current {
        toml::Value::String(s) => println!("{}", s),
        toml::Value::Integer(i) => println!("{}", i),
        toml::Value::Float(f) => println!("{}", f),
        toml::Value::Boolean(b) => println!("{}", b),
        toml::Value::Array(a) => {
            for item in a {
                println!("{}", item);
            }
        }
        toml::Value::Table(_) => {
            println!("{}", toml::to_string_pretty(current)?);
        }
        toml::Value::Datetime(d) => println!("{}", d),
    }

    Ok(true)
}

/// Set a config value by key
///
/// The edited file must still load as a configuration; otherwise nothing
/// is written.
pub fn config_set(config_path: Option<&PathBuf>, key: &str, value: &str) -> Result<()> {
    let path = resolve(config_path);

    if !path.exists() {
        print_info("Creating default configuration...");
        config_init(config_path, false)?;
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let mut table: toml::Table =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    let parts: Vec<&str> = key.split('.').collect();
    let (last_key, parents) = parts
        .split_last()
        .filter(|(last, _)| !last.is_empty())
        .ok_or_else(|| anyhow::anyhow!("Invalid key: key path cannot be empty"))?;

    // Navigate/create path to the parent
    let mut current = &mut table;
    for part in parents {
        if !current.contains_key(*part) {
            current.insert(part.to_string(), toml::Value::Table(toml::Table::new()));
        }
        current = current
            .get_mut(*part)
            .and_then(|v| v.as_table_mut())
            .ok_or_else(|| anyhow::anyhow!("Cannot navigate to key: {}", key))?;
    }

    current.insert(last_key.to_string(), parse_value(value));

    let new_content = toml::to_string_pretty(&table)?;
    let parsed: ConfigFile = toml::from_str(&new_content)
        .with_context(|| format!("Invalid value for {}: {}", key, value))?;
    parsed
        .validate()
        .with_context(|| format!("Invalid value for {}: {}", key, value))?;

    fsutil::write_atomic(&path, new_content.as_bytes())
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    print_success(&format!("Set {} = {}", key, value));
    Ok(())
}

/// Interpret a command-line value as the narrowest TOML type
fn parse_value(value: &str) -> toml::Value {
    if value == "true" {
        toml::Value::Boolean(true)
    } else if value == "false" {
        toml::Value::Boolean(false)
    } else if let Ok(i) = value.parse::<i64>() {
        toml::Value::Integer(i)
    } else if let Ok(f) = value.parse::<f64>() {
        toml::Value::Float(f)
    } else {
        toml::Value::String(value.to_string())
    }
}

/// Show current configuration
pub fn config_show(config_path: Option<&PathBuf>) -> Result<()> {
    let path = resolve(config_path);

    if !path.exists() {
        print_warning(&format!("No configuration file found at {:?}", path));
        print_info("Defaults in effect:");
        println!();
        println!("{}", toml::to_string_pretty(&ConfigFile::default())?);
        return Ok(());
    }

    print_info(&format!("Configuration file: {:?}", path));
    println!();

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    println!("{}", content);

    Ok(())
}

/// Initialize default configuration
pub fn config_init(config_path: Option<&PathBuf>, force: bool) -> Result<()> {
    let config_file = resolve(config_path);
    let config_dir = config_file
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(config::default_config_dir);

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create config directory: {:?}", config_dir))?;
        print_success(&format!("Created config directory: {:?}", config_dir));
    }

    if config_file.exists() && !force {
        print_error(&format!("Config file already exists: {:?}", config_file));
        print_info("Use --force to overwrite");
        return Ok(());
    }

    let default_config = generate_default_config()?;
    fsutil::write_atomic(&config_file, default_config.as_bytes())
        .with_context(|| format!("Failed to write config file: {:?}", config_file))?;

    print_success(&format!("Created configuration file: {:?}", config_file));
    Ok(())
}

/// Show the config file path
pub fn config_path(config_path: Option<&PathBuf>) {
    println!("{}", resolve(config_path).display());
}

/// Generate default configuration content
fn generate_default_config() -> Result<String> {
    let body = toml::to_string_pretty(&ConfigFile::default())?;
    Ok(format!(
        "# DevManager Configuration\n\
         # Durations are in seconds. Set GITHUB_TOKEN to authenticate feed requests.\n\n{}",
        body
    ))
}
