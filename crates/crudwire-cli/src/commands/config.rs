//! Config command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use crudwire_core::Config;

use crate::output::{Output, OutputFormat};

/// Keys accepted by `config set`
const KEYS: &str = "server_url, reconnect_delay_ms, connect_timeout_secs, confirm_timeout_secs, \
                    resync_on_connect, optimistic_updates, client_generated_ids, request_ids, log_file";

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&config).context("Failed to encode configuration")?
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.server_url);
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!("  server_url:           {}", config.server_url);
            println!("  reconnect_delay_ms:   {}", config.reconnect_delay_ms);
            println!("  connect_timeout_secs: {}", config.connect_timeout_secs);
            println!("  confirm_timeout_secs: {}", config.confirm_timeout_secs);
            println!("  resync_on_connect:    {}", config.resync_on_connect);
            println!("  optimistic_updates:   {}", config.optimistic_updates);
            println!("  client_generated_ids: {}", config.client_generated_ids);
            println!("  request_ids:          {}", config.request_ids);
            println!(
                "  log_file:             {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    apply(&mut config, &key, &value)?;
    config.validate()?;

    // Save to the CLI-specified path or default
    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}

fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        "server_url" => config.server_url = value.to_string(),
        "reconnect_delay_ms" => config.reconnect_delay_ms = parse_number(key, value)?,
        "connect_timeout_secs" => config.connect_timeout_secs = parse_number(key, value)?,
        "confirm_timeout_secs" => config.confirm_timeout_secs = parse_number(key, value)?,
        "resync_on_connect" => config.resync_on_connect = parse_bool(key, value)?,
        "optimistic_updates" => config.optimistic_updates = parse_bool(key, value)?,
        "client_generated_ids" => config.client_generated_ids = parse_bool(key, value)?,
        "request_ids" => config.request_ids = parse_bool(key, value)?,
        "log_file" => {
            config.log_file = if value.is_empty() || value == "none" {
                None
            } else {
                Some(value.into())
            };
        }
        _ => {
            bail!(
                "Unknown configuration key: '{}'\nValid keys: {}",
                key,
                KEYS
            );
        }
    }
    Ok(())
}

fn parse_number(key: &str, value: &str) -> Result<u64> {
    value
        .parse()
        .with_context(|| format!("Invalid value for {}. Use a whole number.", key))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    value
        .parse()
        .with_context(|| format!("Invalid value for {}. Use 'true' or 'false'.", key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_known_keys() {
        let mut config = Config::default();
        apply(&mut config, "server_url", "wss://admin.example.com/ws").unwrap();
        apply(&mut config, "reconnect_delay_ms", "2500").unwrap();
        apply(&mut config, "optimistic_updates", "true").unwrap();
        apply(&mut config, "log_file", "/tmp/crudwire.log").unwrap();

        assert_eq!(config.server_url, "wss://admin.example.com/ws");
        assert_eq!(config.reconnect_delay_ms, 2500);
        assert!(config.optimistic_updates);
        assert_eq!(config.log_file, Some(PathBuf::from("/tmp/crudwire.log")));

        apply(&mut config, "log_file", "none").unwrap();
        assert!(config.log_file.is_none());
    }

    #[test]
    fn test_apply_rejects_bad_input() {
        let mut config = Config::default();
        assert!(apply(&mut config, "reconnect_delay_ms", "soon").is_err());
        assert!(apply(&mut config, "request_ids", "maybe").is_err());
        let err = apply(&mut config, "colour", "blue").unwrap_err();
        assert!(err.to_string().contains("Valid keys"));
    }

    #[test]
    fn test_set_persists_to_given_path() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        let output = Output::new(OutputFormat::Quiet);

        set(
            "confirm_timeout_secs".to_string(),
            "30".to_string(),
            Some(&path),
            &output,
        )
        .unwrap();

        let saved = std::fs::read_to_string(&path).unwrap();
        assert!(saved.contains("confirm_timeout_secs = 30"));
    }
}
