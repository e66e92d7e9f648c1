//! tracklet - record and deliver analytics events from the command line
//!
//! Events are buffered in a local SQLite database and delivered to the
//! configured collection endpoint, so `record` works offline and a later
//! `flush` catches up.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/tracklet/events.db (~/.local/share/tracklet/events.db)
//! - Logs: $XDG_STATE_HOME/tracklet/tracklet.log (~/.local/state/tracklet/tracklet.log)
//! - Config: $XDG_CONFIG_HOME/tracklet/config.toml (~/.config/tracklet/config.toml)

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracklet_core::storage::SqliteStorage;
use tracklet_core::{
    AttributeValue, Configuration, DeviceInfo, SendMode, TrackEvent, Tracklet,
};

#[derive(Parser)]
#[command(name = "tracklet")]
#[command(about = "Record and deliver analytics events")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record an event into the local buffer
    Record {
        /// Event name
        name: String,

        /// Event attribute as key=value (repeatable)
        #[arg(short, long = "attr")]
        attrs: Vec<String>,

        /// Deliver the event now instead of waiting for the next flush
        #[arg(long)]
        immediate: bool,
    },

    /// Deliver all buffered events to the endpoint
    Flush,

    /// Show buffered event totals and identity
    Status,
}

/// Parse a `key=value` attribute, picking the narrowest value type.
fn parse_attr(raw: &str) -> Result<(String, AttributeValue)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("invalid attribute '{raw}', expected key=value");
    };
    let value = if let Ok(v) = value.parse::<i64>() {
        AttributeValue::Integer(v)
    } else if let Ok(v) = value.parse::<f64>() {
        AttributeValue::Number(v)
    } else if let Ok(v) = value.parse::<bool>() {
        AttributeValue::Bool(v)
    } else {
        AttributeValue::String(value.to_string())
    };
    Ok((key.to_string(), value))
}

fn open_sdk() -> Result<Tracklet> {
    let mut config = Configuration::load().with_context(|| {
        format!(
            "failed to load configuration from {}",
            Configuration::config_path().display()
        )
    })?;
    // The CLI always buffers locally; delivery happens on flush.
    config.send_mode = SendMode::Batch;

    let db_path = Configuration::data_dir().join("events.db");
    let storage = SqliteStorage::open(&db_path)
        .with_context(|| format!("failed to open event database at {}", db_path.display()))?;
    Tracklet::new(config, DeviceInfo::detect(), Box::new(storage))
        .context("failed to create SDK instance")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Configuration::load();
    let _log_guard = match &config {
        Ok(config) => Some(
            tracklet_core::logging::init(&config.logging)
                .context("failed to initialize logging")?,
        ),
        Err(_) => None,
    };

    match args.command {
        Command::Record {
            name,
            attrs,
            immediate,
        } => {
            let sdk = open_sdk()?;
            sdk.init();
            let mut event = TrackEvent::new(&name);
            for raw in &attrs {
                let (key, value) = parse_attr(raw)?;
                event = event.attribute(key, value);
            }
            tracing::info!(event_name = %name, immediate, "recording event");
            sdk.record(event);
            if immediate {
                sdk.flush().await;
                println!("Recorded and delivered '{name}'");
            } else {
                println!("Recorded '{name}'");
            }
        }
        Command::Flush => {
            let sdk = open_sdk()?;
            let before = sdk.diagnostics().pending_bytes;
            tracing::info!(pending_bytes = before, "flushing buffered events");
            sdk.flush().await;
            let after = sdk.diagnostics().pending_bytes;
            if after == 0 {
                println!("Delivered {before} buffered byte(s)");
            } else {
                bail!("delivery failed, {after} byte(s) still buffered");
            }
        }
        Command::Status => {
            let sdk = open_sdk()?;
            let diagnostics = sdk.diagnostics();
            println!("{}", serde_json::to_string_pretty(&diagnostics)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_attr_types() {
        assert_eq!(
            parse_attr("count=3").unwrap(),
            ("count".to_string(), AttributeValue::Integer(3))
        );
        assert_eq!(
            parse_attr("ratio=0.5").unwrap(),
            ("ratio".to_string(), AttributeValue::Number(0.5))
        );
        assert_eq!(
            parse_attr("enabled=true").unwrap(),
            ("enabled".to_string(), AttributeValue::Bool(true))
        );
        assert_eq!(
            parse_attr("color=red").unwrap(),
            ("color".to_string(), AttributeValue::String("red".to_string()))
        );
        assert!(parse_attr("no-equals").is_err());
    }
}
