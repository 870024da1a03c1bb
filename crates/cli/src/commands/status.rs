//! `tabwise status`: show configuration and host status.

use std::path::Path;

use tabwise_config::AppConfig;
use tabwise_core::{HardwareDescriptor, ResourceTelemetry};
use tabwise_providers::{HostHardware, HostTelemetry};

use super::runtime;

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = runtime::load_config(config_path)?;
    let hardware = HostHardware::detect(config.resources.total_memory_gb_override);
    let memory = HostTelemetry::new(&config.resources).current_status();

    println!("🧭 Tabwise Status");
    println!("================");
    println!("  Config dir:   {}", AppConfig::config_dir().display());
    println!("  Data dir:     {}", config.data_dir().display());
    println!("  Model:        {}", config.model.name);
    println!("  Temperature:  {}", config.model.temperature);
    println!("  Profile:      {}", config.runtime.profile);
    println!("  Host:         {} ({:.1} GB)", hardware.arch(), hardware.total_memory_gb());
    println!(
        "  Memory:       {:.1} / {:.1} GB available ({})",
        memory.available_gb, memory.total_gb, memory.pressure_level
    );
    println!(
        "  Conversation: {} messages, {} tokens, last {} sent",
        config.conversation.max_messages,
        config.conversation.max_session_tokens,
        config.conversation.history_window
    );
    println!(
        "  Page context: {}",
        if config.privacy.allow_page_context { "allowed" } else { "disabled" }
    );

    match runtime::engine_parts(&config) {
        Ok(parts) => {
            let size_mb = parts.engine.download_info().size_bytes as f64 / 1_048_576.0;
            let cached = if parts.engine.is_ready().await { "cached" } else { "not downloaded" };
            println!("  Engine:       {} (model {cached}, {size_mb:.0} MB)", parts.engine.name());
        }
        Err(e) => println!("  Engine:       unavailable ({e})"),
    }

    let config_file = runtime::config_path(config_path);
    if config_file.exists() {
        println!("\n  ✅ Config file found");
    } else {
        println!("\n  ⚠️  No config file at {}; using defaults", config_file.display());
    }

    Ok(())
}
