//! `tabwise doctor`: diagnose whether this machine can run the assistant.

use std::path::Path;

use tabwise_config::AppConfig;
use tabwise_core::{HardwareDescriptor, PressureLevel, PrivacyManager, ResourceTelemetry};
use tabwise_providers::{HostHardware, HostTelemetry, LocalPrivacyManager};

use super::runtime;

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 Tabwise Doctor: System Diagnostics");
    println!("=====================================\n");

    let mut issues = 0;

    // Check config
    let config_file = runtime::config_path(config_path);
    let config = match runtime::load_config(config_path) {
        Ok(config) if config_file.exists() => {
            println!("  ✅ Config file valid");
            config
        }
        Ok(config) => {
            match write_starter_config(&config_file) {
                Ok(()) => println!("  ✅ Wrote starter config to {}", config_file.display()),
                Err(e) => {
                    println!("  ⚠️  No config file and could not create one: {e}");
                    issues += 1;
                }
            }
            config
        }
        Err(e) => {
            println!("  ❌ {e}");
            issues += 1;
            AppConfig::default()
        }
    };

    // Check hardware
    let hardware = HostHardware::detect(config.resources.total_memory_gb_override);
    let profile = config.runtime.profile;
    if hardware.supports_profile(profile) {
        println!("  ✅ Host ({}) supports the {profile} profile", hardware.arch());
    } else {
        println!(
            "  ❌ Host ({}) cannot run the {profile} profile; set runtime.profile = \"cpu\"",
            hardware.arch()
        );
        issues += 1;
    }

    let installed = hardware.total_memory_gb();
    let required = config.runtime.min_system_memory_gb;
    if installed >= required {
        println!("  ✅ {installed:.1} GB installed (need {required:.1} GB)");
    } else {
        println!("  ❌ Only {installed:.1} GB installed; at least {required:.1} GB is required");
        issues += 1;
    }

    // Check live memory
    let telemetry = HostTelemetry::new(&config.resources);
    let assessment = telemetry.assess();
    let memory = assessment.status;
    match (assessment.safe_to_run, memory.pressure_level) {
        (true, PressureLevel::Normal) => {
            println!("  ✅ Memory pressure normal ({:.1} GB free)", memory.available_gb)
        }
        (true, level) => {
            println!("  ⚠️  Memory pressure {level} ({:.1} GB free)", memory.available_gb)
        }
        (false, level) => {
            println!(
                "  ❌ Not enough free memory to run inference ({level}, {:.1} GB free)",
                memory.available_gb
            );
            issues += 1;
        }
    }

    // Check the data directory
    let privacy = LocalPrivacyManager::new(config.data_dir(), config.privacy.allow_page_context);
    match privacy.initialize().await {
        Ok(()) => println!("  ✅ Data directory ready: {}", privacy.data_dir().display()),
        Err(e) => {
            println!("  ❌ Data directory unusable: {e}");
            issues += 1;
        }
    }

    // Check the engine and model
    match runtime::engine_parts(&config) {
        Ok(parts) => {
            if parts.engine.is_ready().await {
                println!("  ✅ Model {} is downloaded", config.model.name);
            } else {
                println!(
                    "  ⚠️  Model {} is not downloaded yet; the first chat will fetch it",
                    config.model.name
                );
            }
        }
        Err(e) => {
            println!("  ❌ {e}");
            issues += 1;
        }
    }

    // Summary
    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}

fn write_starter_config(path: &Path) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, AppConfig::default_toml())
}
