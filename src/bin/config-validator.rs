//! # SheetGuard Configuration Validator
//!
//! Command-line tool for validating SheetGuard configuration files across environments.
//! Catches invalid limits and inconsistent resilience settings before a `MutationCore`
//! is ever built from them.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sheetguard_core::config::ConfigManager;
use sheetguard_core::constants::environments;
use sheetguard_core::GuardConfig;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate SheetGuard configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Environment to validate (development, test, production)
    #[arg(short, long, default_value = "development")]
    environment: String,

    /// Configuration directory path (default: config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output format for the resolved configuration (table, json, yaml)
    #[arg(long, default_value = "table")]
    format: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate every configuration section
    All,

    /// Validate and print one configuration section
    Component {
        /// Section name (policy, retry, rate_limiter, circuit_breakers, cache, snapshot, ...)
        name: String,
    },

    /// List the environments the loader recognises
    Environments,

    /// Show sections whose values differ between two environments
    Compare {
        #[arg(short, long, default_value = "development")]
        base: String,

        #[arg(short, long)]
        target: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let _subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    let result = match &cli.command {
        Some(Commands::All) | None => validate_all_config(&cli),
        Some(Commands::Component { name }) => validate_component(&cli, name),
        Some(Commands::Environments) => list_environments(),
        Some(Commands::Compare { base, target }) => compare_configs(&cli, base, target),
    };

    match result {
        Ok(()) => {
            info!("Configuration validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration validation failed: {e:#}");
            eprintln!("❌ {e:#}");
            process::exit(1);
        }
    }
}

fn load(cli: &Cli, environment: &str) -> Result<Arc<ConfigManager>> {
    ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), environment)
        .with_context(|| format!("failed to load configuration for '{environment}'"))
}

fn validate_all_config(cli: &Cli) -> Result<()> {
    println!("🔧 Validating SheetGuard Configuration");
    println!("Environment: {}", cli.environment);

    let manager = load(cli, &cli.environment)?;
    println!(
        "Config Directory: {}",
        manager.config_directory().display()
    );
    println!("✅ Configuration loaded and validated");
    println!();

    let config = manager.config();
    describe_policy(config);
    describe_resilience(config);
    describe_storage(config);

    if cli.format != "table" {
        println!();
        print_formatted(&cli.format, &manager.debug_config())?;
    }

    println!("\n🎉 All configuration validation checks passed!");
    Ok(())
}

fn validate_component(cli: &Cli, name: &str) -> Result<()> {
    println!("🔧 Validating Component: {name}");

    let manager = load(cli, &cli.environment)?;
    let key = name.replace('-', "_").to_lowercase();
    let section = manager
        .debug_config()
        .get(&key)
        .cloned()
        .with_context(|| format!("unknown component: {name}"))?;

    let format = if cli.format == "table" { "yaml" } else { &cli.format };
    print_formatted(format, &section)?;

    println!("✅ Component '{name}' validation passed!");
    Ok(())
}

fn list_environments() -> Result<()> {
    println!("📋 Available Environments:");
    for env in environments::ALL {
        println!("  • {env}");
    }
    Ok(())
}

fn compare_configs(cli: &Cli, base: &str, target: &str) -> Result<()> {
    println!("🔍 Comparing Configurations: {base} vs {target}");

    let base_config = load(cli, base)?.debug_config();
    let target_config = load(cli, target)?.debug_config();

    let (Some(base_sections), Some(target_sections)) =
        (base_config.as_object(), target_config.as_object())
    else {
        bail!("resolved configuration is not an object");
    };

    let mut differing = 0;
    for (section, base_value) in base_sections {
        let target_value = target_sections.get(section);
        if target_value != Some(base_value) {
            differing += 1;
            println!("\n📁 {section}");
            println!("   {base}: {base_value}");
            match target_value {
                Some(value) => println!("   {target}: {value}"),
                None => println!("   {target}: <absent>"),
            }
        }
    }

    if differing == 0 {
        println!("✅ No differences");
    }
    Ok(())
}

fn print_formatted(format: &str, value: &serde_json::Value) -> Result<()> {
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(value)?),
        "yaml" => print!("{}", serde_yaml::to_string(value)?),
        other => bail!("unsupported output format: {other}"),
    }
    Ok(())
}

fn describe_policy(config: &GuardConfig) {
    println!("🛡️  Policy");
    println!(
        "   ✅ Cells per document: default {}, absolute {}",
        config.policy.default_max_cells_affected, config.policy.absolute_max_cells_affected
    );
    println!(
        "   ✅ Intents per submission: {}",
        config.policy.max_intents_per_submission
    );
    println!(
        "   ✅ Operations per call: {}",
        config.batching.max_operations_per_call
    );
}

fn describe_resilience(config: &GuardConfig) {
    println!("🔁 Resilience");
    println!(
        "   ✅ Retry: {} attempts, {}ms..{}ms, jitter {}",
        config.retry.max_attempts,
        config.retry.base_delay_ms,
        config.retry.max_delay_ms,
        config.retry.jitter_factor
    );
    if config.rate_limiter.enabled {
        println!(
            "   ✅ Rate limiter: {}/s, burst {}",
            config.rate_limiter.requests_per_second, config.rate_limiter.burst_capacity
        );
    } else {
        println!("   ℹ️  Rate limiter disabled");
    }
    if config.circuit_breakers.enabled {
        let default = &config.circuit_breakers.default_config;
        println!(
            "   ✅ Circuit breakers: threshold {}, window {}ms, cool-down {}ms",
            default.failure_threshold, default.failure_window_ms, default.cool_down_ms
        );
        let mut overrides: Vec<_> = config.circuit_breakers.component_configs.iter().collect();
        overrides.sort_by_key(|(name, _)| name.as_str());
        for (name, component) in overrides {
            println!(
                "      • {name}: threshold {}, window {}ms, cool-down {}ms",
                component.failure_threshold, component.failure_window_ms, component.cool_down_ms
            );
        }
    } else {
        println!("   ℹ️  Circuit breakers disabled");
    }
    println!(
        "   ✅ Concurrency: {} in flight, queue depth {}",
        config.concurrency.max_in_flight, config.concurrency.max_queue_depth
    );
    println!(
        "   ✅ Default deadline: {}ms",
        config.execution.default_deadline_ms
    );
}

fn describe_storage(config: &GuardConfig) {
    println!("💾 Cache & Snapshots");
    if config.cache.enabled {
        println!(
            "   ✅ Cache: {} entries, ttl {}s",
            config.cache.max_entries, config.cache.default_ttl_seconds
        );
    } else {
        println!("   ℹ️  Cache disabled");
    }
    println!(
        "   ✅ Snapshots: retained {}s, sweep every {}s, at most {}",
        config.snapshot.retention_seconds,
        config.snapshot.sweep_interval_seconds,
        config.snapshot.max_retained_snapshots
    );
}
