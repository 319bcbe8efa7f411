//! RunIT: blocklist maintenance from the command line
//!
//! Drives the same adblock controller the browser shell embeds:
//! - `status`: cache location, age and sizes
//! - `refresh [--force]`: rebuild when stale (or always)
//! - `update`: forced rebuild with a bounded wait, then reload
//! - `check <url> [type] [--allow-site <host>]...`: show the decision

use anyhow::{Context, Result, bail};
use runit_adblock::{Adblocker, AdblockConfig, InterceptResult, ResourceType};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Use mimalloc as the global allocator for reduced memory fragmentation
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const USAGE: &str = "\
usage: runit [--config <file>] <command>

commands:
  status                               show the blocklist cache
  refresh [--force]                    rebuild the blocklist if stale
  update                               force a rebuild and wait for it
  check <url> [type] [--allow-site <host>]...
                                       print the decision for a request";

enum Command {
    Status,
    Refresh { force: bool },
    Update,
    Check {
        url: String,
        resource_type: ResourceType,
        allow_sites: Vec<String>,
    },
}

struct Args {
    config: Option<PathBuf>,
    command: Command,
}

fn parse_args(raw: impl IntoIterator<Item = String>) -> Result<Args> {
    let mut config = None;
    let mut positional = Vec::new();
    let mut force = false;
    let mut allow_sites = Vec::new();

    let mut iter = raw.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                config = Some(PathBuf::from(iter.next().context("--config needs a path")?))
            }
            "--force" => force = true,
            "--allow-site" => allow_sites.push(iter.next().context("--allow-site needs a host")?),
            "-h" | "--help" => bail!("{USAGE}"),
            flag if flag.starts_with("--") => bail!("unknown flag {flag}\n\n{USAGE}"),
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let command = match positional.next().as_deref() {
        Some("status") | None => Command::Status,
        Some("refresh") => Command::Refresh { force },
        Some("update") => Command::Update,
        Some("check") => {
            let url = positional.next().context("check needs a URL")?;
            let resource_type = positional
                .next()
                .map(|t| t.parse().unwrap_or(ResourceType::Other))
                .unwrap_or(ResourceType::Other);
            Command::Check {
                url,
                resource_type,
                allow_sites,
            }
        }
        Some(other) => bail!("unknown command {other}\n\n{USAGE}"),
    };

    Ok(Args { config, command })
}

/// Explicit `--config`, else `<config dir>/runit/adblock.toml` when present, else defaults
fn load_config(explicit: Option<PathBuf>) -> Result<AdblockConfig> {
    let path = match explicit {
        Some(path) => path,
        None => match dirs::config_dir().map(|d| d.join("runit").join("adblock.toml")) {
            Some(path) if path.exists() => path,
            _ => return Ok(AdblockConfig::default()),
        },
    };
    AdblockConfig::from_toml_file(&path).with_context(|| format!("loading {}", path.display()))
}

fn init_logging() {
    let fallback = match std::env::var("RUNIT_VERBOSE").as_deref() {
        Ok("0") => "warn",
        _ => "info",
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false).compact())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let args = parse_args(std::env::args().skip(1))?;
    let config = load_config(args.config)?;
    let adblocker = Adblocker::new(config, tokio::runtime::Handle::current());

    match args.command {
        Command::Status => {
            let status = adblocker.cache_status();
            println!("cache:   {}", status.path.display());
            match status.last_update {
                Some(at) => {
                    let state = if status.fresh { "fresh" } else { "stale" };
                    println!("updated: {} ({})", at.to_rfc3339(), state)
                }
                None => println!("updated: never"),
            }
            println!("hosts:   {}", status.hosts);
            println!("paths:   {}", status.paths);
        }
        Command::Refresh { force } => match adblocker.refresh_async(force) {
            Some(task) => {
                task.await.context("refresh task")?;
                let status = adblocker.cache_status();
                println!("hosts={} paths={}", status.hosts, status.paths);
            }
            None => println!("cache is fresh; use --force to rebuild"),
        },
        Command::Update => {
            let outcome = adblocker.force_update().await;
            if !outcome.cache_changed {
                info!("Cache unchanged; lists may still be building");
            }
            println!("hosts={} paths={}", outcome.hosts, outcome.paths);
        }
        Command::Check {
            url,
            resource_type,
            allow_sites,
        } => {
            adblocker.reload_from_cache();
            for host in &allow_sites {
                adblocker.toggle_site_allow(host);
            }
            match adblocker.decide(&url, resource_type) {
                InterceptResult::Allow => println!("allow {url} ({resource_type})"),
                InterceptResult::Blocked { reason } => {
                    println!("block {url} ({resource_type}): {reason}")
                }
            }
        }
    }

    Ok(())
}
