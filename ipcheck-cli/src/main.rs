//! IPCHECK CLI
//!
//! Command-line interface for cached IP geolocation, RDAP lookups and
//! connection security scoring.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ipcheck_core::{is_private_ip, LookupKind, LookupRecord, LookupStatus, ServiceConfig};
use ipcheck_lookup::{LookupOptions, LookupService};
use ipcheck_security::{Connection, Grade, RiskLevel, SecurityAnalyzer};

/// IPCHECK - cached IP geolocation and connection scoring
#[derive(Parser)]
#[command(name = "ipcheck")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Look up one IP address
    Lookup {
        /// IPv4 or IPv6 address
        ip: String,
        /// RDAP registration data instead of geolocation
        #[arg(long)]
        whois: bool,
        /// PTR hostname instead of geolocation
        #[arg(long, conflicts_with = "whois")]
        rdns: bool,
        /// Ignore cached records
        #[arg(long)]
        skip_cache: bool,
    },

    /// Geolocate several IP addresses
    Bulk {
        /// Addresses to look up
        #[arg(required = true)]
        ips: Vec<String>,
        /// Ignore cached records
        #[arg(long)]
        skip_cache: bool,
    },

    /// Score a list of connections (JSON array)
    Score {
        /// File holding the connections
        file: PathBuf,
        /// Do not geolocate remote addresses
        #[arg(long)]
        offline: bool,
    },

    /// Show cache and circuit breaker statistics
    Stats,

    /// Empty both cache tiers
    Clear,

    /// Repair the disk cache index
    Reconcile,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "ipcheck=debug,info"
    } else {
        "ipcheck=info,warn"
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = ServiceConfig::from_env().context("Invalid configuration")?;
    let service = LookupService::from_config(config)
        .await
        .context("Failed to start lookup service")?;

    match cli.command {
        Commands::Lookup {
            ip,
            whois,
            rdns,
            skip_cache,
        } => cmd_lookup(&service, &ip, lookup_kind(whois, rdns), options(skip_cache), cli.json).await,
        Commands::Bulk { ips, skip_cache } => cmd_bulk(&service, &ips, options(skip_cache), cli.json).await,
        Commands::Score { file, offline } => cmd_score(&service, &file, offline, cli.json).await,
        Commands::Stats => cmd_stats(&service, cli.json).await,
        Commands::Clear => cmd_clear(&service).await,
        Commands::Reconcile => cmd_reconcile(&service, cli.json).await,
    }
}

fn lookup_kind(whois: bool, rdns: bool) -> LookupKind {
    match (whois, rdns) {
        (true, _) => LookupKind::Whois,
        (_, true) => LookupKind::ReverseDns,
        _ => LookupKind::Geo,
    }
}

fn options(skip_cache: bool) -> LookupOptions {
    LookupOptions { skip_cache }
}

fn spinner(message: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Look up one address
async fn cmd_lookup(service: &LookupService, ip: &str, kind: LookupKind, opts: LookupOptions, json: bool) -> Result<()> {
    let pb = spinner(&format!("Looking up {} ({})", ip, kind))?;
    let record = service.lookup(kind, ip, opts).await;
    pb.finish_and_clear();

    if json {
        return print_json(&record);
    }
    print_record(&record);
    Ok(())
}

/// Geolocate several addresses
async fn cmd_bulk(service: &LookupService, ips: &[String], opts: LookupOptions, json: bool) -> Result<()> {
    let pb = spinner(&format!("Looking up {} address(es)", ips.len()))?;
    let records = service.bulk_get_location(ips, opts).await;
    pb.finish_and_clear();

    if json {
        return print_json(&records);
    }

    let found = records.iter().filter(|r| r.is_success()).count();
    println!(
        "{} {}/{} resolved\n",
        "🌍 Bulk lookup:".cyan().bold(),
        found,
        records.len()
    );
    for record in &records {
        print_record(record);
        println!();
    }
    Ok(())
}

fn print_record(record: &LookupRecord) {
    let status = match record.status {
        LookupStatus::Success => "✅ found".green().bold(),
        LookupStatus::NotFound => "➖ not found".yellow().bold(),
        LookupStatus::Error => "❌ error".red().bold(),
    };
    let source = if record.cached { " (cached)".dimmed() } else { "".normal() };
    println!("{} {} {}{}", record.id.bold(), record.kind.to_string().dimmed(), status, source);

    if let Some(message) = &record.message {
        println!("   {} {}", "Reason:".dimmed(), message);
    }
    if let Some(provider) = &record.provider {
        println!("   {} {}", "Provider:".dimmed(), provider);
    }
    for (name, value) in &record.fields {
        println!("   {} {}", format!("{}:", name).dimmed(), field_text(value));
    }
}

fn field_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => items.iter().map(field_text).collect::<Vec<_>>().join(", "),
        other => other.to_string(),
    }
}

fn load_connections(path: &Path) -> Result<Vec<Connection>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    serde_json::from_reader(std::io::BufReader::new(file)).context("Expected a JSON array of connections")
}

/// Score connections from a file
async fn cmd_score(service: &LookupService, path: &Path, offline: bool, json: bool) -> Result<()> {
    let connections = load_connections(path)?;
    debug!(count = connections.len(), "loaded connections");

    let mut geo: BTreeMap<IpAddr, LookupRecord> = BTreeMap::new();
    if !offline {
        let external: Vec<String> = connections
            .iter()
            .map(|c| c.remote_ip)
            .filter(|ip| !is_private_ip(*ip))
            .map(|ip| ip.to_string())
            .collect();

        if !external.is_empty() {
            let pb = spinner(&format!("Geolocating {} remote address(es)", external.len()))?;
            let records = service.bulk_get_location(&external, LookupOptions::default()).await;
            pb.finish_and_clear();

            for record in records {
                if let Ok(ip) = record.id.parse::<IpAddr>() {
                    geo.insert(ip, record);
                }
            }
        }
    }

    let analyzer = SecurityAnalyzer::default();
    let analyzed: Vec<_> = connections
        .into_iter()
        .map(|c| {
            let record = geo.get(&c.remote_ip).cloned();
            analyzer.analyze(c, record)
        })
        .collect();
    let score = analyzer.score(&analyzed);

    if json {
        return print_json(&serde_json::json!({
            "score": score,
            "connections": analyzed,
        }));
    }

    let grade = match score.grade {
        Grade::A | Grade::B => score.grade.to_string().green().bold(),
        Grade::C => score.grade.to_string().yellow().bold(),
        Grade::D | Grade::F => score.grade.to_string().red().bold(),
    };
    println!("{} {}/100 (grade {})", "🛡️  Security score:".cyan().bold(), score.score, grade);
    println!(
        "   {} {} total, {} external, {} secure",
        "Connections:".dimmed(),
        score.total_connections,
        score.external_connections,
        score.secure
    );
    println!(
        "   {} {} threat(s), {} warning(s)",
        "Findings:".dimmed(),
        score.threats,
        score.warnings
    );

    let flagged: Vec<_> = analyzed.iter().filter(|a| a.risk_level != RiskLevel::Info).collect();
    if !flagged.is_empty() {
        println!("\n{}", "Flagged connections:".yellow().bold());
        for a in flagged {
            let level = match a.risk_level {
                RiskLevel::Danger => "DANGER".red().bold(),
                _ => "WARN".yellow(),
            };
            println!(
                "   {} {} {}",
                level,
                a.connection.remote_addr(),
                a.risks.join("; ").dimmed()
            );
        }
    }

    if !score.top_countries.is_empty() {
        println!("\n{}", "Top countries:".cyan());
        for (country, n) in &score.top_countries {
            println!("   {} {}", country, n);
        }
    }
    if !score.risk_factors.is_empty() {
        println!("\n{}", "Risk factors:".cyan());
        for factor in &score.risk_factors {
            println!("   • {}", factor);
        }
    }

    println!("\n{}", "ℹ️  Recommendations:".cyan());
    for rec in &score.recommendations {
        println!("   • {}", rec);
    }

    Ok(())
}

/// Show statistics
async fn cmd_stats(service: &LookupService, json: bool) -> Result<()> {
    let stats = service.stats().await;
    if json {
        return print_json(&stats);
    }

    println!("{}", "📊 Lookup service".cyan().bold());
    println!(
        "   {} {} requests, {} hits, {} misses",
        "Lookups:".dimmed(),
        stats.requests,
        stats.cache_hits,
        stats.cache_misses
    );
    println!(
        "   {} {} provider errors, {} circuit rejections",
        "Failures:".dimmed(),
        stats.provider_errors,
        stats.circuit_rejections
    );

    let memory = &stats.cache.memory;
    println!("\n{}", "Memory tier".yellow().bold());
    println!("   {} {}/{}", "Entries:".dimmed(), memory.size, memory.capacity);
    println!("   {} {} / {}", "Hits / misses:".dimmed(), memory.hits, memory.misses);
    println!("   {} {}", "Evictions:".dimmed(), memory.evictions);

    match &stats.cache.disk {
        Some(disk) => {
            println!("\n{}", "Disk tier".yellow().bold());
            println!("   {} {}", "Entries:".dimmed(), disk.entries);
            println!("   {} {} / {} bytes", "Size:".dimmed(), disk.total_bytes, disk.max_bytes);
            println!("   {} {} / {}", "Hits / misses:".dimmed(), disk.hits, disk.misses);
            println!("   {} {}", "Evictions:".dimmed(), disk.evictions);
            println!("   {} {}", "Promotions:".dimmed(), stats.cache.promotions);
        }
        None => println!("\n{}", "Disk tier disabled".dimmed()),
    }

    println!("\n{} {}", "Circuit breakers:".yellow().bold(), stats.circuit_state);
    for breaker in &stats.breakers {
        println!(
            "   {} {} ({} failures, opened {} time(s))",
            format!("{}:", breaker.provider).dimmed(),
            breaker.state,
            breaker.consecutive_failures,
            breaker.times_opened
        );
    }
    Ok(())
}

/// Empty the cache
async fn cmd_clear(service: &LookupService) -> Result<()> {
    service.clear().await;
    println!("{}", "✅ Cache cleared".green());
    Ok(())
}

/// Reconcile the disk index
async fn cmd_reconcile(service: &LookupService, json: bool) -> Result<()> {
    let report = service.reconcile().await.context("Failed to reconcile disk cache")?;

    if json {
        return print_json(&report);
    }
    match report {
        Some(report) => {
            println!("{}", "✅ Disk cache reconciled".green().bold());
            println!("   {} {}", "Missing blobs dropped:".dimmed(), report.missing_blobs);
            println!("   {} {}", "Sizes corrected:".dimmed(), report.resized);
            println!("   {} {}", "Orphans removed:".dimmed(), report.orphans_removed);
        }
        None => println!("{}", "⚠️  Disk tier disabled, nothing to reconcile".yellow()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use serde_json::json;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_lookup() {
        let cli = Cli::try_parse_from(["ipcheck", "--json", "lookup", "8.8.8.8", "--whois"]).unwrap();
        assert!(cli.json);
        assert!(matches!(
            cli.command,
            Commands::Lookup { ref ip, whois: true, rdns: false, skip_cache: false } if ip == "8.8.8.8"
        ));
    }

    #[test]
    fn test_parse_reverse_dns_lookup() {
        let cli = Cli::try_parse_from(["ipcheck", "lookup", "8.8.8.8", "--rdns"]).unwrap();
        let Commands::Lookup { whois, rdns, .. } = cli.command else {
            panic!("expected lookup");
        };
        assert_eq!(lookup_kind(whois, rdns), LookupKind::ReverseDns);
        assert_eq!(lookup_kind(false, false), LookupKind::Geo);

        assert!(Cli::try_parse_from(["ipcheck", "lookup", "8.8.8.8", "--rdns", "--whois"]).is_err());
    }

    #[test]
    fn test_bulk_requires_ips() {
        assert!(Cli::try_parse_from(["ipcheck", "bulk"]).is_err());
        let cli = Cli::try_parse_from(["ipcheck", "bulk", "1.1.1.1", "8.8.8.8"]).unwrap();
        assert!(matches!(cli.command, Commands::Bulk { ref ips, .. } if ips.len() == 2));
    }

    #[test]
    fn test_field_text() {
        assert_eq!(field_text(&json!("Mountain View")), "Mountain View");
        assert_eq!(field_text(&json!(["8.8.8.0/24", "8.8.4.0/24"])), "8.8.8.0/24, 8.8.4.0/24");
        assert_eq!(field_text(&json!(37.751)), "37.751");
    }
}
