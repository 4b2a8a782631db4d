use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use colored::Colorize;
use rayon::prelude::*;
use tracing::info;
use xcache_utils::logger;
use xcache_utils::profiler::{PhaseTiming, Profiler};

use crate::VERSION;
use crate::backend::ReferenceBackend;
use crate::build_options::{AllocatorHandle, BuildOptions, DeviceContext};
use crate::cache::{CacheStats, Handle};
use crate::config::ServiceConfig;
use crate::descriptor::ProgramDescriptor;
use crate::fingerprint::Fingerprinter;
use crate::service::CompilationService;

#[derive(Parser, Debug)]
#[command(name = "xcache", version = VERSION, about = "Compilation cache CLI")]
pub struct XcacheCli {
    #[arg(long, global = true)]
    /// Display phase timing information.
    time: bool,

    #[arg(long, global = true)]
    /// Read service settings from a TOML file (needs the `toml-config` feature).
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl XcacheCli {
    pub fn command(&self) -> &Command {
        &self.command
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Prints the cache key of a program descriptor.
    Fingerprint { path: PathBuf },
    /// Checks the build configuration and device assignment of a descriptor.
    Validate { path: PathBuf },
    /// Compiles a descriptor through the reference backend.
    Compile {
        path: PathBuf,
        /// Number of concurrent identical compile requests to issue.
        #[arg(short = 'n', long, default_value_t = 1)]
        requests: usize,
        /// Bound the cache to this many entries (0 = unbounded).
        #[arg(long)]
        max_entries: Option<usize>,
        /// Release every returned handle before exiting.
        #[arg(long)]
        release: bool,
    },
}

pub fn run() -> Result<()> {
    logger::init_logging();
    let cli = XcacheCli::parse();
    let config = load_config(cli.config.as_deref())?;
    let mut profiler = Profiler::new();

    match &cli.command {
        Command::Fingerprint { path } => handle_fingerprint(path, &config, &mut profiler)?,
        Command::Validate { path } => handle_validate(path, &config, &mut profiler)?,
        Command::Compile {
            path,
            requests,
            max_entries,
            release,
        } => {
            let mut config = config;
            if let Some(max_entries) = max_entries {
                config.cache.max_entries = *max_entries;
            }
            handle_compile(path, &config, *requests, *release, &mut profiler)?;
        }
    }

    if cli.time {
        print_timings(profiler.phases());
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<ServiceConfig> {
    match path {
        #[cfg(feature = "toml-config")]
        Some(path) => ServiceConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        #[cfg(not(feature = "toml-config"))]
        Some(path) => bail!(
            "cannot read {}: built without the `toml-config` feature",
            path.display()
        ),
        None => ServiceConfig::from_env().context("invalid XCACHE_* environment"),
    }
}

fn read_descriptor(path: &Path, profiler: &mut Profiler) -> Result<(Vec<u8>, ProgramDescriptor)> {
    let payload = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let descriptor = profiler
        .record_phase("Parse", || ProgramDescriptor::from_bytes(&payload))
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok((payload, descriptor))
}

fn handle_fingerprint(path: &Path, config: &ServiceConfig, profiler: &mut Profiler) -> Result<()> {
    let (_, descriptor) = read_descriptor(path, profiler)?;
    let fingerprinter = Fingerprinter::new(config.max_descriptor_bytes);
    let key = profiler.record_phase("Fingerprint", || fingerprinter.fingerprint(&descriptor))?;
    println!("{} {}", "key".bold(), key);
    Ok(())
}

fn handle_validate(path: &Path, config: &ServiceConfig, profiler: &mut Profiler) -> Result<()> {
    let (_, descriptor) = read_descriptor(path, profiler)?;
    let device = device_context(config);
    let options = profiler.record_phase("Validate", || {
        BuildOptions::from_config(&device, &descriptor.config)
    })?;

    println!(
        "{} {} replica(s) on device {}",
        "valid".green().bold(),
        options.num_replicas(),
        options.device_ordinal()
    );
    if let Some(assignment) = options.device_assignment() {
        for replica in 0..assignment.replica_count() {
            if let Some(ordinals) = assignment.replica(replica) {
                println!("{:>16}: {:?}", format!("replica {replica}"), ordinals);
            }
        }
    }
    Ok(())
}

fn handle_compile(
    path: &Path,
    config: &ServiceConfig,
    requests: usize,
    release: bool,
    profiler: &mut Profiler,
) -> Result<()> {
    if requests == 0 {
        bail!("--requests must be at least 1");
    }
    let (payload, _) = read_descriptor(path, profiler)?;
    let service = CompilationService::new(ReferenceBackend, device_context(config), config);

    let results = profiler.record_phase("Compile", || {
        (0..requests)
            .into_par_iter()
            .map(|_| service.compile(&payload))
            .collect::<Vec<_>>()
    });

    let mut handles = Vec::with_capacity(results.len());
    for result in results {
        handles.push(result.context("compile request failed")?.handle);
    }

    let distinct: BTreeSet<Handle> = handles.iter().copied().collect();
    for handle in &distinct {
        let refs = service.cache().ref_count(*handle)?;
        println!("{} {} (refs {})", "handle".bold(), handle, refs);
    }
    info!(requests, handles = distinct.len(), "compile requests served");

    if release {
        profiler.record_phase("Release", || service.release_handles(&handles))?;
        println!("{} {} reference(s)", "released".green().bold(), handles.len());
    }

    print_stats(&service.cache().stats());
    Ok(())
}

fn device_context(config: &ServiceConfig) -> DeviceContext {
    DeviceContext::new(config.device_ordinal, AllocatorHandle::new(0))
}

fn print_stats(stats: &CacheStats) {
    println!("{}", "[Cache]".bold());
    println!("{:>16}: {}", "Live", stats.live_entries);
    println!("{:>16}: {}", "Reclaimable", stats.reclaimable_entries);
    println!("{:>16}: {}", "References", stats.live_references);
    println!("{:>16}: {}", "Compiles", stats.metrics.compiles);
    println!("{:>16}: {}", "Hits", stats.metrics.hits);
    println!("{:>16}: {}", "Evictions", stats.metrics.evictions);
}

fn print_timings(phases: &[PhaseTiming]) {
    println!("{}", "[Timing]".bold());
    let mut total = Duration::ZERO;
    for PhaseTiming { name, duration } in phases {
        println!("{:>16}: {:>6.2} ms", name, duration.as_secs_f64() * 1000.0);
        total += *duration;
    }
    println!("{:>16}: {:>6.2} ms", "Total", total.as_secs_f64() * 1000.0);
}
