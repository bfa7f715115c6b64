//! `regmirror mirror` command.

use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use regmirror_core::{read_jobs, DryRun, Mirror, MirrorConfig, MirrorJob, MirrorSummary, Registry};
use regmirror_registry::{DockerHubDescriber, OciRegistry};

use crate::output;

#[derive(Args)]
pub struct MirrorArgs {
    /// File of `SOURCE DEST TAG` lines; reads stdin when omitted or "-"
    pub file: Option<PathBuf>,

    /// YAML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Registry for specs without a registry host
    #[arg(long, env = "REGMIRROR_REGISTRY")]
    pub registry: Option<String>,

    /// Replace the organization of every destination
    #[arg(long, env = "REGMIRROR_DEST_ORG")]
    pub dest_org: Option<String>,

    /// Architectures to mirror (comma separated)
    #[arg(long = "arch", env = "REGMIRROR_ARCHS", value_delimiter = ',')]
    pub architectures: Vec<String>,

    /// Number of jobs to run at the same time
    #[arg(short, long, env = "REGMIRROR_JOBS")]
    pub jobs: Option<usize>,

    /// Inspect and log what would be copied, without writing
    #[arg(long)]
    pub dry_run: bool,

    /// Do not publish Docker Hub repository descriptions
    #[arg(long)]
    pub no_description: bool,

    /// Registries reached over plain HTTP
    #[arg(long = "insecure-registry")]
    pub insecure_registries: Vec<String>,
}

impl MirrorArgs {
    /// Defaults, then the config file, then flags and environment.
    pub fn settings(&self) -> Result<MirrorConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => MirrorConfig::from_file(path)?,
            None => MirrorConfig::default(),
        };
        if let Some(registry) = &self.registry {
            config.default_registry = registry.clone();
        }
        if let Some(org) = &self.dest_org {
            config.dest_org = Some(org.clone());
        }
        let architectures: Vec<String> = self
            .architectures
            .iter()
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect();
        if !architectures.is_empty() {
            config.architectures = architectures;
        }
        if let Some(jobs) = self.jobs {
            config.concurrency = jobs;
        }
        if self.no_description {
            config.description.enabled = false;
        }
        config.validate()?;
        Ok(config)
    }

    fn read_input(&self) -> Result<Vec<MirrorJob>, Box<dyn std::error::Error>> {
        let jobs = match &self.file {
            Some(path) if path.as_os_str() != "-" => {
                let file = std::fs::File::open(path)
                    .map_err(|e| format!("Failed to open {}: {}", path.display(), e))?;
                read_jobs(BufReader::new(file))?
            }
            _ => read_jobs(std::io::stdin().lock())?,
        };
        Ok(jobs)
    }
}

pub async fn execute(args: MirrorArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.settings()?;
    let jobs = args.read_input()?;
    if jobs.is_empty() {
        println!("No jobs to run");
        return Ok(());
    }

    tracing::info!(
        jobs = jobs.len(),
        registry = %config.default_registry,
        architectures = %config.architectures.join(","),
        concurrency = config.concurrency,
        dry_run = args.dry_run,
        "Starting mirror run"
    );

    let transport = OciRegistry::with_insecure(args.insecure_registries.clone());
    let registry: Arc<dyn Registry> = if args.dry_run {
        Arc::new(DryRun::new(transport))
    } else {
        Arc::new(transport)
    };

    let mut mirror = Mirror::new(registry, config);
    if !args.dry_run && mirror.config().description.enabled {
        let describer = DockerHubDescriber::from_env_or_store();
        if describer.has_credential() {
            mirror = mirror.with_description_publisher(Arc::new(describer));
        } else {
            tracing::debug!("No Docker Hub credential, skipping repository descriptions");
        }
    }

    let results = mirror.run_all(jobs).await;
    let summary = MirrorSummary::from_results(&results);
    output::print_results(&results);
    output::print_summary(&summary);

    if !summary.is_clean() {
        return Err(format!(
            "{} job(s) failed, {} architecture(s) failed",
            summary.jobs_failed, summary.unit_failures
        )
        .into());
    }
    Ok(())
}
