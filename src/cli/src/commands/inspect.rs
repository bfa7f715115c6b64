//! `regmirror inspect` command - Show the mirror plan for one source image.

use clap::Args;
use regmirror_core::config::DEFAULT_ARCHITECTURES;
use regmirror_core::manifest::config_architecture;
use regmirror_core::variant::enumerate;
use regmirror_core::{classify, ImageReference, ManifestEnvelope, ManifestList, Registry, Strategy};
use regmirror_registry::OciRegistry;

use crate::output;

#[derive(Args)]
pub struct InspectArgs {
    /// Source image, e.g. "library/nginx:1.25" or "ghcr.io/org/app:2.0"
    pub image: String,

    /// Registry for specs without a registry host
    #[arg(long, env = "REGMIRROR_REGISTRY", default_value = "docker.io")]
    pub registry: String,

    /// Architectures to plan for (comma separated)
    #[arg(long = "arch", env = "REGMIRROR_ARCHS", value_delimiter = ',')]
    pub architectures: Vec<String>,

    /// Print the raw manifest instead of the plan
    #[arg(long)]
    pub raw: bool,
}

/// One row per (architecture, variant): arch, variant, digest, tag suffix, list entry.
fn plan_rows(list: &ManifestList, tag: &str, architectures: &[String]) -> Vec<Vec<String>> {
    let (groups, missing) = enumerate(list, architectures);
    let mut rows = Vec::new();
    for group in &groups {
        for (index, entry) in group.entries.iter().enumerate() {
            rows.push(vec![
                group.architecture.clone(),
                entry.variant.clone().unwrap_or_else(|| "-".to_string()),
                entry.descriptor.digest.clone(),
                group.dest_tag(tag, index),
                if index == 0 { "yes" } else { "no" }.to_string(),
            ]);
        }
    }
    for architecture in missing {
        rows.push(vec![
            architecture,
            "-".to_string(),
            "not found".to_string(),
            "-".to_string(),
            "no".to_string(),
        ]);
    }
    rows
}

pub async fn execute(args: InspectArgs) -> Result<(), Box<dyn std::error::Error>> {
    let reference = ImageReference::parse(&args.image, &args.registry)?;
    let tag = reference
        .tag
        .clone()
        .ok_or("inspect needs a tag, not a digest")?;
    let architectures: Vec<String> = if args.architectures.is_empty() {
        DEFAULT_ARCHITECTURES.iter().map(|a| a.to_string()).collect()
    } else {
        args.architectures.clone()
    };

    let registry = OciRegistry::new();
    let raw = registry
        .inspect_manifest(&reference)
        .await?
        .ok_or_else(|| format!("{} not found", reference))?;

    if args.raw {
        let value: serde_json::Value = serde_json::from_slice(&raw)?;
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    let envelope = ManifestEnvelope::parse(raw)?;
    println!("Image:    {}", reference);
    println!("Digest:   {}", envelope.digest());
    println!("Schema:   {} ({})", envelope.schema_version, envelope.media_type);

    match classify(&envelope)? {
        Strategy::List(list) => {
            println!("Strategy: manifest-list\n");
            let mut table = output::new_table(&["ARCH", "VARIANT", "DIGEST", "DEST TAG", "IN LIST"]);
            for row in plan_rows(&list, &tag, &architectures) {
                table.add_row(row);
            }
            println!("{table}");
        }
        Strategy::SingleV2 { .. } => {
            let architecture = config_architecture(&registry.inspect_config(&reference).await?)?;
            print_single("single-arch-v2", &architecture, &tag, &architectures);
        }
        Strategy::SingleV1 { architecture } => {
            print_single("single-arch-v1", &architecture, &tag, &architectures);
        }
    }
    Ok(())
}

fn print_single(strategy: &str, architecture: &str, tag: &str, architectures: &[String]) {
    println!("Strategy: {}", strategy);
    if architectures.iter().any(|a| a == architecture) {
        println!("Mirrors to {}-{} (list {})", tag, architecture, tag);
    } else {
        println!("Architecture {} is not configured, would be skipped", architecture);
    }
}
