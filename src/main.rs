use anyhow::{bail, Result};
use clap::Parser;
use s3swarm::buckets::{load_buckets, BucketList};
use s3swarm::cli_style::{self, TableBuilder};
use s3swarm::config::{self, AppConfig};
use s3swarm::enumerator::generate_manifest;
use s3swarm::format::{format_duration, format_rate, format_size};
use indicatif::MultiProgress;
use s3swarm::manifest::{JsonManifestStore, ManifestStore};
use s3swarm::progress::DashboardLogWriter;
use s3swarm::session::{AwsSsoSession, SharedSession};
use s3swarm::swarm::{install_interrupt_handler, RunSummary, Swarm, SwarmOptions};
use s3swarm::S3ObjectStore;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ")");

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(s);
    if path.is_absolute() {
        return Ok(path);
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .map_err(|e| format!("Error resolving path '{}': {}", s, e))
}

/// Download every object of a list of S3 buckets, resumably.
#[derive(Parser, Debug)]
#[command(version = VERSION, styles = cli_style::get_styles())]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Local directory downloads are written to.
    #[clap(long, default_value = config::DEFAULT_DESTINATION, value_parser = parse_path)]
    pub destination: PathBuf,

    /// File listing the buckets to download, one per line.
    #[clap(long, default_value = config::DEFAULT_BUCKETS_FILE, value_parser = parse_path)]
    pub buckets_file: PathBuf,

    /// Manifest file tracking every object and its status.
    #[clap(long, default_value = config::DEFAULT_MANIFEST, value_parser = parse_path)]
    pub manifest: PathBuf,

    /// Number of concurrent downloads.
    #[clap(long, default_value_t = config::DEFAULT_MAX_WORKERS)]
    pub max_workers: usize,

    /// Retries per object after the first attempt.
    #[clap(long, default_value_t = config::DEFAULT_MAX_RETRIES)]
    pub max_retries: u32,

    /// Only (re)generate the manifest, then exit.
    #[clap(long)]
    pub generate_manifest: bool,

    /// Show what would be downloaded without downloading.
    #[clap(long)]
    pub dry_run: bool,

    /// Also retry objects that failed in earlier runs.
    #[clap(long)]
    pub retry_failed: bool,

    /// AWS profile to authenticate with.
    #[clap(long, default_value = config::DEFAULT_PROFILE)]
    pub profile: String,

    /// List failed objects recorded in the manifest, then exit.
    #[clap(long)]
    pub show_failed: bool,

    /// Log progress lines instead of drawing progress bars.
    #[clap(long)]
    pub no_dashboard: bool,
}

impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            destination: args.destination.clone(),
            buckets_file: args.buckets_file.clone(),
            manifest: args.manifest.clone(),
            profile: args.profile.clone(),
            max_workers: args.max_workers,
            max_retries: args.max_retries,
            retry_failed: args.retry_failed,
            generate_only: args.generate_manifest,
            dry_run: args.dry_run,
            show_failed: args.show_failed,
            no_dashboard: args.no_dashboard,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    let multi = MultiProgress::new();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(DashboardLogWriter::new(multi.clone())))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = AppConfig::resolve(&cli_config, file_config)?;

    cli_style::print_banner(env!("CARGO_PKG_VERSION"));

    if app_config.show_failed {
        return show_failed(&app_config);
    }

    let buckets = match load_buckets(&app_config.buckets_file)? {
        BucketList::SampleCreated => {
            cli_style::print_warning(&format!(
                "Created example buckets file at {}",
                app_config.buckets_file.display()
            ));
            cli_style::print_info("Please edit it with your bucket names and run again.");
            return Ok(());
        }
        BucketList::Loaded(buckets) if buckets.is_empty() => {
            bail!(
                "No buckets listed in {}",
                app_config.buckets_file.display()
            );
        }
        BucketList::Loaded(buckets) => buckets,
    };

    print_configuration(&app_config, &buckets);

    let session = Arc::new(
        AwsSsoSession::connect(&app_config.profile, app_config.transfer.session_revalidate())
            .await,
    );
    let shared_session = Arc::new(SharedSession::new(session.clone()));
    if !shared_session.ensure_valid().await {
        cli_style::print_error(&format!(
            "Failed to authenticate. Please run 'aws sso login --profile {}' and try again.",
            app_config.profile
        ));
        bail!("authentication failed for profile {}", app_config.profile);
    }
    let store = Arc::new(S3ObjectStore::new(session));

    let manifest_existed = app_config.manifest.exists();
    let manifest = Arc::new(JsonManifestStore::load_or_create(&app_config.manifest)?);

    if app_config.generate_only || !manifest_existed {
        cli_style::print_section_header("Generating Manifest");
        let report = generate_manifest(store.as_ref(), manifest.as_ref(), &buckets).await?;
        cli_style::print_key_value("Objects", &report.items.to_string());
        cli_style::print_key_value("Total size", &format_size(report.total_bytes));
        for bucket in &report.skipped_buckets {
            cli_style::print_warning(&format!("Skipped inaccessible bucket {}", bucket));
        }
        if !report.collisions.is_empty() {
            cli_style::print_warning(&format!(
                "{} objects share a bucket, folder and filename with another object and were not added",
                report.collisions.len()
            ));
        }
        cli_style::print_section_footer();

        if app_config.generate_only {
            cli_style::print_success(&format!(
                "Manifest saved to {}",
                app_config.manifest.display()
            ));
            return Ok(());
        }
    }

    let pending = manifest.pending_items(app_config.retry_failed);
    let stats = manifest.stats();

    if pending.is_empty() {
        cli_style::print_success("No pending downloads found.");
        if !app_config.retry_failed && stats.counts.failed > 0 {
            cli_style::print_info(&format!(
                "{} failed downloads remain. Use --retry-failed to retry them.",
                stats.counts.failed
            ));
        }
        return Ok(());
    }

    cli_style::print_section_header("Manifest");
    cli_style::print_key_value("Pending", &stats.counts.pending.to_string());
    cli_style::print_key_value("Completed", &stats.counts.completed.to_string());
    cli_style::print_key_value("Failed", &stats.counts.failed.to_string());
    if app_config.retry_failed && stats.counts.failed > 0 {
        cli_style::print_info(&format!(
            "Including {} failed items for retry",
            stats.counts.failed
        ));
    }
    cli_style::print_key_value("Total size", &format_size(stats.total_bytes));
    cli_style::print_key_value("Completed size", &format_size(stats.completed_bytes));
    cli_style::print_key_value_highlight("Remaining", &format_size(stats.remaining_bytes()));
    cli_style::print_section_footer();

    if app_config.dry_run {
        cli_style::print_info(&format!(
            "[DRY-RUN] Would download {} files{} with {} workers",
            pending.len(),
            if app_config.retry_failed {
                " (including failed items)"
            } else {
                ""
            },
            app_config.transfer.max_workers
        ));
        return Ok(());
    }

    let cancel = CancellationToken::new();
    install_interrupt_handler(cancel.clone())?;

    let swarm = Swarm::new(
        store,
        manifest.clone(),
        shared_session,
        app_config.destination.clone(),
        SwarmOptions::from_settings(&app_config.transfer, app_config.retry_failed),
    )
    .with_multi_progress(multi);
    let summary = swarm.run(cancel).await?;

    print_summary(&summary, manifest.as_ref());
    Ok(())
}

fn print_configuration(app_config: &AppConfig, buckets: &[String]) {
    cli_style::print_section_header("Configuration");
    cli_style::print_key_value("Buckets", &buckets.len().to_string());
    for bucket in buckets {
        cli_style::print_list_item(bucket);
    }
    cli_style::print_key_value("Destination", &app_config.destination.display().to_string());
    cli_style::print_key_value("Manifest", &app_config.manifest.display().to_string());
    cli_style::print_key_value("AWS profile", &app_config.profile);
    cli_style::print_key_value("Workers", &app_config.transfer.max_workers.to_string());
    cli_style::print_key_value("Max retries", &app_config.transfer.max_retries.to_string());
    cli_style::print_section_footer();
}

fn print_summary(summary: &RunSummary, manifest: &dyn ManifestStore) {
    let stats = manifest.stats();

    cli_style::print_section_header("Download Summary");
    cli_style::print_key_value("Completed this run", &summary.completed.to_string());
    cli_style::print_key_value("Failed this run", &summary.failed.to_string());
    cli_style::print_key_value("Retries", &summary.retries.to_string());
    cli_style::print_key_value("Pending", &summary.pending.to_string());
    cli_style::print_key_value(
        "Manifest",
        &format!(
            "{}/{} completed, {} failed",
            stats.counts.completed,
            stats.total_jobs(),
            stats.counts.failed
        ),
    );
    cli_style::print_key_value_highlight("Downloaded", &format_size(summary.bytes));
    cli_style::print_key_value("Total time", &format_duration(summary.elapsed));
    cli_style::print_key_value("Average rate", &format_rate(summary.average_rate()));
    cli_style::print_section_footer();

    if summary.session_lost() {
        cli_style::print_warning(
            "Credentials expired during the run. Log in again and rerun to resume.",
        );
    }
    if summary.interrupted {
        cli_style::print_warning("Run interrupted. Run again to resume pending downloads.");
    }
    if summary.timed_out {
        cli_style::print_warning(
            "Some transfers were aborted at shutdown and will restart on the next run.",
        );
    }
    if stats.counts.failed > 0 {
        cli_style::print_info(
            "Use --show-failed to inspect failures and --retry-failed to retry them.",
        );
    } else if summary.pending == 0 && !summary.interrupted {
        cli_style::print_success("All downloads complete.");
    }
}

fn show_failed(app_config: &AppConfig) -> Result<()> {
    if !app_config.manifest.exists() {
        cli_style::print_empty_list(&format!(
            "No manifest at {}",
            app_config.manifest.display()
        ));
        return Ok(());
    }

    let manifest = JsonManifestStore::load_or_create(&app_config.manifest)?;
    let failed = manifest.failed_items();

    cli_style::print_section_header("Failed Downloads");
    if failed.is_empty() {
        cli_style::print_empty_list("No failed downloads");
        cli_style::print_section_footer();
        return Ok(());
    }

    let mut table = TableBuilder::new(&["Bucket", "Path", "Size", "Updated", "Error"]);
    for job in &failed {
        let path = if job.file_path.is_empty() {
            format!("{}/{}", job.folder, job.filename)
        } else {
            job.file_path.clone()
        };
        table.add_row(vec![
            job.bucket.clone(),
            path,
            format_size(job.size),
            job.last_updated
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default(),
            job.error.clone().unwrap_or_default(),
        ]);
    }
    table.print();
    cli_style::print_key_value("Failed", &failed.len().to_string());
    cli_style::print_section_footer();
    Ok(())
}
