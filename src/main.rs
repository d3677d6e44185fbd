use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use pass_batch::batch::JobLauncher;
use pass_batch::config;
use pass_batch::db;
use pass_batch::jobs::{self, JobName};
use pass_batch::notifier::{NotificationSender, WebhookNotifier};

#[derive(Debug, Parser)]
#[command(author, version, about = "Run one pass maintenance job and exit")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Launch a job with a fresh run id
    Run {
        #[arg(value_enum)]
        job: JobName,
    },
    /// Print the most recent job runs
    History {
        #[arg(long, default_value = "20")]
        limit: i64,
    },
    /// List registered jobs and their steps
    Jobs,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let sender: Arc<dyn NotificationSender> =
        Arc::new(WebhookNotifier::from_config(&cfg.notification)?);

    if let Command::Jobs = args.command {
        for name in JobName::ALL {
            let job = jobs::build(name, &cfg, sender.clone());
            println!("{}\t{}", job.name(), job.step_names().join(" -> "));
        }
        return Ok(());
    }

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    match args.command {
        Command::Run { job } => {
            let job = jobs::build(job, &cfg, sender);
            let launcher = JobLauncher::new(pool.clone(), cfg.batch.stale_after());

            let report = launcher.run(&job, Utc::now()).await?;
            for step in &report.steps {
                info!(
                    step = %step.name,
                    status = step.status.as_str(),
                    read = step.report.read_count,
                    filtered = step.report.filter_count,
                    skipped = step.report.skip_count,
                    written = step.report.write_count,
                    chunks = step.report.commit_count,
                    "step finished"
                );
            }
            pool.close().await;
            if let Err(err) = report.into_result() {
                error!(error = %err, "job failed");
                return Err(err.into());
            }
        }
        Command::History { limit } => {
            for run in db::latest_job_runs(&pool, limit).await? {
                println!(
                    "{}\t{}\t{}\t{}\t{}\t{}",
                    run.run_id,
                    run.job_name,
                    run.status.as_str(),
                    run.started_at.to_rfc3339(),
                    run.ended_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
                    run.exit_message.unwrap_or_default()
                );
            }
        }
        Command::Jobs => {}
    }

    Ok(())
}
