use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use targetflow::cli::commands::{HistoryCommand, MetricsCommand, StatusCommand, UploadCommand, WaitArgs};
use targetflow::cli::output::*;
use targetflow::cli::{Cli, Command};
use targetflow::core::config::AppConfig;
use targetflow::core::{RunStatus, TriggerSource};
use targetflow::execution::{PipelineInvoker, RunLauncher};
use targetflow::persistence::{InMemoryStore, RunStore, SchemaStatus, SqliteStore, TargetStore};
use targetflow::service::{PipelineService, StatusReply, TriggerReply, WaitOutcome};
use targetflow::transform::TransformSubprocess;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

type Service = PipelineService<TransformSubprocess>;

/// Extra time allowed past the process timeout before giving up on a run
const WAIT_MARGIN: Duration = Duration::from_secs(30);

/// How `upload` and `rerun` follow a launched run
#[derive(Debug, Clone, Copy)]
struct Polling {
    interval: Duration,
    limit: Duration,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG takes precedence over --verbose
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "info" }));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    let mut config = match &cli.config {
        Some(path) => AppConfig::from_file(path).context("Failed to load config")?,
        None => AppConfig::default(),
    };
    if let Some(database) = &cli.database {
        config.database = Some(database.clone());
    }
    config.validate()?;

    let poll = Polling {
        interval: Duration::from_millis(config.poll_interval_ms),
        limit: Duration::from_secs(config.transform.timeout_secs) + WAIT_MARGIN,
    };
    let ok = match &cli.command {
        Command::Migrate => migrate(&config, cli.ephemeral).await?,
        Command::Upload(cmd) => {
            let service = build_service(&config, cli.ephemeral).await?;
            upload(&service, cmd, poll).await?
        }
        Command::Rerun(cmd) => {
            let service = build_service(&config, cli.ephemeral).await?;
            rerun(&service, &cmd.wait, poll).await?
        }
        Command::Status(cmd) => {
            let service = build_service(&config, cli.ephemeral).await?;
            show_status(&service, cmd, cli.verbose).await?
        }
        Command::History(cmd) => {
            let service = build_service(&config, cli.ephemeral).await?;
            show_history(&service, cmd).await?
        }
        Command::Metrics(cmd) => {
            let service = build_service(&config, cli.ephemeral).await?;
            show_metrics(&service, cmd).await?
        }
    };

    if !ok {
        std::process::exit(1);
    }

    Ok(())
}

async fn open_store(path: &Path) -> Result<SqliteStore> {
    SqliteStore::open(path)
        .await
        .with_context(|| format!("Failed to open database {}", path.display()))
}

async fn migrate(config: &AppConfig, ephemeral: bool) -> Result<bool> {
    if ephemeral {
        println!("{} Ephemeral stores need no migration", INFO);
        return Ok(true);
    }

    let path = config.database_path()?;
    let store = open_store(&path).await?;
    store.migrate().await.context("Failed to create tables")?;
    println!(
        "{} Database {} is ready",
        CHECK,
        style(path.display()).bold()
    );
    Ok(true)
}

async fn build_service(config: &AppConfig, ephemeral: bool) -> Result<Service> {
    let (runs, targets, schema): (Arc<dyn RunStore>, Arc<dyn TargetStore>, SchemaStatus) =
        if ephemeral {
            let store = Arc::new(InMemoryStore::new());
            let schema = store.schema_status();
            let runs: Arc<dyn RunStore> = store.clone();
            let targets: Arc<dyn TargetStore> = store;
            (runs, targets, schema)
        } else {
            let path = config.database_path()?;
            let store = open_store(&path).await?;
            if config.auto_migrate {
                store.migrate().await.context("Failed to create tables")?;
            }
            let schema = store.schema_status().await?;
            if let SchemaStatus::Missing(tables) = &schema {
                warn!(
                    "Tables missing from {}: {}. Run `targetflow migrate` to create them.",
                    path.display(),
                    tables.join(", ")
                );
            }
            let store = Arc::new(store);
            let runs: Arc<dyn RunStore> = store.clone();
            let targets: Arc<dyn TargetStore> = store;
            (runs, targets, schema)
        };

    let runner = TransformSubprocess::new(config.transform.clone());
    let invoker = PipelineInvoker::new(runner, runs.clone());
    let launcher = RunLauncher::new(invoker, config.max_concurrent_runs);

    Ok(PipelineService::new(runs, targets, launcher, schema)
        .with_ingest(config.ingest.clone())
        .with_processed_table(config.processed_table.clone()))
}

async fn upload(service: &Service, cmd: &UploadCommand, poll: Polling) -> Result<bool> {
    let report = match service.upload_file(&cmd.file).await {
        Ok(report) => report,
        Err(e) => {
            error!("Upload of {} failed: {}", cmd.file.display(), e);
            println!("{} Upload failed: {}", CROSS, style(e).red());
            return Ok(false);
        }
    };

    if cmd.wait.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let icon = if report.trigger.http_status() == 200 { CHECK } else { WARN };
        println!("{} {}", icon, report.message);
        if report.dropped_rows > 0 {
            println!(
                "{} {} of {} rows had an unreadable date or amount and were skipped",
                WARN,
                style(report.dropped_rows).yellow(),
                report.total_rows
            );
        }
        println!("  Columns: {}", style(report.columns.join(", ")).dim());
        for row in &report.preview {
            let cells: Vec<String> = row
                .values
                .iter()
                .map(|(column, value)| format!("{}={}", column, value))
                .collect();
            println!("    {}", style(cells.join(", ")).dim());
        }
        print_fallback_output(&report.trigger);
    }

    finish_trigger(service, &report.trigger, &cmd.wait, poll).await
}

async fn rerun(service: &Service, wait: &WaitArgs, poll: Polling) -> Result<bool> {
    let reply = service.trigger(TriggerSource::Rerun).await;

    if wait.json {
        println!("{}", serde_json::to_string_pretty(&reply)?);
    } else {
        let body = reply.body();
        match &reply {
            TriggerReply::Accepted(run) => println!(
                "{} Pipeline run {} started",
                ROCKET,
                style(format!("#{}", run.id)).bold()
            ),
            TriggerReply::Fallback(result) if result.success => println!("{} {}", CHECK, body.message),
            TriggerReply::Busy => println!("{} {}", WARN, body.message),
            _ => println!("{} {}", CROSS, style(&body.message).red()),
        }
        print_fallback_output(&reply);
    }

    finish_trigger(service, &reply, wait, poll).await
}

fn print_fallback_output(reply: &TriggerReply) {
    if let TriggerReply::Fallback(result) = reply {
        if let Some(error) = &result.error {
            println!("  Error: {}", style(error).red());
        }
        if let Some(output) = result.output.as_deref().filter(|o| !o.is_empty()) {
            println!("{}", format_output(output, 10));
        }
    }
}

/// Decide the exit status for a trigger, polling the run if one was launched
async fn finish_trigger(
    service: &Service,
    reply: &TriggerReply,
    wait: &WaitArgs,
    poll: Polling,
) -> Result<bool> {
    match reply {
        TriggerReply::Accepted(_) if wait.no_wait => {
            warn!("Not waiting for the run; it stops when this process exits");
            Ok(true)
        }
        TriggerReply::Accepted(run) => follow_run(service, run.id, poll, wait.json).await,
        TriggerReply::Fallback(result) => Ok(result.success),
        TriggerReply::Busy | TriggerReply::Failed(_) => Ok(false),
    }
}

/// Poll a run until it reaches a terminal state or the wait limit passes
async fn follow_run(service: &Service, id: i64, poll: Polling, json: bool) -> Result<bool> {
    let spinner = create_spinner(format!("Run #{} is pending", id));
    let outcome = service
        .wait_for_run(id, poll.interval, poll.limit, |run| {
            spinner.set_message(format!("Run #{} is {}", id, run.status));
        })
        .await;
    spinner.finish_and_clear();

    match outcome {
        WaitOutcome::Finished(run) => {
            let succeeded = run.status == RunStatus::Success;
            if succeeded {
                info!("Run {} completed successfully", id);
            }
            print_status_reply(&StatusReply::Found(run), json, !succeeded)?;
            Ok(succeeded)
        }
        WaitOutcome::Lost(reply) => {
            print_status_reply(&reply, json, false)?;
            Ok(false)
        }
        WaitOutcome::TimedOut(last) => {
            let status = last
                .map(|run| run.status.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            println!(
                "{} Run #{} is still {} after {}s; check it later with `targetflow status {}`",
                CROSS,
                id,
                style(status).yellow(),
                poll.limit.as_secs(),
                id
            );
            Ok(false)
        }
    }
}

fn print_status_reply(reply: &StatusReply, json: bool, verbose: bool) -> Result<()> {
    if json {
        let mut body = reply.body();
        if let (Some(run), true) = (reply.run(), verbose) {
            body["output"] = serde_json::json!(run.output);
            body["error"] = serde_json::json!(run.error);
        }
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    match reply {
        StatusReply::Found(run) => {
            println!("{}", separator());
            println!("{}", format_run_details(run, verbose));
        }
        StatusReply::NotFound(_) | StatusReply::Unavailable(_) => {
            let body = reply.body();
            println!("{} {}", WARN, body["message"].as_str().unwrap_or("Run not found"));
        }
        StatusReply::Failed(e) => println!("{} {}", CROSS, style(e).red()),
    }
    Ok(())
}

async fn show_status(service: &Service, cmd: &StatusCommand, verbose: bool) -> Result<bool> {
    let reply = service.status(cmd.id).await;
    print_status_reply(&reply, cmd.json, verbose)?;
    Ok(reply.http_status() == 200)
}

async fn show_history(service: &Service, cmd: &HistoryCommand) -> Result<bool> {
    let runs = match service.history(cmd.limit).await {
        Ok(runs) => runs,
        Err(e) => {
            error!("Failed to load run history: {}", e);
            println!("{} Could not load run history: {}", CROSS, style(e).red());
            return Ok(false);
        }
    };

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(true);
    }

    if runs.is_empty() {
        println!("{} No pipeline runs found", INFO);
        return Ok(true);
    }

    println!("{} Run history (showing latest {}):", INFO, cmd.limit);
    for run in &runs {
        println!("  {}", format_run_summary(run));
    }
    Ok(true)
}

async fn show_metrics(service: &Service, cmd: &MetricsCommand) -> Result<bool> {
    let metrics = service.metrics().await;
    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&metrics)?);
    } else {
        println!("{}", format_metrics(&metrics));
    }
    Ok(true)
}
