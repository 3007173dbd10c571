use blob_file_output::config::OutputConfig;
use blob_file_output::error::UploadError;
use blob_file_output::infrastructure::storage;
use blob_file_output::models::TaskReport;
use blob_file_output::services::storage::ObjectStore;
use blob_file_output::services::session::UploadSession;
use clap::Parser;
use dotenvy::dotenv;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input files, each written to object storage by its own task
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Task index assigned to the first input
    #[arg(long, default_value_t = 0)]
    task_offset: u32,

    /// Start a new output file once the current one reaches this many bytes
    #[arg(long, default_value_t = 256 * 1024 * 1024)]
    max_file_size: u64,

    /// Size of each buffer handed to the session
    #[arg(long, default_value_t = 64 * 1024)]
    buffer_size: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blob_file_output=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting blob file output for {} tasks...", args.inputs.len());

    let config = Arc::new(OutputConfig::from_env()?);
    info!(
        "⚙️  Output Config: Prefix={}, Format={}, Ext={}, Max Retry={}",
        config.path_prefix, config.sequence_format, config.file_ext, config.max_connection_retry
    );

    let store: Arc<dyn ObjectStore> = storage::setup_storage(&config).await;
    storage::prepare_container(store.as_ref(), &config.container).await?;

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Interrupt received, cancelling uploads");
            signal_cancel.cancel();
        }
    });

    let mut handles = Vec::new();
    for (position, input) in args.inputs.iter().enumerate() {
        let task_index = task_index_at(args.task_offset, position)?;
        let input = input.clone();
        let config = config.clone();
        let store = store.clone();
        let cancel = cancel.child_token();
        let (max_file_size, buffer_size) = (args.max_file_size, args.buffer_size);

        handles.push(tokio::spawn(async move {
            let result = run_task(
                task_index,
                &input,
                &config,
                store,
                cancel,
                max_file_size,
                buffer_size,
            )
            .await;
            (task_index, result)
        }));
    }

    let mut reports = Vec::new();
    let mut failures = 0;
    for joined in futures::future::join_all(handles).await {
        match joined? {
            (_, Ok(report)) => reports.push(report),
            (task_index, Err(e)) => {
                error!("❌ Task {} failed: {}", task_index, e);
                failures += 1;
            }
        }
    }

    println!("{}", serde_json::to_string_pretty(&reports)?);

    if failures > 0 {
        anyhow::bail!("{} of {} tasks failed", failures, args.inputs.len());
    }
    info!("✅ All tasks committed.");
    Ok(())
}

/// Task index of the input at `position`. Errors instead of wrapping.
fn task_index_at(offset: u32, position: usize) -> anyhow::Result<u32> {
    match u32::try_from(position)
        .ok()
        .and_then(|position| offset.checked_add(position))
    {
        Some(task_index) => Ok(task_index),
        None => anyhow::bail!(
            "task index overflows: offset {} plus input position {}",
            offset,
            position
        ),
    }
}

async fn run_task(
    task_index: u32,
    input: &Path,
    config: &OutputConfig,
    store: Arc<dyn ObjectStore>,
    cancel: CancellationToken,
    max_file_size: u64,
    buffer_size: usize,
) -> Result<TaskReport, UploadError> {
    let mut session = UploadSession::new(task_index, config, store)?.with_cancellation(cancel);

    match write_input(&mut session, input, max_file_size, buffer_size).await {
        Ok(()) => {
            let report = session.commit()?;
            info!(
                "📦 Task {} committed {} files ({} bytes)",
                task_index,
                report.files.len(),
                report.total_bytes()
            );
            Ok(report)
        }
        Err(e) => {
            session.abort();
            Err(e)
        }
    }
}

async fn write_input(
    session: &mut UploadSession,
    input: &Path,
    max_file_size: u64,
    buffer_size: usize,
) -> Result<(), UploadError> {
    let reader = tokio::fs::File::open(input).await?;
    let mut chunks = ReaderStream::with_capacity(reader, buffer_size);

    session.next_file().await?;
    let mut current_size = 0u64;
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        if current_size > 0 && current_size + chunk.len() as u64 > max_file_size {
            session.next_file().await?;
            current_size = 0;
        }
        current_size += chunk.len() as u64;
        session.add(chunk).await?;
    }
    session.finish().await
}
