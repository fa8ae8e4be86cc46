use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use videocall_converter::dispatch::{self, LocalDispatcher, RunRequest};
use videocall_converter::pairing::pair;
use videocall_converter::pipeline::{JobContext, ProgressReporter, TracingSink};
use videocall_converter::store::{
    ConvertedFile, DeletableFile, FilePair, FinalArtifact, Fragment, MixedFile, RecordingStore,
};
use videocall_converter::{init_tracing, PipelineConfig, Sequencer};

/// Merge per-user video call recordings into one file per room
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert one room and print the merged file's path
    Run {
        room: String,
        /// Job id used in progress tokens
        #[arg(long)]
        job_id: Option<u64>,
    },
    /// Print what the scanner sees in a room directory
    Inspect { room: String },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RoomView {
    fragments: Vec<Fragment>,
    pairs: Vec<FilePair>,
    mixed: Vec<MixedFile>,
    converted: Vec<ConvertedFile>,
    final_artifact: Option<FinalArtifact>,
    deletable: Vec<DeletableFile>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let config = match args.config {
        Some(ref path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path))?,
        None => PipelineConfig::default(),
    };

    match args.command {
        Command::Run { room, job_id } => run(config, room, job_id).await,
        Command::Inspect { room } => inspect(config, room).await,
    }
}

async fn run(config: PipelineConfig, room: String, job_id: Option<u64>) -> Result<()> {
    let sequencer = Sequencer::from_config(config);

    let path = match job_id {
        Some(id) => {
            let reporter = ProgressReporter::new(JobContext::new(id, room), Arc::new(TracingSink));
            sequencer.run(&reporter).await?.artifact.path
        }
        None => {
            let dispatcher = Arc::new(LocalDispatcher::new());
            let id = dispatch::submit(
                dispatcher.as_ref(),
                RunRequest {
                    room_id: room,
                    priority: 0,
                },
            )
            .await?;
            dispatcher.run_all(&sequencer).await;

            let status = dispatcher
                .status(id)
                .context("Job disappeared from the queue")?;
            match dispatcher.artifact(id) {
                Some(path) => path,
                None => anyhow::bail!(
                    "Job {} failed: {}",
                    id,
                    status.reason.unwrap_or_default()
                ),
            }
        }
    };

    println!("{}", path.display());
    Ok(())
}

async fn inspect(config: PipelineConfig, room: String) -> Result<()> {
    let store = RecordingStore::new(config.videos_base_dir);

    let fragments = store.fragments(&room).await?;
    let view = RoomView {
        pairs: pair(&fragments),
        fragments,
        mixed: store.mixed(&room).await?,
        converted: store.converted(&room).await?,
        final_artifact: store.final_artifact(&room).await?,
        deletable: store.deletable(&room).await?,
    };

    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}
