//! videocall-converter - one merged recording per video call room.
//!
//! Fragments written by the conference recorder are discovered by
//! filename, paired per user, muxed, normalized and merged into
//! `{room}.mkv` by an external ffmpeg. All state is derived from the
//! room directory on every run.

pub mod config;
pub mod dispatch;
pub mod pairing;
pub mod pipeline;
pub mod store;
pub mod transcoder;
pub mod utils;

pub use config::PipelineConfig;
pub use pipeline::{PipelineOutcome, Sequencer};
pub use utils::error::{PipelineError, PipelineResult};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "videocall_converter=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting videocall-converter v{}", env!("CARGO_PKG_VERSION"));
}
