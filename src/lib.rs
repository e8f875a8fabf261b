pub mod args;
pub mod error;
pub mod extract;
pub mod plot;
pub mod report;
pub mod run_main;
pub mod scheduler;
pub mod settings;
pub mod sink;
pub mod template;
pub mod trial;
pub mod types;

use tracing::metadata::LevelFilter;

pub fn default_level(verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    }
}

/// install the global subscriber, `RUST_LOG` wins over the default level
pub fn init_logger(verbose: bool) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level(verbose).into())
                .from_env_lossy(),
        )
        .try_init()
        .unwrap_or_else(|e| {
            eprintln!("failed to init logger: {}", e);
        });
}
