pub mod error;
pub mod types;
pub mod model;
pub mod ml;
pub mod server;

use tracing_subscriber::prelude::*;

/// ログ出力を初期化（`RUST_LOG` 未指定時は info）
pub fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
