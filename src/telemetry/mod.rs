//! Tracing bootstrap for applications embedding the engine.
//!
//! Installs an `EnvFilter`-driven subscriber with span-trace capture.
//! Initialization is best-effort: a subscriber installed by the host
//! application wins and this becomes a no-op.

use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, prelude::*};

/// Initialize the global tracing subscriber.
///
/// `log_level` takes precedence (any `EnvFilter` directive, e.g. `"info"`
/// or `"gategraph=debug"`); otherwise `RUST_LOG` applies, with `info` as
/// the fallback. `.env` files are loaded first so `RUST_LOG` can live
/// there.
pub fn init(log_level: Option<&str>) {
    let _ = dotenvy::dotenv();
    let filter = match log_level {
        Some(level) => EnvFilter::try_new(level).map_err(|e| e.to_string()),
        None => EnvFilter::try_from_default_env().map_err(|e| e.to_string()),
    }
    .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(ErrorLayer::default())
        .try_init();
}
