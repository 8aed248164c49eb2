//! Logging setup (`SPEC_FULL.md` §1): `tracing` + `tracing-subscriber`,
//! wired the way `moltis-cli`'s `init_telemetry` does it — an `EnvFilter`
//! seeded from `RUST_LOG` or a CLI-supplied level, with a plain or JSON
//! formatting layer depending on `--json-logs`.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init_telemetry(log_level: &str, json_logs: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if json_logs {
        registry.with(fmt::layer().json().with_target(true).with_thread_ids(false)).init();
    } else {
        registry.with(fmt::layer().with_target(false).with_thread_ids(false)).init();
    }
}
