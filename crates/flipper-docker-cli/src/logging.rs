use crate::gelf::{GelfGuard, GelfLayer};
use flipper_docker_schema::GelfSection;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "FLIPPER_DOCKER_LOG";
const DEFAULT_FILTER: &str = "info,flipper_docker=debug";

/// Console output always; GELF shipping only when a `[gelf]` section exists.
/// Hold the returned guard until exit so queued messages are flushed.
pub fn init(gelf: Option<&GelfSection>, host: &str, runner_name: &str) -> Option<GelfGuard> {
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let console = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    let (shipper, guard) = gelf
        .map(|section| GelfLayer::https(section, host, runner_name))
        .unzip();

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(shipper)
        .try_init();
    if let Err(e) = result {
        eprintln!("warning: logging already initialised: {e}");
    }
    guard
}
