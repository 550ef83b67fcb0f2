use crate::supervisor::ContainerStopper;
use flipper_docker_runtime::StopOutcome;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Shared "stop after the current step" flag.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Handle SIGINT/SIGTERM: the first signal marks shutdown and stops the live
/// container so the blocking wait returns; a second one exits immediately.
pub fn install_signal_handler(signal: ShutdownSignal, stopper: ContainerStopper) {
    let result = ctrlc::set_handler(move || on_signal(&signal, &stopper));
    if let Err(e) = result {
        warn!("failed to install signal handler: {e}");
    }
}

fn on_signal(signal: &ShutdownSignal, stopper: &ContainerStopper) {
    if signal.is_requested() {
        std::process::exit(1);
    }
    signal.request();
    eprintln!("\nshutdown requested, stopping runner container...");
    match stopper.force_stop() {
        Ok(StopOutcome::Stopped) => info!("container stopped due to app exit"),
        Ok(StopOutcome::NotFound) => info!("nothing to stop, no container is live"),
        Err(e) => warn!("failed to stop container on shutdown: {e}"),
    }
}
