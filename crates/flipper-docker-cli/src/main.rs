mod gelf;
mod logging;

use clap::Parser;
use flipper_docker_core::{
    hostname, install_signal_handler, ContainerSupervisor, RunLevelController, RunReport,
    RunState,
};
use flipper_docker_devices::{select_enumerator, DeviceLocator};
use flipper_docker_runtime::{check_docker_prereqs, format_missing, select_backend, RunnerIdentity};
use flipper_docker_schema::{default_config_path, Config};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::error;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 3;
pub const EXIT_RUN_ABORTED: u8 = 4;

#[derive(Debug, Parser)]
#[command(
    name = "flipper-docker",
    version,
    about = "Run an ephemeral CI runner bound to a Flipper and its ST-Link, repair level first"
)]
struct Cli {
    /// Serial of the target device; also names the container.
    flipper_id: String,

    /// Serial of the ST-Link programmer used to flash the target.
    st_link_id: String,

    /// Label the runner registers with.
    github_tag: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let host = hostname();
    let identity = RunnerIdentity::new(
        cli.flipper_id.as_str(),
        cli.st_link_id.as_str(),
        cli.github_tag.as_str(),
        &host,
    );

    let config_path = default_config_path();
    let loaded = Config::load(&config_path);
    let gelf = loaded.as_ref().ok().and_then(|c| c.gelf.as_ref());
    let _gelf = logging::init(gelf, &identity.hostname, &identity.runner_name());

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            error!("cannot use config {}: {e}", config_path.display());
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    match run(&config, identity) {
        Ok(report) => ExitCode::from(exit_code_for(&report)),
        Err(code) => ExitCode::from(code),
    }
}

fn run(config: &Config, identity: RunnerIdentity) -> Result<RunReport, u8> {
    let runner = &config.runner;
    if runner.backend == "docker" && std::env::var("FLIPPER_DOCKER_SKIP_PREREQS").as_deref() != Ok("1")
    {
        let missing = check_docker_prereqs();
        if !missing.is_empty() {
            error!("{}", format_missing(&missing));
            return Err(EXIT_FAILURE);
        }
    }

    let registration = config.registration().map_err(|e| {
        error!("{e}");
        EXIT_CONFIG_ERROR
    })?;
    let enumerator = select_enumerator(&runner.device_backend, &runner.sysfs_root, &runner.dev_root)
        .map_err(|e| {
            error!("{e}");
            EXIT_CONFIG_ERROR
        })?;
    let backend = select_backend(&runner.backend).map_err(|e| {
        error!("{e}");
        EXIT_CONFIG_ERROR
    })?;

    let mut controller = RunLevelController::new(
        identity,
        registration.clone(),
        runner.clone(),
        DeviceLocator::new(Arc::from(enumerator)),
        ContainerSupervisor::new(Arc::from(backend)),
    );
    install_signal_handler(controller.shutdown_signal(), controller.stopper());

    controller.run().map_err(|e| {
        error!("run failed: {e}");
        EXIT_FAILURE
    })
}

fn exit_code_for(report: &RunReport) -> u8 {
    if report.state == RunState::Done {
        EXIT_SUCCESS
    } else {
        EXIT_RUN_ABORTED
    }
}
