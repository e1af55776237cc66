//! Scripted experiment run against the simulated stimulator
//!
//! # Usage
//!
//! ```bash
//! # Short built-in configuration
//! stim-demo
//!
//! # Configuration file and a device error flag on channel 3
//! stim-demo --config stim.toml --inject-fault 3
//! ```

use clap::Parser;
use nerve_stim_core::config::{ConfigLoader, ExperimentConfig};
use nerve_stim_core::experiment::{
    BodyLocation, CalibrationState, ChannelElectrodeMap, ChannelSelection, ExperimentState,
    PhaseController, Sensation, SensationType, SensoryState, TracingPresenter, TracingSink,
    TrialSequencer,
};
use nerve_stim_core::hal::{ChannelId, DeviceSession, SimulatedStimulator, SimulatorConfig};
use nerve_stim_core::runtime::ControlLoop;
use nerve_stim_core::stimulation::StimulationScheduler;
use nerve_stim_core::utils::MonotonicTimeProvider;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Calibration answers given by the scripted participant, in order
const INTENSITY_SCRIPT: [&str; 4] = ["Nothing", "Weak", "Strong", "Very strong"];

/// Nerve stimulation experiment demo
#[derive(Parser, Debug)]
#[command(name = "stim-demo")]
#[command(author, version, about = "Scripted calibration and sensory phase on a simulated stimulator", long_about = None)]
struct Cli {
    /// TOML configuration; a short built-in configuration when absent
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging filter, e.g. `debug` or `nerve_stim_core=trace`
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Raise the error flag of this channel once the sensory phase begins
    #[arg(long)]
    inject_fault: Option<u8>,
}

fn demo_config() -> ExperimentConfig {
    let mut config = ExperimentConfig::default();
    config.stimulation.stim_duration_s = 2.5;
    config.experiment.n_blocks = 2;
    config.experiment.n_trials_per_block = 2;
    config.experiment.countdown_s = 1;
    config
}

fn scripted_sensations(rng: &mut StdRng) -> Vec<Sensation> {
    if rng.gen_bool(0.2) {
        return Vec::new();
    }
    vec![Sensation::new(
        SensationType::Tingling,
        rng.gen_range(1..=10),
        vec![BodyLocation::D1, BodyLocation::S1],
    )]
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // RUST_LOG takes precedence over --log-level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("{} v{}", nerve_stim_core::NAME, nerve_stim_core::VERSION);

    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_path(path)?,
        None => demo_config(),
    };
    let fault_channel = cli.inject_fault.map(ChannelId::new).transpose()?;

    let clock = MonotonicTimeProvider::shared();
    let device = SimulatedStimulator::new(
        SimulatorConfig {
            available_ports: vec![config.device.port_name.clone()],
            ..SimulatorConfig::default()
        },
        clock.clone(),
    );
    let device_handle = device.handle();

    let mut session = DeviceSession::new(device, clock.clone());
    session.open(&config.device.port_name)?;
    session.handshake(config.handshake_timeout())?;
    session.enable_mid_level()?;

    let mut rng = match config.experiment.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let sequencer = TrialSequencer::generate(
        config.experiment.n_blocks,
        config.experiment.n_trials_per_block,
        &ChannelElectrodeMap::builtin(),
        &ChannelSelection::default(),
        &mut rng,
    )?;

    let scheduler = StimulationScheduler::new(session, config.timing.clone());
    let mut controller =
        PhaseController::new(scheduler, sequencer, config, TracingPresenter, TracingSink)?;
    let control = ControlLoop::new(clock);

    let mut intensities = INTENSITY_SCRIPT.iter();
    let mut pending_fault = fault_channel;
    controller.begin()?;
    loop {
        control.run(&mut controller).await?;

        match controller.state().clone() {
            ExperimentState::Calibration(CalibrationState::AwaitIntensity) => {
                let label = intensities.next().copied().unwrap_or("Very strong");
                info!(label, "Participant reports");
                controller.submit_intensity_label(label)?;
            }
            ExperimentState::Calibration(CalibrationState::Complete) => {
                controller.continue_to_sensory()?;
                if let Some(channel) = pending_fault.take() {
                    device_handle.inject_fault(channel);
                }
                controller.begin()?;
            }
            ExperimentState::Sensory(SensoryState::AwaitSensations) => {
                controller.submit_sensations(scripted_sensations(&mut rng))?;
            }
            ExperimentState::Sensory(SensoryState::BlockEnd) => {
                controller.continue_after_block()?;
            }
            ExperimentState::Faulted { reason, .. } => {
                warn!(%reason, "Operator acknowledges the fault and repeats the trial");
                device_handle.clear_faults();
                controller.acknowledge_fault()?;
            }
            ExperimentState::Calibration(CalibrationState::AwaitStart)
            | ExperimentState::Sensory(SensoryState::AwaitStart) => controller.begin()?,
            ExperimentState::Sensory(SensoryState::Complete) | ExperimentState::Aborted => break,
            state => {
                warn!(?state, "Nothing scheduled, aborting");
                controller.abort()?;
                break;
            }
        }
    }

    info!(
        amplitude_ma = controller.amplitude_ma(),
        calibration_reports = controller.records().calibration().len(),
        trials = controller.records().sensations().len(),
        max_gap_ms = device_handle.max_activity_gap().as_millis() as u64,
        "Demo finished"
    );
    Ok(())
}
