//! Passgate simulator - drives the authentication engine with a scripted sensor

mod script;
mod sensor;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use passgate_core::{
    AuthEvent, AuthResult, Authenticator, CapabilityProbe, EngineConfig, Enrollment,
    EnrollmentProbe, ErrorKind, EventDisposition, FactorGate, GateDecision, SoftwareKeyStore,
    StartOutcome, UnlockPolicy,
};

use crate::script::Script;
use crate::sensor::{ScriptedSensor, SensorMessage};

/// Environment variable overriding the config location
const CONFIG_ENV: &str = "PASSGATE_CONFIG";

/// Passgate simulator
#[derive(Parser)]
#[command(name = "passgate-sim")]
#[command(about = "Run the Passgate authentication engine against a scripted sensor")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the engine configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show whether a scan could be attempted on the simulated device
    Probe {
        #[command(flatten)]
        device: DeviceArgs,
    },

    /// Run authentication attempts
    Run {
        #[command(flatten)]
        device: DeviceArgs,

        /// Sensor script for one attempt; repeat for more attempts
        #[arg(long = "events", required = true)]
        events: Vec<Script>,

        /// Change the enrollment after this many attempts
        #[arg(long)]
        re_enroll_after: Option<usize>,

        /// Leave the screen this long after each scan opens
        #[arg(long)]
        stop_after_ms: Option<u64>,

        /// Delay between scripted sensor events
        #[arg(long, default_value = "50")]
        step_delay_ms: u64,

        /// PIN entered before the first attempt
        #[arg(long)]
        pin: Option<String>,

        /// PIN the entered one is compared against
        #[arg(long, default_value = "1234")]
        expected_pin: String,

        /// Require both PIN and fingerprint
        #[arg(long)]
        require_both: bool,
    },

    /// Write the default engine configuration
    InitConfig {
        /// Output path (defaults to the resolved config path)
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

/// Simulated device state
#[derive(Args, Clone, Copy)]
struct DeviceArgs {
    /// Device has no fingerprint sensor
    #[arg(long)]
    no_hardware: bool,

    /// OS is too old for fingerprint authentication
    #[arg(long)]
    unsupported_platform: bool,

    /// No fingerprint is enrolled
    #[arg(long)]
    no_enrollment: bool,
}

impl DeviceArgs {
    fn enrollment(&self) -> Enrollment {
        if self.no_enrollment {
            Enrollment::new()
        } else {
            Enrollment::with_credentials(["right-thumb"])
        }
    }

    fn probe(&self, enrollment: &Enrollment) -> EnrollmentProbe {
        let mut probe = EnrollmentProbe::new(enrollment.clone());
        probe.hardware_present = !self.no_hardware;
        probe.platform_supported = !self.unsupported_platform;
        probe
    }
}

/// What a run ended with
#[derive(Debug, Default)]
struct RunSummary {
    /// Scans that authenticated
    authenticated: usize,
    /// Kind of every terminal failure, in order
    failures: Vec<ErrorKind>,
    unlocked: bool,
}

struct RunOptions {
    scripts: Vec<Script>,
    re_enroll_after: Option<usize>,
    stop_after: Option<Duration>,
    step_delay: Duration,
    pin: Option<String>,
    expected_pin: String,
    unlock_policy: UnlockPolicy,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "passgate_sim=info,passgate_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config, std::env::var(CONFIG_ENV).ok());

    match cli.command {
        Commands::Probe { device } => {
            let enrollment = device.enrollment();
            let outcome = device.probe(&enrollment).check();
            match outcome.preflight() {
                None => println!("{:?}: biometric authentication available", outcome),
                Some(notice) => println!("{:?}: {}", outcome, notice.message()),
            }
        }

        Commands::Run {
            device,
            events,
            re_enroll_after,
            stop_after_ms,
            step_delay_ms,
            pin,
            expected_pin,
            require_both,
        } => {
            let config = load_config(&config_path)?;
            let options = RunOptions {
                scripts: events,
                re_enroll_after,
                stop_after: stop_after_ms.map(Duration::from_millis),
                step_delay: Duration::from_millis(step_delay_ms),
                pin,
                expected_pin,
                unlock_policy: if require_both {
                    UnlockPolicy::AllFactors
                } else {
                    UnlockPolicy::AnyFactor
                },
            };
            let summary = run(device, config, options).await?;
            debug!(?summary, "Run finished");
        }

        Commands::InitConfig { path } => {
            let path = path.unwrap_or(config_path);
            if path.exists() {
                error!("Config already exists at {:?}. Refusing to overwrite.", path);
                return Ok(());
            }
            EngineConfig::default()
                .save(&path)
                .with_context(|| format!("writing {}", path.display()))?;
            info!("Created default config at {:?}", path);
        }
    }

    Ok(())
}

async fn run(
    device: DeviceArgs,
    config: EngineConfig,
    options: RunOptions,
) -> anyhow::Result<RunSummary> {
    let enrollment = device.enrollment();
    let probe = device.probe(&enrollment);
    let store = SoftwareKeyStore::new(enrollment.clone());
    let (sensor, mut sensor_rx) = ScriptedSensor::new(options.step_delay);

    info!(config = %serde_json::to_string(&config)?, "Starting engine");
    let (mut auth, mut events) = Authenticator::new(probe, store, sensor, config);
    let mut gate = FactorGate::new(options.unlock_policy);
    let mut summary = RunSummary::default();

    if let Some(pin) = &options.pin {
        let decision = gate.record_pin(*pin == options.expected_pin);
        info!(?decision, "PIN entered");
    }

    for (index, script) in options.scripts.into_iter().enumerate() {
        if options.re_enroll_after == Some(index) {
            enrollment.enroll(format!("finger-{}", index))?;
            warn!("Enrollment changed, existing keys are invalidated");
        }

        let attempt = index + 1;
        info!(attempt, steps = script.len(), "Starting attempt");
        auth.sensor_mut().load(script);

        let scan = match auth.start() {
            StartOutcome::Scanning(scan) => scan,
            StartOutcome::Preflight(notice) => {
                info!(attempt, "Fall back to PIN: {}", notice.message());
                deliver(&mut events, &mut gate, &mut summary);
                continue;
            }
            StartOutcome::Failed(record) => {
                warn!(attempt, kind = ?record.kind, "Attempt failed before scanning");
                deliver(&mut events, &mut gate, &mut summary);
                continue;
            }
        };

        let deadline = options.stop_after.map(|after| tokio::time::Instant::now() + after);
        while auth.is_scanning() {
            let message = tokio::select! {
                message = sensor_rx.recv() => message,
                _ = sleep_until(deadline) => {
                    info!(scan = %scan, "Leaving the protected screen");
                    auth.stop();
                    break;
                }
            };

            match message {
                Some(SensorMessage::Event { scan, event }) => {
                    if auth.handle_event(scan, event) == EventDisposition::Discarded {
                        debug!(scan = %scan, "Stale sensor event");
                    }
                }
                Some(SensorMessage::Idle(idle)) if idle == scan => {
                    info!(scan = %scan, "Sensor script exhausted, canceling");
                    auth.stop();
                }
                Some(SensorMessage::Idle(_)) => {}
                None => {
                    auth.stop();
                    anyhow::bail!("sensor channel closed");
                }
            }
            deliver(&mut events, &mut gate, &mut summary);
        }
        deliver(&mut events, &mut gate, &mut summary);
    }

    summary.unlocked = gate.is_unlocked();
    if summary.unlocked {
        info!("Protected screen unlocked");
    } else {
        info!("Protected screen still locked");
    }
    Ok(summary)
}

/// Drain engine events into the log and the unlock gate
fn deliver(
    events: &mut tokio::sync::mpsc::UnboundedReceiver<AuthEvent>,
    gate: &mut FactorGate,
    summary: &mut RunSummary,
) {
    while let Ok(event) = events.try_recv() {
        match &event {
            AuthEvent::Preflight(notice) => {
                info!(kind = ?notice.kind(), "{}", notice.message());
            }
            AuthEvent::Progress { scan, record } => {
                info!(scan = %scan, code = record.code, "{}", record.message);
            }
            AuthEvent::Completed {
                scan,
                result: AuthResult::Success(token),
            } => {
                summary.authenticated += 1;
                let sealed = token.seal(token.payload());
                info!(
                    scan = ?scan,
                    key = %token.key_alias(),
                    payload = %hex::encode(token.payload()),
                    sealed_len = sealed.as_ref().map(Vec::len).unwrap_or(0),
                    "Fingerprint authenticated"
                );
            }
            AuthEvent::Completed {
                scan,
                result: AuthResult::Failure(record),
            } => {
                summary.failures.push(record.kind);
                warn!(
                    scan = ?scan,
                    kind = ?record.kind,
                    code = record.code,
                    "{}",
                    record.message
                );
            }
        }

        if let Some(decision) = gate.record_biometric(&event) {
            match decision {
                GateDecision::Unlocked => info!("Gate unlocked"),
                other => debug!(decision = ?other, "Gate decision"),
            }
        }
    }
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Config path: command line, then environment, then the user config dir
fn resolve_config_path(flag: Option<PathBuf>, env: Option<String>) -> PathBuf {
    flag.or_else(|| env.map(PathBuf::from)).unwrap_or_else(|| {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("passgate")
            .join("engine.json")
    })
}

fn load_config(path: &Path) -> anyhow::Result<EngineConfig> {
    if path.exists() {
        let config = EngineConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?;
        debug!("Loaded config from {:?}", path);
        Ok(config)
    } else {
        debug!("No config at {:?}, using defaults", path);
        Ok(EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_path_precedence() {
        let flag = PathBuf::from("/tmp/flag.json");
        assert_eq!(
            resolve_config_path(Some(flag.clone()), Some("/tmp/env.json".into())),
            flag
        );
        assert_eq!(
            resolve_config_path(None, Some("/tmp/env.json".into())),
            PathBuf::from("/tmp/env.json")
        );
        assert!(resolve_config_path(None, None).ends_with("passgate/engine.json"));
    }

    #[test]
    fn test_load_config_defaults_when_missing() {
        let temp = TempDir::new().unwrap();
        let config = load_config(&temp.path().join("missing.json")).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_load_config_reads_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("engine.json");
        let config = EngineConfig {
            max_unrecognized_attempts: Some(2),
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(load_config(&path).unwrap(), config);
    }

    #[test]
    fn test_cli_parses_multiple_attempts() {
        let cli = Cli::try_parse_from([
            "passgate-sim",
            "run",
            "--events",
            "help:dirty,nomatch",
            "--events",
            "success:ok",
            "--re-enroll-after",
            "1",
        ])
        .unwrap();

        let Commands::Run {
            events,
            re_enroll_after,
            ..
        } = cli.command
        else {
            panic!("expected run");
        };
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].len(), 2);
        assert_eq!(re_enroll_after, Some(1));
    }

    fn device() -> DeviceArgs {
        DeviceArgs {
            no_hardware: false,
            unsupported_platform: false,
            no_enrollment: false,
        }
    }

    fn options(scripts: &[&str]) -> RunOptions {
        RunOptions {
            scripts: scripts.iter().map(|s| s.parse().unwrap()).collect(),
            re_enroll_after: None,
            stop_after: None,
            step_delay: Duration::from_millis(1),
            pin: None,
            expected_pin: "1234".into(),
            unlock_policy: UnlockPolicy::AnyFactor,
        }
    }

    #[tokio::test]
    async fn test_run_authenticates_after_retry() {
        let options = options(&["nomatch,help:dirty", "success:ok"]);
        let summary = run(device(), EngineConfig::default(), options)
            .await
            .unwrap();

        assert_eq!(summary.authenticated, 1);
        assert!(summary.failures.is_empty());
        assert!(summary.unlocked);
    }

    #[tokio::test]
    async fn test_run_re_enrollment_invalidates_key() {
        let mut options = options(&["success:first", "success:second", "success:third"]);
        options.re_enroll_after = Some(1);

        let summary = run(device(), EngineConfig::default(), options).await.unwrap();

        // The attempt after the change fails; the one after that regenerates
        assert_eq!(summary.failures, vec![ErrorKind::KeyInvalidated]);
        assert_eq!(summary.authenticated, 2);
        assert!(summary.unlocked);
    }

    #[tokio::test]
    async fn test_run_without_hardware_needs_pin() {
        let device = DeviceArgs {
            no_hardware: true,
            ..device()
        };

        let summary = run(device, EngineConfig::default(), options(&["success:ok"]))
            .await
            .unwrap();
        assert_eq!(summary.authenticated, 0);
        assert!(!summary.unlocked);

        let mut with_pin = options(&["success:ok"]);
        with_pin.pin = Some("1234".into());
        let summary = run(device, EngineConfig::default(), with_pin).await.unwrap();
        assert!(summary.unlocked);
    }

    #[tokio::test]
    async fn test_run_attempt_limit() {
        let config = EngineConfig {
            max_unrecognized_attempts: Some(2),
            ..Default::default()
        };
        let summary = run(device(), config, options(&["nomatch,nomatch,success:late"]))
            .await
            .unwrap();

        assert_eq!(summary.failures, vec![ErrorKind::NonRecoverableScanError]);
        assert_eq!(summary.authenticated, 0);
        assert!(!summary.unlocked);
    }
}
