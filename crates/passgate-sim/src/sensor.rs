//! Scripted fingerprint sensor
//!
//! Every opened scan gets its own task that replays a [`Script`] onto a
//! channel. The task stops as soon as the scan's token is canceled.

use std::time::Duration;

use passgate_core::{
    CancellationToken, CipherSession, HardwareEvent, ScanChannel, ScanId, SensorError,
};
use tokio::sync::mpsc;
use tracing::debug;

use crate::script::Script;

/// Messages from the simulated sensor
#[derive(Debug)]
pub enum SensorMessage {
    Event { scan: ScanId, event: HardwareEvent },
    /// The script ran out without ending the scan; the sensor keeps
    /// listening until canceled
    Idle(ScanId),
}

/// Sensor replaying one loaded script per scan
pub struct ScriptedSensor {
    pending: Option<Script>,
    step_delay: Duration,
    tx: mpsc::UnboundedSender<SensorMessage>,
}

impl ScriptedSensor {
    pub fn new(step_delay: Duration) -> (Self, mpsc::UnboundedReceiver<SensorMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sensor = Self {
            pending: None,
            step_delay,
            tx,
        };
        (sensor, rx)
    }

    /// Script for the next opened scan
    pub fn load(&mut self, script: Script) {
        self.pending = Some(script);
    }
}

impl ScanChannel for ScriptedSensor {
    fn open(
        &mut self,
        scan: ScanId,
        cipher: &CipherSession,
    ) -> Result<CancellationToken, SensorError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SensorError::OpenFailed(e.to_string()))?;

        let script = self.pending.take().unwrap_or_default();
        debug!(scan = %scan, key = %cipher.alias(), steps = script.len(), "Sensor listening");

        let token = CancellationToken::new();
        runtime.spawn(replay(
            scan,
            script,
            self.step_delay,
            token.clone(),
            self.tx.clone(),
        ));
        Ok(token)
    }
}

async fn replay(
    scan: ScanId,
    script: Script,
    step_delay: Duration,
    token: CancellationToken,
    tx: mpsc::UnboundedSender<SensorMessage>,
) {
    for step in script.steps() {
        tokio::select! {
            _ = token.cancelled() => {
                debug!(scan = %scan, "Sensor stopped");
                return;
            }
            _ = tokio::time::sleep(step_delay) => {}
        }

        let message = SensorMessage::Event {
            scan,
            event: step.to_event(),
        };
        if tx.send(message).is_err() || step.ends_scan() {
            return;
        }
    }

    if !token.is_cancelled() {
        let _ = tx.send(SensorMessage::Idle(scan));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use passgate_core::{
        Enrollment, EngineConfig, KeyManager, KeyPolicy, SoftwareKeyStore,
    };

    fn cipher() -> CipherSession {
        let store = SoftwareKeyStore::new(Enrollment::with_credentials(["right-thumb"]));
        let policy = KeyPolicy::default();
        let mut keys = KeyManager::new(store, policy, EngineConfig::default().key_alias_prefix);
        let handle = keys.ensure_key().unwrap();
        CipherSession::init(keys.store(), &handle, &policy).unwrap()
    }

    #[tokio::test]
    async fn test_replays_until_terminal_step() {
        let (mut sensor, mut rx) = ScriptedSensor::new(Duration::from_millis(1));
        sensor.load("help:dirty,success:ok,help:never".parse().unwrap());

        let scan = ScanId::new(1);
        sensor.open(scan, &cipher()).unwrap();

        let first = rx.recv().await.unwrap();
        assert!(matches!(
            first,
            SensorMessage::Event {
                event: HardwareEvent::Help { .. },
                ..
            }
        ));
        let second = rx.recv().await.unwrap();
        assert!(matches!(
            second,
            SensorMessage::Event {
                event: HardwareEvent::Success { .. },
                ..
            }
        ));

        // The task ended after success, dropping its sender
        drop(sensor);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_stops_emission() {
        let (mut sensor, mut rx) = ScriptedSensor::new(Duration::from_secs(60));
        sensor.load("help:dirty".parse().unwrap());

        let token = sensor.open(ScanId::new(1), &cipher()).unwrap();
        token.cancel();

        drop(sensor);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_empty_script_reports_idle() {
        let (mut sensor, mut rx) = ScriptedSensor::new(Duration::from_millis(1));
        let scan = ScanId::new(3);
        sensor.open(scan, &cipher()).unwrap();

        assert!(matches!(rx.recv().await, Some(SensorMessage::Idle(id)) if id == scan));
    }
}
