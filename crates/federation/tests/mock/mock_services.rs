use async_trait::async_trait;
use fleet_federation::{FederationError, ServiceManager};
use parking_lot::Mutex;

/// Records every service-manager call; `fail_stop` names a unit whose stop fails
#[derive(Default)]
pub struct RecordingServices {
    pub calls: Mutex<Vec<String>>,
    pub fail_stop: Option<String>,
}

impl RecordingServices {
    pub fn failing_stop(unit: &str) -> Self {
        Self {
            fail_stop: Some(unit.to_string()),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ServiceManager for RecordingServices {
    async fn start(&self, unit: &str) -> Result<(), FederationError> {
        self.calls.lock().push(format!("start {}", unit));
        Ok(())
    }

    async fn stop(&self, unit: &str) -> Result<(), FederationError> {
        self.calls.lock().push(format!("stop {}", unit));
        if self.fail_stop.as_deref() == Some(unit) {
            return Err(FederationError::Service {
                unit: unit.to_string(),
                reason: "unit not loaded".to_string(),
            });
        }
        Ok(())
    }

    async fn restart(&self, unit: &str) -> Result<(), FederationError> {
        self.calls.lock().push(format!("restart {}", unit));
        Ok(())
    }

    async fn daemon_reload(&self) -> Result<(), FederationError> {
        self.calls.lock().push("daemon-reload".to_string());
        Ok(())
    }
}
