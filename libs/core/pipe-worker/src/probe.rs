//! Health probe
//!
//! A [`HealthProbe`] owns one composite [`HealthStatus`]. Updates are sent
//! to a single mailbox task that applies them in order; readers get the
//! latest merged status without waiting on the mailbox.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, trace};

use crate::health::{HealthChecker, HealthStatus};

enum ProbeInput {
    Update {
        status: HealthStatus,
        prefix: String,
    },
    Check {
        checker: Arc<dyn HealthChecker>,
        prefix: String,
    },
    Flush(oneshot::Sender<()>),
}

/// Serialized aggregator of health updates.
///
/// Cheap to clone; all clones feed the same mailbox.
#[derive(Clone)]
pub struct HealthProbe {
    inputs: mpsc::UnboundedSender<ProbeInput>,
    current: watch::Receiver<HealthStatus>,
}

impl HealthProbe {
    /// Start the probe's mailbox task.
    ///
    /// Must be called from within a Tokio runtime. The task exits once every
    /// clone of the probe has been dropped.
    pub fn spawn() -> Self {
        let (inputs, mut rx) = mpsc::unbounded_channel::<ProbeInput>();
        let (publish, current) = watch::channel(HealthStatus::default());

        tokio::spawn(async move {
            while let Some(input) = rx.recv().await {
                match input {
                    ProbeInput::Update { status, prefix } => {
                        trace!(prefix = %prefix, "Applying health update");
                        publish.send_modify(|current| current.add(&status, &prefix));
                    }
                    ProbeInput::Check { checker, prefix } => {
                        let status = checker.health_status();
                        publish.send_modify(|current| current.add(&status, &prefix));
                    }
                    ProbeInput::Flush(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
            debug!("Health probe stopped");
        });

        Self { inputs, current }
    }

    /// Merge `status` under `prefix`.
    pub fn update_status(&self, status: HealthStatus, prefix: impl Into<String>) {
        let _ = self.inputs.send(ProbeInput::Update {
            status,
            prefix: prefix.into(),
        });
    }

    /// Poll `checker` on the mailbox task and merge its status under `prefix`.
    pub fn send_check(&self, checker: Arc<dyn HealthChecker>, prefix: impl Into<String>) {
        let _ = self.inputs.send(ProbeInput::Check {
            checker,
            prefix: prefix.into(),
        });
    }

    /// Wait until every input sent before this call has been applied.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.inputs.send(ProbeInput::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }
}

impl HealthChecker for HealthProbe {
    fn health_status(&self) -> HealthStatus {
        self.current.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthState;

    struct Fixed(HealthState);

    impl HealthChecker for Fixed {
        fn health_status(&self) -> HealthStatus {
            HealthStatus::single("conn", self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_updates_are_merged_under_prefix() {
        let probe = HealthProbe::spawn();

        probe.update_status(HealthStatus::single("intake", HealthState::Init), "orders");
        probe.update_status(HealthStatus::single("intake", HealthState::Healthy), "audit");
        probe.flush().await;

        let status = probe.health_status();
        assert_eq!(status.get("orders.intake"), Some(&HealthState::Init));
        assert_eq!(status.get("audit.intake"), Some(&HealthState::Healthy));
    }

    #[tokio::test]
    async fn test_later_update_replaces_key() {
        let probe = HealthProbe::spawn();

        probe.update_status(HealthStatus::single("intake", HealthState::Init), "orders");
        probe.update_status(
            HealthStatus::single("intake", HealthState::error("redis down")),
            "orders",
        );
        probe.flush().await;

        assert_eq!(
            probe.health_status().get("orders.intake").map(ToString::to_string),
            Some("Error - redis down".to_string())
        );
    }

    #[tokio::test]
    async fn test_send_check_polls_checker() {
        let probe = HealthProbe::spawn();

        probe.send_check(Arc::new(Fixed(HealthState::Healthy)), "orders");
        probe.flush().await;

        assert_eq!(
            probe.health_status().get("orders.conn"),
            Some(&HealthState::Healthy)
        );
        assert!(probe.health_status().is_healthy());
    }

    #[tokio::test]
    async fn test_clones_share_status() {
        let probe = HealthProbe::spawn();
        let other = probe.clone();

        other.update_status(HealthStatus::single("x", HealthState::Healthy), "");
        other.flush().await;

        assert_eq!(probe.health_status().get("x"), Some(&HealthState::Healthy));
    }
}
