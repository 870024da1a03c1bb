//! Pre-flight memory check run before every inference-triggering call.

use std::sync::Arc;

use tabwise_core::environment::{MemoryAssessment, ResourceTelemetry};
use tabwise_core::error::{Error, Result};
use tracing::warn;

pub struct ResourceGate {
    telemetry: Arc<dyn ResourceTelemetry>,
}

impl ResourceGate {
    pub fn new(telemetry: Arc<dyn ResourceTelemetry>) -> Self {
        Self { telemetry }
    }

    /// `Ok` when there is room to run, otherwise the current pressure.
    ///
    /// Samples telemetry on every call; readiness is not consulted.
    pub fn check_safe_to_run(&self) -> Result<()> {
        let MemoryAssessment {
            safe_to_run,
            status,
        } = self.telemetry.assess();
        if safe_to_run {
            return Ok(());
        }

        warn!(
            level = %status.pressure_level,
            available_gb = status.available_gb,
            "Refusing to run under memory pressure"
        );
        Err(Error::MemoryPressure {
            level: status.pressure_level,
            available_gb: status.available_gb,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::MockTelemetry;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tabwise_core::environment::{MemoryStatus, PressureLevel};

    #[test]
    fn passes_when_safe() {
        let gate = ResourceGate::new(Arc::new(MockTelemetry::safe()));
        assert!(gate.check_safe_to_run().is_ok());
    }

    #[test]
    fn reports_level_and_available_memory() {
        let gate = ResourceGate::new(Arc::new(MockTelemetry::pressured(
            PressureLevel::Critical,
            0.42,
        )));
        let err = gate.check_safe_to_run().unwrap_err();
        assert!(matches!(
            err,
            Error::MemoryPressure {
                level: PressureLevel::Critical,
                ..
            }
        ));
        assert!(err.to_string().contains("0.4 GB"), "{err}");
    }

    /// Each read reflects a fresh sample, so the verdict and status would
    /// disagree if they came from separate reads.
    struct DriftingTelemetry {
        reads: AtomicUsize,
    }

    impl DriftingTelemetry {
        fn level(&self) -> PressureLevel {
            match self.reads.fetch_add(1, Ordering::SeqCst) {
                0 => PressureLevel::Critical,
                _ => PressureLevel::Normal,
            }
        }
    }

    impl ResourceTelemetry for DriftingTelemetry {
        fn is_safe_to_run(&self) -> bool {
            self.level() != PressureLevel::Critical
        }

        fn current_status(&self) -> MemoryStatus {
            MemoryStatus {
                pressure_level: self.level(),
                available_gb: 0.3,
                total_gb: 16.0,
            }
        }

        fn assess(&self) -> MemoryAssessment {
            let pressure_level = self.level();
            MemoryAssessment {
                safe_to_run: pressure_level != PressureLevel::Critical,
                status: MemoryStatus {
                    pressure_level,
                    available_gb: 0.3,
                    total_gb: 16.0,
                },
            }
        }
    }

    #[test]
    fn refusal_reports_the_sample_it_refused_on() {
        let gate = ResourceGate::new(Arc::new(DriftingTelemetry {
            reads: AtomicUsize::new(0),
        }));
        let err = gate.check_safe_to_run().unwrap_err();
        assert!(
            matches!(
                err,
                Error::MemoryPressure {
                    level: PressureLevel::Critical,
                    ..
                }
            ),
            "{err}"
        );
    }

    #[test]
    fn samples_on_every_call() {
        let telemetry = Arc::new(MockTelemetry::safe());
        let gate = ResourceGate::new(telemetry.clone());
        assert!(gate.check_safe_to_run().is_ok());
        telemetry.set_safe(false);
        assert!(gate.check_safe_to_run().is_err());
    }
}
