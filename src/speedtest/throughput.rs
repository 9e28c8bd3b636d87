use super::{round_to, MeasurementPhase, SpeedTestCallbacks, TestPhase};
use crate::error::SpeedTestError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Megabits per second for `bytes` moved in `elapsed`.
pub fn mbps(bytes: u64, elapsed: Duration) -> f64 {
    (bytes as f64 * 8.0) / elapsed.as_secs_f64() / 1_000_000.0
}

pub(crate) fn progress_percent(elapsed: Duration, ceiling: Duration) -> f64 {
    (elapsed.as_secs_f64() / ceiling.as_secs_f64() * 100.0).min(100.0)
}

/// Runs the plan phase by phase, one transfer at a time, until the plan is done or `ceiling`
/// has passed since the stage started. `transfer` returns the byte count to account for.
///
/// The ceiling is only checked between transfers, so a slow transfer can overrun it.
pub(crate) async fn run_stage<F, Fut>(
    phase: TestPhase,
    plan: &[MeasurementPhase],
    ceiling: Duration,
    cancel: &CancellationToken,
    callbacks: &dyn SpeedTestCallbacks,
    mut transfer: F,
) -> Result<f64, SpeedTestError>
where
    F: FnMut(u64) -> Fut,
    Fut: Future<Output = Result<u64, SpeedTestError>>,
{
    let start = Instant::now();
    let mut total_bytes: u64 = 0;
    let mut transfers: u32 = 0;

    'phases: for step in plan {
        for _ in 0..step.transfer_count {
            if cancel.is_cancelled() {
                return Err(SpeedTestError::Aborted);
            }
            if start.elapsed() >= ceiling {
                break;
            }

            let received = transfer(step.transfer_size_bytes).await?;
            total_bytes += received;
            transfers += 1;

            let elapsed = start.elapsed();
            let speed = mbps(total_bytes, elapsed);
            debug!(
                %phase,
                size = step.transfer_size_bytes,
                received,
                total_bytes,
                mbps = speed,
                "transfer complete"
            );

            callbacks.on_progress(phase, progress_percent(elapsed, ceiling), round_to(speed, 1));
            callbacks.on_data_point(phase, speed);
        }
        if start.elapsed() >= ceiling {
            break 'phases;
        }
    }

    let elapsed = start.elapsed();
    if total_bytes == 0 || elapsed.is_zero() {
        return Err(match phase {
            TestPhase::Upload => SpeedTestError::UploadTestFailed,
            _ => SpeedTestError::DownloadTestFailed,
        });
    }

    let speed = mbps(total_bytes, elapsed);
    info!(
        %phase,
        transfers,
        total_bytes,
        elapsed_ms = elapsed.as_millis() as u64,
        mbps = speed,
        "stage complete"
    );
    Ok(speed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        progress: Mutex<Vec<(TestPhase, f64, f64)>>,
        points: Mutex<Vec<f64>>,
    }

    impl SpeedTestCallbacks for Recorder {
        fn on_progress(&self, phase: TestPhase, percent: f64, current_value: f64) {
            self.progress
                .lock()
                .unwrap()
                .push((phase, percent, current_value));
        }

        fn on_data_point(&self, _phase: TestPhase, mbps: f64) {
            self.points.lock().unwrap().push(mbps);
        }
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 0.05,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn mbps_is_bits_per_second_over_a_million() {
        assert_eq!(mbps(1_000_000, Duration::from_secs(1)), 8.0);
        assert_eq!(mbps(5_000_000, Duration::from_millis(2_500)), 16.0);
    }

    #[test]
    fn progress_is_capped_at_one_hundred() {
        let ceiling = Duration::from_secs(10);
        assert_eq!(progress_percent(Duration::from_secs(5), ceiling), 50.0);
        assert_eq!(progress_percent(Duration::from_secs(12), ceiling), 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn ceiling_stops_the_stage_with_a_valid_result() {
        let calls = AtomicU32::new(0);
        let recorder = Recorder::default();
        let plan = [MeasurementPhase::new(1_000_000, 6)];

        let speed = run_stage(
            TestPhase::Download,
            &plan,
            Duration::from_secs(10),
            &CancellationToken::new(),
            &recorder,
            |size| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    tokio::time::sleep(Duration::from_millis(2_500)).await;
                    Ok(size)
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_close(speed, 3.2);
        let progress = recorder.progress.lock().unwrap();
        assert_eq!(progress.len(), 4);
        assert_close(progress[1].1, 50.0);
        assert_close(progress[3].1, 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn ceiling_skips_remaining_phases() {
        let sizes = Mutex::new(Vec::new());
        let plan = [
            MeasurementPhase::new(1_000, 2),
            MeasurementPhase::new(2_000, 2),
            MeasurementPhase::new(3_000, 2),
        ];

        run_stage(
            TestPhase::Upload,
            &plan,
            Duration::from_secs(1),
            &CancellationToken::new(),
            &Recorder::default(),
            |size| {
                sizes.lock().unwrap().push(size);
                async move {
                    tokio::time::sleep(Duration::from_millis(400)).await;
                    Ok(size)
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(*sizes.lock().unwrap(), vec![1_000, 1_000, 2_000]);
    }

    #[tokio::test(start_paused = true)]
    async fn running_mbps_is_reported_after_every_transfer() {
        let recorder = Recorder::default();
        let plan = [MeasurementPhase::new(500_000, 2), MeasurementPhase::new(1_000_000, 1)];

        let speed = run_stage(
            TestPhase::Upload,
            &plan,
            Duration::from_secs(10),
            &CancellationToken::new(),
            &recorder,
            |size| async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(size)
            },
        )
        .await
        .unwrap();

        // 2MB over 1.5s
        assert_close(speed, 10.67);
        let points = recorder.points.lock().unwrap();
        assert_eq!(points.len(), 3);
        assert_close(points[0], 8.0);
        assert_close(points[1], 8.0);
        assert_eq!(points[2], speed);
        let progress = recorder.progress.lock().unwrap();
        assert_eq!(progress[2].0, TestPhase::Upload);
        assert_close(progress[2].1, 15.0);
        assert_close(progress[2].2, 10.7);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_token_fails_before_the_next_transfer() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let plan = [MeasurementPhase::new(1_000, 5)];

        let result = run_stage(
            TestPhase::Download,
            &plan,
            Duration::from_secs(10),
            &cancel,
            &Recorder::default(),
            |size| {
                if calls.fetch_add(1, Ordering::SeqCst) == 1 {
                    cancel.cancel();
                }
                async move { Ok(size) }
            },
        )
        .await;

        assert!(matches!(result, Err(SpeedTestError::Aborted)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_bytes_fails_with_a_stage_specific_error() {
        let plan = [MeasurementPhase::new(1_000, 1)];
        let transfer = |_size: u64| async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok::<u64, SpeedTestError>(0)
        };

        let download = run_stage(
            TestPhase::Download,
            &plan,
            Duration::from_secs(10),
            &CancellationToken::new(),
            &Recorder::default(),
            transfer,
        )
        .await;
        let upload = run_stage(
            TestPhase::Upload,
            &plan,
            Duration::from_secs(10),
            &CancellationToken::new(),
            &Recorder::default(),
            transfer,
        )
        .await;

        assert!(matches!(download, Err(SpeedTestError::DownloadTestFailed)));
        assert!(matches!(upload, Err(SpeedTestError::UploadTestFailed)));
    }

    #[tokio::test(start_paused = true)]
    async fn transfer_error_ends_the_stage() {
        let calls = AtomicU32::new(0);
        let plan = [MeasurementPhase::new(1_000, 3)];

        let result = run_stage(
            TestPhase::Download,
            &plan,
            Duration::from_secs(10),
            &CancellationToken::new(),
            &Recorder::default(),
            |_size| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    Err(SpeedTestError::TransferFailed {
                        phase: TestPhase::Download,
                        status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                    })
                }
            },
        )
        .await;

        assert!(matches!(result, Err(SpeedTestError::TransferFailed { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
