pub mod fusion;
pub mod protocol;
pub mod source;
pub mod state;
pub mod types;

use anyhow::Result;
use fusion::{EstimatorConfig, OrientationEstimator};
use source::SampleSource;
use state::{DebugStats, SharedPose};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use types::Pose;

/// Commands sent to the tracker task.
enum TrackerCommand {
    Reset,
    Stop,
}

/// Runs orientation/position tracking in the background.
///
/// Polls a [`SampleSource`] at a fixed interval, feeds each sample through an
/// [`OrientationEstimator`], and publishes the resulting pose to a
/// [`SharedPose`] that any number of readers can snapshot.
pub struct TrackerClient {
    shared: SharedPose,
    command_tx: mpsc::UnboundedSender<TrackerCommand>,
    task: tokio::task::JoinHandle<()>,
}

impl TrackerClient {
    /// Start tracking. Must be called from within a tokio runtime.
    pub fn spawn(
        config: EstimatorConfig,
        interval: Duration,
        source: Box<dyn SampleSource>,
    ) -> Result<Self> {
        anyhow::ensure!(!interval.is_zero(), "Update interval must be non-zero");
        let estimator = OrientationEstimator::new(config)?;

        let shared = SharedPose::new();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(tracker_loop(
            estimator,
            source,
            shared.clone(),
            command_rx,
            interval,
        ));

        Ok(Self {
            shared,
            command_tx,
            task,
        })
    }

    /// Latest published pose (non-blocking).
    pub fn pose(&self) -> Pose {
        self.shared.snapshot()
    }

    pub fn stats(&self) -> DebugStats {
        self.shared.stats()
    }

    /// Handle for readers that outlive or run apart from the client.
    pub fn shared(&self) -> SharedPose {
        self.shared.clone()
    }

    /// Zero orientation, position and velocity.
    pub fn reset(&self) {
        let _ = self.command_tx.send(TrackerCommand::Reset);
    }

    /// Ask the loop to exit after its current iteration.
    pub fn stop(&self) {
        let _ = self.command_tx.send(TrackerCommand::Stop);
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the loop and wait for it to release the source.
    pub async fn shutdown(self) {
        self.stop();
        if let Err(e) = self.task.await {
            tracing::error!(?e, "Tracker task failed");
        }
    }
}

/// Background task: poll the source, run fusion, publish the pose.
async fn tracker_loop(
    mut estimator: OrientationEstimator,
    mut source: Box<dyn SampleSource>,
    shared: SharedPose,
    mut command_rx: mpsc::UnboundedReceiver<TrackerCommand>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let update_frequency = 1.0 / interval.as_secs_f64();
    let mut last_update = Instant::now();
    let mut samples: u64 = 0;

    tracing::info!(interval_ms = interval.as_millis() as u64, "Tracker loop started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // No sample is a skipped tick; the next dt spans the gap.
                if let Some(sample) = source.next_sample() {
                    let now = Instant::now();
                    let dt = now.duration_since(last_update).as_secs_f64();
                    last_update = now;

                    match estimator.update_sample(&sample, dt) {
                        Ok(pose) => {
                            shared.publish(pose);
                            samples += 1;
                            if samples % 1000 == 0 {
                                tracing::debug!(samples, "IMU samples fused");
                            }
                        }
                        Err(e) => {
                            tracing::error!(%e, ?sample, "Tracker loop crashed");
                            break;
                        }
                    }
                }

                shared.update_stats(DebugStats {
                    miss_rate: source.miss_rate(),
                    update_frequency,
                    samples,
                });
            }
            cmd = command_rx.recv() => {
                match cmd {
                    Some(TrackerCommand::Reset) => {
                        estimator.reset();
                        shared.publish(estimator.pose());
                        tracing::info!("Orientation and position reset");
                    }
                    Some(TrackerCommand::Stop) | None => break,
                }
            }
        }
    }

    drop(source);
    tracing::info!(samples, "Tracker loop exiting");
}
