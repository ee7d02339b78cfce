//! Tracking system: runs a pipeline on its own thread.
//!
//! Frames go in over a bounded channel; each tick's poses come out through
//! [`LatestPoses`]. The pipeline and its native backend live entirely on the
//! tracking thread.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, TrySendError, bounded};
use tracing::{info, warn};

use crate::backend::TrackerBackend;
use crate::error::{Result, TrackingError};
use crate::tracking::frame::OwnedFrame;
use crate::tracking::{FrameProcessingPipeline, PipelineStats};

use super::shared_state::LatestPoses;

/// Frames queued ahead of the tracking thread. Kept small so a slow tracker
/// works on recent frames.
const FRAME_CHANNEL_CAPACITY: usize = 2;

pub struct TrackingSystem {
    frame_sender: Option<Sender<OwnedFrame>>,
    latest: Arc<LatestPoses>,
    handle: Option<JoinHandle<PipelineStats>>,
    stats: Option<PipelineStats>,
}

impl TrackingSystem {
    /// Move `pipeline` onto a new tracking thread.
    pub fn spawn<B>(pipeline: FrameProcessingPipeline<B>) -> Self
    where
        B: TrackerBackend + Send + 'static,
    {
        let (frame_sender, frame_receiver) = bounded::<OwnedFrame>(FRAME_CHANNEL_CAPACITY);
        let latest = Arc::new(LatestPoses::new());

        let handle = {
            let latest = latest.clone();
            thread::spawn(move || {
                let mut pipeline = pipeline;
                for frame in frame_receiver.iter() {
                    let tick = frame.as_frame().and_then(|f| pipeline.tick(&f));
                    match tick {
                        Ok(poses) => latest.publish(frame.timestamp_ns, poses),
                        Err(e) => warn!(error = %e, "tracking tick failed"),
                    }
                }
                pipeline.teardown();
                pipeline.stats()
            })
        };
        info!("tracking thread started");

        Self {
            frame_sender: Some(frame_sender),
            latest,
            handle: Some(handle),
            stats: None,
        }
    }

    /// Queue a frame, waiting while the queue is full.
    pub fn submit(&self, frame: OwnedFrame) -> Result<()> {
        let sender = self.sender()?;
        sender
            .send(frame)
            .map_err(|_| TrackingError::not_initialized("tracking thread has exited"))
    }

    /// Queue a frame unless the tracker is behind. Returns false if the frame
    /// was dropped.
    pub fn try_submit(&self, frame: OwnedFrame) -> Result<bool> {
        match self.sender()?.try_send(frame) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => Ok(false),
            Err(TrySendError::Disconnected(_)) => {
                Err(TrackingError::not_initialized("tracking thread has exited"))
            }
        }
    }

    /// Handoff slot readers poll for the latest poses.
    pub fn latest(&self) -> Arc<LatestPoses> {
        self.latest.clone()
    }

    /// Stop accepting frames, drain the queue and join the tracking thread.
    ///
    /// Returns the pipeline statistics. Calling it again returns the same
    /// statistics.
    pub fn shutdown(&mut self) -> Option<PipelineStats> {
        // Dropping the sender ends the receiver loop once the queue is drained.
        self.frame_sender.take();
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(stats) => {
                    info!(ticks = stats.ticks, dropped = stats.dropped_ticks, "tracking thread stopped");
                    self.stats = Some(stats);
                }
                Err(_) => warn!("tracking thread panicked"),
            }
        }
        self.stats
    }

    fn sender(&self) -> Result<&Sender<OwnedFrame>> {
        self.frame_sender
            .as_ref()
            .ok_or_else(|| TrackingError::not_initialized("tracking system is shut down"))
    }
}

impl Drop for TrackingSystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}
