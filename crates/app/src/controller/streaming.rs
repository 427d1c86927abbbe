//! Stream worker thread.
//!
//! The control loop publishes annotated frames into a latest-only slot and
//! moves on; the worker encodes and sends on its own thread, so a slow or
//! broken viewer never delays detection or actuation.

use std::{thread, time::Duration};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use image::RgbImage;
use tracing::debug;
use video_ingest::latest::{LatestSender, Published, latest_channel};

use crate::controller::{
    server::{StepOutcome, StreamServer},
    telemetry,
};

/// Idle wake-up so a viewer connecting while no frames flow is still accepted.
const IDLE_POLL: Duration = Duration::from_millis(200);

pub(crate) struct StreamWorker {
    tx: Option<LatestSender<RgbImage>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl StreamWorker {
    pub(crate) fn spawn(server: StreamServer) -> Result<Self> {
        let (tx, rx) = latest_channel::<RgbImage>();
        let handle = telemetry::spawn_thread("tripline-stream", move || stream_loop(server, rx))
            .context("failed to spawn stream worker")?;
        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    /// Hand off a frame; an unsent older frame is discarded.
    pub(crate) fn publish(&self, frame: RgbImage) {
        if let Some(tx) = &self.tx {
            if tx.publish(frame) == Published::Displaced {
                metrics::counter!("tripline_stream_frames_displaced_total").increment(1);
            }
        }
    }

    /// Close the handoff, let the worker close viewer and listener, and join.
    pub(crate) fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StreamWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn stream_loop(mut server: StreamServer, rx: Receiver<RgbImage>) {
    let span = tracing::info_span!("stream.worker");
    let _guard = span.enter();
    let mut last: Option<RgbImage> = None;
    loop {
        match rx.recv_timeout(IDLE_POLL) {
            Ok(frame) => {
                let outcome = server.step(&frame);
                if let StepOutcome::Sent { bytes } = outcome {
                    metrics::histogram!("tripline_stream_frame_bytes").record(bytes as f64);
                }
                last = Some(frame);
            }
            Err(RecvTimeoutError::Timeout) => {
                // Loop stalled (camera gone); keep the viewer slot serviced.
                if !server.has_viewer() {
                    if let Some(frame) = &last {
                        server.step(frame);
                    }
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("stream worker exiting");
    server.shutdown();
}
