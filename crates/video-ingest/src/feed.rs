//! Background capture thread publishing into a latest-only slot.
//!
//! The consumer polls with a short timeout and tolerates staleness; it never
//! waits on the camera for longer than one poll.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, warn};

use crate::{
    CaptureError, Frame, FrameSource,
    latest::{LatestSender, latest_channel},
};

const MISS_BACKOFF: Duration = Duration::from_millis(10);
const ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Outcome of polling the feed for one tick.
pub enum Acquisition {
    Frame(Frame),
    /// Nothing usable this tick; `Some` carries the source error if there was one.
    Missed(Option<CaptureError>),
    /// The capture thread is gone.
    Closed,
}

pub struct FrameFeed {
    rx: Receiver<Result<Frame, CaptureError>>,
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
    source_name: String,
}

/// Spawn the capture thread for `source`.
///
/// The source is moved onto the thread and dropped there when the feed stops,
/// which releases the underlying device.
pub fn spawn_reader(source: Box<dyn FrameSource>) -> Result<FrameFeed, CaptureError> {
    let (tx, rx) = latest_channel();
    let running = Arc::new(AtomicBool::new(true));
    let source_name = source.describe();
    let thread_running = running.clone();
    let handle = thread::Builder::new()
        .name("tripline-capture".into())
        .spawn(move || capture_loop(source, tx, thread_running))
        .map_err(|err| CaptureError::Other(err.into()))?;

    Ok(FrameFeed {
        rx,
        running,
        handle: Some(handle),
        source_name,
    })
}

fn capture_loop(
    mut source: Box<dyn FrameSource>,
    tx: LatestSender<Result<Frame, CaptureError>>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Relaxed) {
        match source.read() {
            Ok(Some(frame)) => {
                tx.publish(Ok(frame));
            }
            Ok(None) => thread::sleep(MISS_BACKOFF),
            Err(err) => {
                debug!("capture read failed: {err}");
                tx.publish(Err(err));
                thread::sleep(ERROR_BACKOFF);
            }
        }
    }
    debug!("capture thread for {} exiting", source.describe());
}

impl FrameFeed {
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Wait at most `poll` for the next frame.
    pub fn next_frame(&self, poll: Duration) -> Acquisition {
        match self.rx.recv_timeout(poll) {
            Ok(Ok(frame)) => Acquisition::Frame(frame),
            Ok(Err(err)) => Acquisition::Missed(Some(err)),
            Err(RecvTimeoutError::Timeout) => Acquisition::Missed(None),
            Err(RecvTimeoutError::Disconnected) => Acquisition::Closed,
        }
    }

    /// Block until the source yields its first good frame or `timeout` elapses.
    ///
    /// Transient read errors during the wait are logged and retried.
    pub fn wait_for_first_frame(&self, timeout: Duration) -> Result<Frame, CaptureError> {
        let started = Instant::now();
        loop {
            let remaining = timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return Err(CaptureError::NoFirstFrame {
                    source_name: self.source_name.clone(),
                    waited_ms: timeout.as_millis() as u64,
                });
            }
            match self.next_frame(remaining) {
                Acquisition::Frame(frame) => return Ok(frame),
                Acquisition::Missed(Some(err)) => {
                    warn!("waiting for first frame from {}: {err}", self.source_name);
                }
                Acquisition::Missed(None) => {}
                Acquisition::Closed => return Err(CaptureError::Closed),
            }
        }
    }

    /// Stop the capture thread and wait for it to release the source.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for FrameFeed {
    fn drop(&mut self) {
        self.shutdown();
    }
}
