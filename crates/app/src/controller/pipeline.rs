//! Process wiring: capture feed, controller, stream worker, watchdog, and
//! shutdown.

use std::{
    sync::{
        Arc, Once,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, bail};
use tracing::{debug, error, info, warn};
use trigger_core::{
    ActuationArbiter, Actuator, CooldownState, CrossingEvaluator, ServoActuator, SimulatedPin,
    SysfsPwmPin, TriggerLine,
};
use video_ingest::{
    Acquisition, FrameFeed, FrameSource, SyntheticScene, SyntheticSource, spawn_reader,
};

use crate::controller::{
    ActuatorKind, ControllerConfig, SourceSpec,
    engine::Controller,
    server::{StreamOptions, StreamServer},
    streaming::StreamWorker,
    telemetry,
    watchdog::{CaptureHealth, WATCHDOG_STALL_THRESHOLD, spawn_watchdog},
};

/// Longest the loop blocks waiting on the capture thread in one tick.
const MAX_ACQUIRE_POLL: Duration = Duration::from_millis(100);

/// Run the controller until Ctrl+C. Startup failures are returned; once the
/// loop is running only a vanished capture thread ends it early.
pub fn run(config: ControllerConfig) -> Result<()> {
    static CTRL_HANDLER: Once = Once::new();

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_shutdown = shutdown.clone();
    CTRL_HANDLER.call_once(move || {
        if let Err(err) = ctrlc::set_handler(move || {
            handler_shutdown.store(true, Ordering::SeqCst);
        }) {
            warn!("failed to install Ctrl+C handler: {err}");
        }
    });

    telemetry::init_metrics(config.metrics_addr)?;

    let run_span = tracing::info_span!(
        "controller.run",
        source = ?config.source,
        width = config.width,
        height = config.height,
        polarity = %config.polarity,
        fps = config.fps,
    );
    let _run_guard = run_span.enter();

    let feed = spawn_reader(open_source(&config)?).context("failed to start capture")?;
    let first = feed
        .wait_for_first_frame(config.first_frame_timeout)
        .context("camera produced no frame at startup")?;
    let first_image = first
        .to_rgb_image()
        .context("first frame is not a usable image")?;
    let (frame_width, frame_height) = first_image.dimensions();
    let line = TriggerLine::from_frame_width(frame_width, config.line_fraction)?;
    info!(
        "capturing {}x{} from {}; trigger line at x={}",
        frame_width,
        frame_height,
        feed.source_name(),
        line.x()
    );

    let mut controller = Controller::new(
        Box::new(config.detector.build()),
        CrossingEvaluator::new(config.polarity),
        ActuationArbiter::new(CooldownState::new(config.cooldown)?),
        build_actuator(&config)?,
        line,
    )
    .context("failed to park the actuator at startup")?;

    let server = StreamServer::bind(
        config.stream_addr,
        StreamOptions {
            jpeg_quality: config.jpeg_quality,
            accept_wait: config.accept_wait,
            send_timeout: config.send_timeout,
        },
    )
    .with_context(|| format!("failed to bind preview stream on {}", config.stream_addr))?;
    let stream = StreamWorker::spawn(server)?;

    let running = Arc::new(AtomicBool::new(true));
    let health = Arc::new(CaptureHealth::new(WATCHDOG_STALL_THRESHOLD));
    health.beat(Instant::now());
    let watchdog = spawn_watchdog(health.clone(), running.clone())?;

    info!("controller running; press Ctrl+C to stop");

    let report = controller.tick(&first_image, Instant::now());
    stream.publish(report.annotated);

    let outcome = control_loop(
        &config,
        &feed,
        &mut controller,
        &stream,
        &health,
        &shutdown,
    );

    info!("stopping controller");
    running.store(false, Ordering::SeqCst);
    let _ = watchdog.join();
    feed.stop();
    stream.stop();
    if let Err(err) = controller.shutdown() {
        error!(error = %err, "failed to return actuator to rest");
    }
    info!(
        fired = controller.arbiter().fired(),
        suppressed = controller.arbiter().suppressed(),
        "controller stopped"
    );
    if let Some(snapshot) = telemetry::render_metrics() {
        debug!("final metrics:\n{snapshot}");
    }
    outcome
}

fn control_loop(
    config: &ControllerConfig,
    feed: &FrameFeed,
    controller: &mut Controller,
    stream: &StreamWorker,
    health: &CaptureHealth,
    shutdown: &AtomicBool,
) -> Result<()> {
    let budget = config.frame_budget();
    let poll = budget.min(MAX_ACQUIRE_POLL);
    let mut smoothed_fps: f32 = 0.0;
    let mut last_tick = Instant::now();

    while !shutdown.load(Ordering::Relaxed) {
        let tick_start = Instant::now();
        match feed.next_frame(poll) {
            Acquisition::Frame(frame) => {
                health.beat(tick_start);
                match frame.to_rgb_image() {
                    Ok(image) => {
                        let report = controller.tick(&image, Instant::now());
                        metrics::counter!("tripline_frames_total").increment(1);
                        if report.frame_number % 30 == 0 {
                            debug!(
                                "heartbeat: frame #{}, {} detections, {:.1} fps",
                                report.frame_number,
                                report.detections.len(),
                                smoothed_fps
                            );
                        }
                        stream.publish(report.annotated);
                    }
                    Err(err) => {
                        metrics::counter!("tripline_frames_skipped_total").increment(1);
                        debug!("skipping malformed frame: {err}");
                    }
                }
            }
            Acquisition::Missed(err) => {
                metrics::counter!("tripline_frames_skipped_total").increment(1);
                if let Some(err) = err {
                    debug!("frame read failed: {err}");
                }
                continue;
            }
            Acquisition::Closed => bail!("capture thread exited unexpectedly"),
        }

        let now = Instant::now();
        metrics::histogram!("tripline_tick_seconds")
            .record(now.duration_since(tick_start).as_secs_f64());
        let interval = now.duration_since(last_tick).as_secs_f32();
        last_tick = now;
        if interval > 0.0 {
            let instant = 1.0 / interval;
            smoothed_fps = if smoothed_fps == 0.0 {
                instant
            } else {
                0.9 * smoothed_fps + 0.1 * instant
            };
            metrics::gauge!("tripline_loop_fps").set(smoothed_fps as f64);
        }

        let elapsed = tick_start.elapsed();
        if elapsed < budget {
            thread::sleep(budget - elapsed);
        }
    }
    Ok(())
}

fn open_source(config: &ControllerConfig) -> Result<Box<dyn FrameSource>> {
    match &config.source {
        SourceSpec::Synthetic => {
            let scene = SyntheticScene::new(config.width, config.height, config.fps as f64);
            Ok(Box::new(SyntheticSource::new(scene)))
        }
        SourceSpec::Camera(uri) => open_camera(config, uri),
    }
}

#[cfg(feature = "with-opencv")]
fn open_camera(config: &ControllerConfig, uri: &str) -> Result<Box<dyn FrameSource>> {
    use video_ingest::{CameraSettings, OpenCvCamera};

    let camera = OpenCvCamera::open(CameraSettings {
        uri: uri.to_string(),
        width: config.width,
        height: config.height,
        fps: config.fps as f64,
        warmup_frames: config.warmup_frames,
        buffer_frames: 1,
    })
    .with_context(|| format!("failed to open camera {uri}"))?;
    Ok(Box::new(camera))
}

#[cfg(not(feature = "with-opencv"))]
fn open_camera(_config: &ControllerConfig, uri: &str) -> Result<Box<dyn FrameSource>> {
    bail!(
        "camera source {uri:?} needs a build with the `with-opencv` feature; \
         use --source synthetic for a camera-free run"
    )
}

fn build_actuator(config: &ControllerConfig) -> Result<Box<dyn Actuator>> {
    match config.actuator {
        ActuatorKind::Sim => {
            let pin = SimulatedPin::new(format!(
                "pwmchip{}/pwm{}",
                config.pwm_chip, config.pwm_channel
            ));
            Ok(Box::new(ServoActuator::new(pin, config.hold)))
        }
        ActuatorKind::Pwm => {
            let pin = SysfsPwmPin::open(config.pwm_chip, config.pwm_channel).with_context(|| {
                format!(
                    "failed to initialise PWM chip {} channel {}",
                    config.pwm_chip, config.pwm_channel
                )
            })?;
            Ok(Box::new(ServoActuator::new(pin, config.hold)))
        }
    }
}
