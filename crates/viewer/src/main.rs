//! Reference viewer for the tripline preview stream.
//!
//! Connects to the controller, reads length-prefixed JPEG frames, and reports
//! what it receives. Reconnects after the controller drops it.

use std::{
    net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs},
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod session;

use session::{FrameStats, SessionEnd, SessionOptions, run_session};

#[derive(Debug, Parser)]
#[command(name = "tripline-viewer", version, about)]
struct Cli {
    /// Controller host name or address.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    /// Controller stream port.
    #[arg(long, default_value_t = 5000)]
    port: u16,
    /// Connect timeout in milliseconds.
    #[arg(long = "connect-timeout-ms", default_value_t = 2_000)]
    connect_timeout_ms: u64,
    /// Treat the stream as lost after this long without data. Unset waits
    /// indefinitely, so a stalled camera does not cause reconnects.
    #[arg(long = "idle-timeout-ms", value_name = "MS")]
    idle_timeout_ms: Option<u64>,
    /// Delay before reconnecting after the stream ends; 0 exits instead.
    #[arg(long = "reconnect-ms", default_value_t = 1_000)]
    reconnect_ms: u64,
    /// Overwrite this image file with received frames (format from extension).
    #[arg(long, value_name = "PATH")]
    snapshot: Option<PathBuf>,
    /// Save every Nth frame to the snapshot file.
    #[arg(long = "snapshot-every", default_value_t = 30)]
    snapshot_every: u64,
    /// Exit after receiving this many frames.
    #[arg(long = "max-frames")]
    max_frames: Option<u64>,
    /// Log a stats line every N frames.
    #[arg(long = "log-every", default_value_t = 30)]
    log_every: u64,
}

/// Stop flag plus a handle on the live connection, so Ctrl+C can unblock a
/// read that has no timeout.
#[derive(Clone, Default)]
struct StopSignal {
    stop: Arc<AtomicBool>,
    current: Arc<Mutex<Option<TcpStream>>>,
}

impl StopSignal {
    fn trigger(&self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Ok(current) = self.current.lock() {
            if let Some(stream) = current.as_ref() {
                let _ = stream.shutdown(Shutdown::Both);
            }
        }
    }

    fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    fn track(&self, stream: &TcpStream) -> Result<()> {
        let handle = stream
            .try_clone()
            .context("failed to clone stream handle")?;
        if let Ok(mut current) = self.current.lock() {
            *current = Some(handle);
        }
        Ok(())
    }

    fn untrack(&self) {
        if let Ok(mut current) = self.current.lock() {
            current.take();
        }
    }
}

fn prepare_stream(stream: &TcpStream, idle_timeout: Option<Duration>) -> Result<()> {
    stream
        .set_read_timeout(idle_timeout)
        .context("failed to set read timeout")?;
    stream.set_nodelay(true).context("failed to set TCP_NODELAY")
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_timer(fmt::time::uptime())
                .with_filter(env_filter),
        )
        .init();

    let cli = Cli::parse();
    let addr = resolve(&cli.host, cli.port)?;

    let signal = StopSignal::default();
    let handler_signal = signal.clone();
    ctrlc::set_handler(move || handler_signal.trigger())
        .context("failed to install Ctrl+C handler")?;

    let options = SessionOptions {
        snapshot: cli.snapshot.clone(),
        snapshot_every: cli.snapshot_every,
        max_frames: cli.max_frames,
        log_every: cli.log_every,
    };
    let connect_timeout = Duration::from_millis(cli.connect_timeout_ms);
    let reconnect = Duration::from_millis(cli.reconnect_ms);
    let idle_timeout = cli
        .idle_timeout_ms
        .filter(|&ms| ms > 0)
        .map(Duration::from_millis);
    let mut stats = FrameStats::new();

    while !signal.is_stopped() {
        let end = match TcpStream::connect_timeout(&addr, connect_timeout) {
            Ok(mut stream) => {
                info!(%addr, "connected; press Ctrl+C to exit");
                prepare_stream(&stream, idle_timeout)?;
                signal.track(&stream)?;
                let end = run_session(&mut stream, &options, &signal.stop, &mut stats);
                signal.untrack();
                match end {
                    Ok(end) => end,
                    Err(err) => {
                        warn!("stream ended: {err:#}");
                        SessionEnd::PeerClosed
                    }
                }
            }
            Err(err) => {
                warn!(%addr, "connect failed: {err}");
                SessionEnd::PeerClosed
            }
        };

        match end {
            SessionEnd::Stopped | SessionEnd::LimitReached => break,
            SessionEnd::PeerClosed if reconnect.is_zero() || signal.is_stopped() => break,
            SessionEnd::PeerClosed => {
                info!("reconnecting in {} ms", reconnect.as_millis());
                thread::sleep(reconnect);
            }
        }
    }

    info!(
        frames = stats.frames,
        undecodable = stats.undecodable,
        bytes = stats.bytes,
        "viewer closed"
    );
    Ok(())
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .with_context(|| format!("failed to resolve {host}:{port}"))?
        .next()
        .ok_or_else(|| anyhow!("{host}:{port} resolved to no address"))
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    #[test]
    fn idle_timeout_is_opt_in() {
        let cli = Cli::try_parse_from(["tripline-viewer"]).unwrap();
        assert_eq!(cli.idle_timeout_ms, None);
        let cli = Cli::try_parse_from(["tripline-viewer", "--idle-timeout-ms", "5000"]).unwrap();
        assert_eq!(cli.idle_timeout_ms, Some(5000));
    }

    #[test]
    fn silent_server_keeps_the_session_open_until_stopped() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (_server_side, _) = listener.accept().unwrap();
        prepare_stream(&client, None).unwrap();
        assert_eq!(client.read_timeout().unwrap(), None);

        let signal = StopSignal::default();
        signal.track(&client).unwrap();
        let session_signal = signal.clone();
        let session = thread::spawn(move || {
            let mut stats = FrameStats::new();
            run_session(
                &mut client,
                &SessionOptions::default(),
                &session_signal.stop,
                &mut stats,
            )
            .unwrap()
        });

        thread::sleep(Duration::from_millis(300));
        assert!(!session.is_finished());
        signal.trigger();
        assert_eq!(session.join().unwrap(), SessionEnd::Stopped);
    }
}
