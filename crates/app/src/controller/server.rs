//! Single-viewer TCP preview server.
//!
//! At most one viewer is held at a time. While none is held each step makes a
//! bounded-wait accept; a second client simply waits in the listen backlog.
//! A reset socket, or any encode or send failure, drops the viewer and the
//! next step starts over. A viewer that half-closes and keeps reading is kept.
//! Nothing here is ever escalated to the caller.

use std::{
    io::{self, ErrorKind},
    net::{SocketAddr, TcpListener, TcpStream},
    thread,
    time::{Duration, Instant},
};

use frame_wire::write_frame;
use image::RgbImage;
use tracing::{debug, info, warn};

use crate::controller::annotation::encode_jpeg;

const ACCEPT_RETRY: Duration = Duration::from_millis(2);

#[derive(Clone, Copy, Debug)]
pub(crate) struct StreamOptions {
    pub(crate) jpeg_quality: u8,
    pub(crate) accept_wait: Duration,
    pub(crate) send_timeout: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum StepOutcome {
    NoViewer,
    Sent { bytes: usize },
    Dropped,
}

struct Viewer {
    stream: TcpStream,
    peer: SocketAddr,
    frames_sent: u64,
}

pub(crate) struct StreamServer {
    listener: TcpListener,
    viewer: Option<Viewer>,
    options: StreamOptions,
}

impl StreamServer {
    pub(crate) fn bind(addr: SocketAddr, options: StreamOptions) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        info!(addr = %listener.local_addr()?, "preview stream listening");
        Ok(Self {
            listener,
            viewer: None,
            options,
        })
    }

    pub(crate) fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub(crate) fn has_viewer(&self) -> bool {
        self.viewer.is_some()
    }

    /// Offer one annotated frame to the viewer, accepting one first if the
    /// slot is empty.
    pub(crate) fn step(&mut self, image: &RgbImage) -> StepOutcome {
        if let Some(viewer) = &self.viewer {
            if !is_alive(&viewer.stream) {
                self.drop_viewer("viewer connection reset");
            }
        }
        if self.viewer.is_none() {
            match self.try_accept() {
                Some(viewer) => self.viewer = Some(viewer),
                None => return StepOutcome::NoViewer,
            }
        }

        let payload = match encode_jpeg(image, self.options.jpeg_quality) {
            Ok(payload) if !payload.is_empty() => payload,
            Ok(_) => {
                self.drop_viewer("JPEG encoder produced no data");
                return StepOutcome::Dropped;
            }
            Err(err) => {
                warn!(error = %err, "JPEG encode failed");
                self.drop_viewer("JPEG encode failed");
                return StepOutcome::Dropped;
            }
        };

        let Some(viewer) = self.viewer.as_mut() else {
            return StepOutcome::NoViewer;
        };
        match write_frame(&mut viewer.stream, &payload) {
            Ok(bytes) => {
                viewer.frames_sent += 1;
                metrics::counter!("tripline_stream_frames_sent_total").increment(1);
                StepOutcome::Sent { bytes }
            }
            Err(err) => {
                debug!(peer = %viewer.peer, error = %err, "send failed");
                self.drop_viewer("send failed");
                StepOutcome::Dropped
            }
        }
    }

    /// Accept a waiting client, polling for at most `accept_wait`.
    fn try_accept(&self) -> Option<Viewer> {
        let deadline = Instant::now() + self.options.accept_wait;
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => match self.configure(&stream) {
                    Ok(()) => {
                        info!(%peer, "viewer connected");
                        metrics::gauge!("tripline_viewer_connected").set(1.0);
                        return Some(Viewer {
                            stream,
                            peer,
                            frames_sent: 0,
                        });
                    }
                    Err(err) => {
                        warn!(%peer, error = %err, "failed to configure viewer socket");
                        return None;
                    }
                },
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    thread::sleep(ACCEPT_RETRY.min(deadline - now));
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => {
                    debug!(error = %err, "accept failed");
                    return None;
                }
            }
        }
    }

    fn configure(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(self.options.send_timeout))?;
        Ok(())
    }

    fn drop_viewer(&mut self, reason: &str) {
        if let Some(viewer) = self.viewer.take() {
            info!(
                peer = %viewer.peer,
                frames = viewer.frames_sent,
                "viewer dropped: {reason}"
            );
            metrics::counter!("tripline_stream_disconnects_total").increment(1);
            metrics::gauge!("tripline_viewer_connected").set(0.0);
            let _ = viewer.stream.shutdown(std::net::Shutdown::Both);
        }
    }

    /// Close the viewer and the listener.
    pub(crate) fn shutdown(mut self) {
        self.drop_viewer("server shutting down");
    }
}

/// Non-blocking peek for a reset or otherwise broken socket. A zero-byte read
/// only means the viewer stopped sending; it may still be reading, so an
/// orderly close is left for the next failed write to detect. Stray bytes from
/// the viewer are left unread.
fn is_alive(stream: &TcpStream) -> bool {
    if stream.set_nonblocking(true).is_err() {
        return false;
    }
    let mut probe = [0u8; 1];
    let alive = match stream.peek(&mut probe) {
        Ok(_) => true,
        Err(err) => matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted),
    };
    alive && stream.set_nonblocking(false).is_ok()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use frame_wire::read_frame;
    use image::Rgb;

    use super::*;

    fn options() -> StreamOptions {
        StreamOptions {
            jpeg_quality: 80,
            accept_wait: Duration::from_millis(50),
            send_timeout: Duration::from_millis(500),
        }
    }

    fn server() -> (StreamServer, SocketAddr) {
        let server = StreamServer::bind("127.0.0.1:0".parse().unwrap(), options()).unwrap();
        let addr = server.local_addr().unwrap();
        (server, addr)
    }

    fn frame() -> RgbImage {
        RgbImage::from_pixel(64, 48, Rgb([0, 120, 0]))
    }

    fn read_jpeg(stream: &mut TcpStream) -> Vec<u8> {
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        read_frame(stream).unwrap().expect("frame")
    }

    #[test]
    fn no_viewer_means_nothing_is_sent() {
        let (mut server, _addr) = server();
        assert_eq!(server.step(&frame()), StepOutcome::NoViewer);
        assert!(!server.has_viewer());
    }

    #[test]
    fn connected_viewer_receives_jpeg_frames() {
        let (mut server, addr) = server();
        let mut client = TcpStream::connect(addr).unwrap();
        assert!(matches!(server.step(&frame()), StepOutcome::Sent { .. }));
        assert!(matches!(server.step(&frame()), StepOutcome::Sent { .. }));
        for _ in 0..2 {
            let jpeg = read_jpeg(&mut client);
            assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
            let decoded = image::load_from_memory(&jpeg).unwrap();
            assert_eq!(decoded.width(), 64);
        }
    }

    /// Step until the server lets go of its current viewer.
    fn step_until_released(server: &mut StreamServer) {
        for _ in 0..10 {
            thread::sleep(Duration::from_millis(30));
            if matches!(server.step(&frame()), StepOutcome::Dropped | StepOutcome::NoViewer) {
                return;
            }
        }
        panic!("closed viewer was never released");
    }

    fn has_pending(stream: &TcpStream) -> bool {
        stream.set_nonblocking(true).unwrap();
        let pending = matches!(stream.peek(&mut [0u8; 1]), Ok(n) if n > 0);
        stream.set_nonblocking(false).unwrap();
        pending
    }

    #[test]
    fn survives_a_disconnect_and_serves_the_next_viewer() {
        let (mut server, addr) = server();
        let mut first = TcpStream::connect(addr).unwrap();
        assert!(matches!(server.step(&frame()), StepOutcome::Sent { .. }));
        read_jpeg(&mut first);
        drop(first);

        step_until_released(&mut server);
        assert!(!server.has_viewer());

        // A free slot is filled on the very next step.
        let mut second = TcpStream::connect(addr).unwrap();
        assert!(matches!(server.step(&frame()), StepOutcome::Sent { .. }));
        let jpeg = read_jpeg(&mut second);
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn half_closed_viewer_keeps_receiving() {
        let (mut server, addr) = server();
        let mut client = TcpStream::connect(addr).unwrap();
        assert!(matches!(server.step(&frame()), StepOutcome::Sent { .. }));
        read_jpeg(&mut client);

        client.shutdown(std::net::Shutdown::Write).unwrap();
        thread::sleep(Duration::from_millis(30));
        assert!(matches!(server.step(&frame()), StepOutcome::Sent { .. }));
        assert!(matches!(server.step(&frame()), StepOutcome::Sent { .. }));
        assert!(server.has_viewer());
        for _ in 0..2 {
            let jpeg = read_jpeg(&mut client);
            assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        }
    }

    #[test]
    fn waiting_viewer_takes_over_once_the_first_is_gone() {
        let (mut server, addr) = server();
        let first = TcpStream::connect(addr).unwrap();
        assert!(matches!(server.step(&frame()), StepOutcome::Sent { .. }));

        let mut second = TcpStream::connect(addr).unwrap();
        assert!(matches!(server.step(&frame()), StepOutcome::Sent { .. }));
        assert!(!has_pending(&second));

        first.shutdown(std::net::Shutdown::Both).unwrap();
        drop(first);
        for _ in 0..10 {
            thread::sleep(Duration::from_millis(30));
            server.step(&frame());
            if has_pending(&second) {
                break;
            }
        }
        let jpeg = read_jpeg(&mut second);
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn chatty_viewer_is_not_mistaken_for_a_closed_one() {
        let (mut server, addr) = server();
        let mut client = TcpStream::connect(addr).unwrap();
        assert!(matches!(server.step(&frame()), StepOutcome::Sent { .. }));
        client.write_all(b"hello").unwrap();
        thread::sleep(Duration::from_millis(20));
        assert!(matches!(server.step(&frame()), StepOutcome::Sent { .. }));
    }
}
