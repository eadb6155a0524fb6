//! Data channel transport.
//!
//! One TCP connection per session carries `[u64 length][payload]` messages
//! in one direction. [`FrameSender`] writes each message with a single
//! `write_all`; [`FrameReceiver`] reads 4 KiB chunks into a
//! [`FrameAccumulator`] and hands out frames in write order. Each side owns
//! its own [`BitrateMeter`].

use std::io;
use std::time::{Duration, Instant};

use media_protocol::bitrate::{BitrateMeter, BitrateSample};
use media_protocol::frame::VideoFrame;
use media_protocol::framing::{encode_message, FrameAccumulator, READ_CHUNK_SIZE};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace};

use crate::devices::{CaptureDevice, OutputSink, SinkBackend};
use crate::errors::{Channel, RelayError};
use crate::observability::metrics::{self, Direction};

/// Wall clock for bitrate windows.
///
/// Reads tokio's clock so paused-time tests control it.
pub(crate) fn clock_now() -> Instant {
    tokio::time::Instant::now().into_std()
}

/// Read once, retrying on `Interrupted` and honoring an optional deadline.
///
/// Returns `Ok(0)` at end of stream.
pub(crate) async fn read_chunk<R>(
    reader: &mut R,
    buf: &mut [u8],
    deadline: Option<Duration>,
    channel: Channel,
) -> Result<usize, RelayError>
where
    R: AsyncRead + Unpin,
{
    loop {
        let result = match deadline {
            Some(timeout) => tokio::time::timeout(timeout, reader.read(buf))
                .await
                .map_err(|_| RelayError::ReadTimeout { channel, timeout })?,
            None => reader.read(buf).await,
        };
        match result {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                trace!(target: "relay.transport", %channel, "Read interrupted, retrying");
            }
            Err(source) => return Err(RelayError::Io { channel, source }),
        }
    }
}

/// Why a frame loop returned without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameLoopEnd {
    /// The capture device reported end of stream.
    CaptureEnded,
    /// The peer closed the data connection.
    PeerClosed,
}

/// Sending half of a data channel.
#[derive(Debug)]
pub struct FrameSender<W> {
    writer: W,
    meter: BitrateMeter,
    frames_sent: u64,
}

impl<W> FrameSender<W>
where
    W: AsyncWrite + Unpin,
{
    /// Wrap `writer`; the first bitrate window opens now.
    pub fn new(writer: W, bitrate_window: Duration) -> Self {
        Self {
            writer,
            meter: BitrateMeter::new(clock_now(), bitrate_window),
            frames_sent: 0,
        }
    }

    /// Encode, prefix and write one frame.
    ///
    /// Returns a bitrate sample when a report window has elapsed.
    ///
    /// # Errors
    ///
    /// A write failure is fatal to the session.
    pub async fn send(&mut self, frame: &VideoFrame) -> Result<Option<BitrateSample>, RelayError> {
        let message = encode_message(frame)?;
        self.writer
            .write_all(&message)
            .await
            .map_err(|source| RelayError::Io {
                channel: Channel::Data,
                source,
            })?;
        self.frames_sent += 1;
        self.meter.record(message.len());
        metrics::record_frame(Direction::Sent, message.len());
        Ok(self.meter.sample_if_due(clock_now()))
    }

    #[must_use]
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Flush and half-close the connection.
    ///
    /// # Errors
    ///
    /// Returns the socket error, if any.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}

/// A frame pulled off the data channel.
#[derive(Debug, Clone)]
pub struct ReceivedFrame {
    pub frame: VideoFrame,
    /// Present when this frame closed a bitrate window.
    pub bitrate: Option<BitrateSample>,
}

/// Receiving half of a data channel.
#[derive(Debug)]
pub struct FrameReceiver<R> {
    reader: R,
    accumulator: FrameAccumulator,
    meter: BitrateMeter,
    chunk: Vec<u8>,
    read_timeout: Option<Duration>,
    frames_received: u64,
}

impl<R> FrameReceiver<R>
where
    R: AsyncRead + Unpin,
{
    /// Wrap `reader`; the first bitrate window opens now.
    pub fn new(
        reader: R,
        max_frame_bytes: usize,
        bitrate_window: Duration,
        read_timeout: Option<Duration>,
    ) -> Self {
        Self {
            reader,
            accumulator: FrameAccumulator::new(max_frame_bytes),
            meter: BitrateMeter::new(clock_now(), bitrate_window),
            chunk: vec![0; READ_CHUNK_SIZE],
            read_timeout,
            frames_received: 0,
        }
    }

    /// Next frame, or `None` once the peer closes the connection.
    ///
    /// Cancel-safe: bytes already read stay buffered for the next call.
    ///
    /// # Errors
    ///
    /// Read failures, an expired read deadline, an oversized length prefix
    /// and undecodable payloads are all fatal to the session.
    pub async fn recv(&mut self) -> Result<Option<ReceivedFrame>, RelayError> {
        loop {
            if let Some(message) = self.accumulator.next_message()? {
                let frame = message.decode()?;
                self.frames_received += 1;
                self.meter.record(message.wire_len());
                metrics::record_frame(Direction::Received, message.wire_len());
                return Ok(Some(ReceivedFrame {
                    frame,
                    bitrate: self.meter.sample_if_due(clock_now()),
                }));
            }

            let n = read_chunk(
                &mut self.reader,
                &mut self.chunk,
                self.read_timeout,
                Channel::Data,
            )
            .await?;
            if n == 0 {
                if self.accumulator.is_mid_message() {
                    debug!(
                        target: "relay.transport",
                        discarded = self.accumulator.buffered(),
                        "Peer closed the data channel mid-frame"
                    );
                }
                return Ok(None);
            }
            self.accumulator.push(self.chunk.get(..n).unwrap_or_default());
        }
    }

    #[must_use]
    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    /// Half-close the underlying connection.
    ///
    /// # Errors
    ///
    /// Returns the socket error, if any.
    pub async fn shutdown(&mut self) -> io::Result<()>
    where
        R: AsyncWrite,
    {
        self.reader.shutdown().await
    }
}

/// Time between captured frames at `frame_rate`.
fn frame_interval(frame_rate: u32) -> Duration {
    Duration::from_secs_f64(1.0 / f64::from(frame_rate.max(1)))
}

fn log_bitrate(direction: Direction, sample: &BitrateSample) {
    metrics::set_bitrate(direction, sample.bits_per_second());
    info!(
        target: "relay.transport",
        direction = direction.as_str(),
        mbps = sample.megabits_per_second(),
        bytes = sample.bytes,
        "Bitrate"
    );
}

/// Pull frames from `capture` at `frame_rate` and send them until the
/// capture ends or a send fails.
///
/// # Errors
///
/// Capture read and socket write failures.
pub async fn run_send_loop<W>(
    sender: &mut FrameSender<W>,
    capture: &mut dyn CaptureDevice,
    frame_rate: u32,
    mut on_bitrate: impl FnMut(&BitrateSample) + Send,
) -> Result<FrameLoopEnd, RelayError>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut pacing = tokio::time::interval(frame_interval(frame_rate));
    pacing.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        pacing.tick().await;
        let Some(frame) = capture.read_frame().await? else {
            info!(
                target: "relay.transport",
                frames = sender.frames_sent(),
                "Capture reached end of stream"
            );
            return Ok(FrameLoopEnd::CaptureEnded);
        };
        if let Some(sample) = sender.send(&frame).await? {
            log_bitrate(Direction::Sent, &sample);
            on_bitrate(&sample);
        }
    }
}

/// Receive frames and write them to the output sink until the peer closes.
///
/// The sink is opened on the first frame, sized from that frame.
///
/// # Errors
///
/// Socket, framing, decode and sink failures.
pub async fn run_receive_loop<R>(
    receiver: &mut FrameReceiver<R>,
    sink: &mut Option<Box<dyn OutputSink>>,
    sink_backend: &dyn SinkBackend,
    frame_rate: u32,
    mut on_bitrate: impl FnMut(&BitrateSample) + Send,
) -> Result<FrameLoopEnd, RelayError>
where
    R: AsyncRead + Unpin + Send,
{
    loop {
        let Some(received) = receiver.recv().await? else {
            info!(
                target: "relay.transport",
                frames = receiver.frames_received(),
                "Peer closed the data channel"
            );
            return Ok(FrameLoopEnd::PeerClosed);
        };

        if sink.is_none() {
            let opened = sink_backend
                .open(received.frame.width(), received.frame.height(), frame_rate)
                .await?;
            *sink = Some(opened);
        }
        let Some(out) = sink.as_mut() else {
            return Err(RelayError::Internal("output sink missing".to_string()));
        };
        out.write_frame(&received.frame).await?;

        if let Some(sample) = received.bitrate {
            log_bitrate(Direction::Received, &sample);
            on_bitrate(&sample);
        }
    }
}
