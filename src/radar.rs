// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    command::{self, ConfigAck},
    common::set_thread_priority,
    decoder::{DecoderStats, FrameDecoder, TargetStream},
    protocol::{Error, ProtocolVariant, Target},
};
use kanal::{ReceiveErrorTimeout, Receiver, Sender};
use serialport::{DataBits, Parity, SerialPort, StopBits};
use std::{
    io::{self, Read, Write},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use tracing::{debug, error, info, instrument};

/// Factory default baud rate of the LD2451.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default number of decoded targets queued for the consumer.
pub const DEFAULT_BUFFER_SIZE: usize = 16;

/// Default serial read timeout.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Radar connection settings, fixed once the radar is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Serial device path, for example `/dev/ttyUSB0`
    pub serial_port: String,
    /// Serial baud rate
    pub baud_rate: u32,
    /// Number of decoded targets queued before the decode loop blocks
    pub target_buffer_size: usize,
    /// Serial read timeout, a timeout ends the decode loop
    pub read_timeout: Duration,
    /// Payload layout reported by the sensor firmware
    pub variant: ProtocolVariant,
    /// Run the decode thread with real-time priority
    pub realtime: bool,
}

impl Config {
    /// Creates a configuration with factory defaults for `serial_port`.
    pub fn new(serial_port: impl Into<String>) -> Config {
        Config {
            serial_port: serial_port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            target_buffer_size: DEFAULT_BUFFER_SIZE,
            read_timeout: DEFAULT_READ_TIMEOUT,
            variant: ProtocolVariant::default(),
            realtime: false,
        }
    }
}

/// Opens the serial device described by `config` (8N1, no flow control).
pub fn open_port(config: &Config) -> Result<Box<dyn SerialPort>, Error> {
    debug!(
        "opening {} at {} baud",
        config.serial_port, config.baud_rate
    );

    let port = serialport::new(&config.serial_port, config.baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .timeout(config.read_timeout)
        .open()?;

    Ok(port)
}

/// Byte source wrapper which fails every read once the radar is closed.
struct Closable<S> {
    inner: S,
    closed: Arc<AtomicBool>,
}

impl<S: Read> Read for Closable<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "radar closed"));
        }
        self.inner.read(buf)
    }
}

type Item = Result<Target, Error>;

/// HLK-LD2451 radar handle.
///
/// Opening the radar starts a dedicated decode thread which feeds decoded
/// targets into a bounded queue.  When the queue is full the decode thread
/// blocks until the consumer catches up, targets are never dropped.
///
/// The first transport failure ends the decode thread.  It is delivered once
/// after every target decoded before it, later calls return an equivalent
/// error without blocking.
pub struct Ld2451<P = Box<dyn SerialPort>> {
    config: Config,
    port: P,
    targets: Option<Receiver<Item>>,
    terminal: Option<(io::ErrorKind, String)>,
    closed: Arc<AtomicBool>,
    stats: Arc<Mutex<DecoderStats>>,
    decoder: Option<JoinHandle<()>>,
}

impl Ld2451 {
    /// Opens the serial device and starts decoding targets.
    pub fn open(config: Config) -> Result<Ld2451, Error> {
        let port = open_port(&config)?;
        let source = port.try_clone()?;
        info!(
            "opened {} baud_rate={} variant={}",
            config.serial_port, config.baud_rate, config.variant
        );

        Ld2451::with_transport(config, source, port)
    }
}

impl<P> Ld2451<P> {
    /// Starts decoding targets from `source`.  The `port` handle is used
    /// for command exchanges and is expected to share the link with
    /// `source`.
    pub fn with_transport<S>(config: Config, source: S, port: P) -> Result<Ld2451<P>, Error>
    where
        S: Read + Send + 'static,
    {
        let (tx, rx) = kanal::bounded(config.target_buffer_size);
        let closed = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(Mutex::new(DecoderStats::default()));

        let source = Closable {
            inner: source,
            closed: closed.clone(),
        };
        let shared = stats.clone();
        let stream = FrameDecoder::new(config.variant)
            .stream(source)
            .on_frame(move |counters| {
                if let Ok(mut stats) = shared.lock() {
                    *stats = counters;
                }
            });
        let realtime = config.realtime;

        let decoder = thread::Builder::new()
            .name("ld2451-decode".to_string())
            .spawn(move || {
                if realtime {
                    set_thread_priority();
                }
                decode_loop(stream, tx);
            })?;

        Ok(Ld2451 {
            config,
            port,
            targets: Some(rx),
            terminal: None,
            closed,
            stats,
            decoder: Some(decoder),
        })
    }

    /// Returns the configuration the radar was opened with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the decoder counters as of the last frame, including frames
    /// which carried no targets.
    pub fn stats(&self) -> DecoderStats {
        match self.stats.lock() {
            Ok(stats) => *stats,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Returns true while the decode thread is running.
    pub fn is_running(&self) -> bool {
        self.decoder
            .as_ref()
            .is_some_and(|decoder| !decoder.is_finished())
    }

    /// Blocks until the next target or the terminal error is available.
    pub fn next_target(&mut self) -> Result<Target, Error> {
        let received = self.receiver()?.recv();
        match received {
            Ok(item) => self.deliver(item),
            Err(_) => Err(self.disconnected()),
        }
    }

    /// Returns the next queued target without blocking, `Ok(None)` when the
    /// queue is empty.
    pub fn try_next_target(&mut self) -> Result<Option<Target>, Error> {
        let received = self.receiver()?.try_recv();
        match received {
            Ok(Some(item)) => self.deliver(item).map(Some),
            Ok(None) => Ok(None),
            Err(_) => Err(self.disconnected()),
        }
    }

    /// Waits up to `timeout` for the next target, `Ok(None)` on timeout.
    pub fn next_target_timeout(&mut self, timeout: Duration) -> Result<Option<Target>, Error> {
        let received = self.receiver()?.recv_timeout(timeout);
        match received {
            Ok(item) => self.deliver(item).map(Some),
            Err(ReceiveErrorTimeout::Timeout) => Ok(None),
            Err(_) => Err(self.disconnected()),
        }
    }

    /// Stops target delivery.  The decode thread exits on its next read or
    /// queue insertion and every later call returns [`Error::Closed`].
    pub fn close(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.targets = None;
        info!("closed {}", self.config.serial_port);
    }

    fn receiver(&self) -> Result<&Receiver<Item>, Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }

        if let Some((kind, msg)) = &self.terminal {
            return Err(Error::Io(io::Error::new(*kind, msg.clone())));
        }

        self.targets.as_ref().ok_or(Error::Closed)
    }

    fn deliver(&mut self, item: Item) -> Result<Target, Error> {
        match item {
            Ok(target) => Ok(target),
            Err(err) => {
                self.terminal = Some(match &err {
                    Error::Io(io) => (io.kind(), io.to_string()),
                    other => (io::ErrorKind::Other, other.to_string()),
                });
                Err(err)
            }
        }
    }

    /// The decode thread went away without reporting an error.
    fn disconnected(&mut self) -> Error {
        error!("decode thread exited without a terminal error");
        self.targets = None;
        Error::Closed
    }
}

impl<P: Read + Write> Ld2451<P> {
    /// Runs the enter/exit configuration exchange on the command port.
    ///
    /// The decode thread reads from the same link, callers must make sure it
    /// is not consuming bytes while the exchange runs or the ack bytes will
    /// be interleaved with target frames.  See [`command::execute`].
    #[instrument(skip(self), fields(port = %self.config.serial_port))]
    pub fn send_command(&mut self) -> Result<ConfigAck, Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }

        command::execute(&mut self.port).inspect_err(|err| error!("command failed: {}", err))
    }
}

impl<P> Drop for Ld2451<P> {
    fn drop(&mut self) {
        self.close();
    }
}

fn decode_loop<R: Read>(stream: TargetStream<R>, tx: Sender<Item>) {
    for item in stream {
        if let Err(err) = &item {
            error!("decoder stopped: {}", err);
        }

        if tx.send(item).is_err() {
            debug!("target receiver closed");
            break;
        }
    }

    debug!("decode loop exited");
}
