// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::protocol::{
    Error, Payload, ProtocolVariant, Target, Targets, FRAME_FOOTER, FRAME_HEADER,
};
use log::{debug, trace, warn};
use std::io::Read;

/// Counters for the anomalies the decoder recovers from on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecoderStats {
    /// Frames with a valid header and length
    pub frames: u64,
    /// Frames with a zero length field
    pub empty_frames: u64,
    /// Targets decoded
    pub targets: u64,
    /// Spurious 0xF4 bytes followed by a mismatched header remainder
    pub resyncs: u64,
    /// Bytes skipped while scanning for the first header byte
    pub skipped_bytes: u64,
    /// Frames dropped because the payload was too short for its targets
    pub short_payloads: u64,
    /// Frames whose trailing 4 bytes were not the frame footer
    pub bad_footers: u64,
    /// Frames reporting an alarm
    pub alarm_frames: u64,
}

/// Frame synchronization state machine for the LD2451 target report stream.
///
/// The decoder holds no state between frames apart from its counters, every
/// frame starts with a fresh header scan.
#[derive(Debug, Clone, Default)]
pub struct FrameDecoder {
    variant: ProtocolVariant,
    stats: DecoderStats,
}

impl FrameDecoder {
    /// Creates a decoder for the given payload layout.
    pub fn new(variant: ProtocolVariant) -> FrameDecoder {
        FrameDecoder {
            variant,
            stats: DecoderStats::default(),
        }
    }

    /// Returns the payload layout handled by this decoder.
    pub fn variant(&self) -> ProtocolVariant {
        self.variant
    }

    /// Returns a snapshot of the decoder counters.
    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Reads bytes until the full frame header has been consumed.
    ///
    /// The scan is byte-at-a-time for the first header byte.  Once it
    /// matches, the next three bytes are read as a block and discarded as a
    /// whole on mismatch, a header starting inside that block is not found.
    pub fn sync<R: Read>(&mut self, src: &mut R) -> Result<(), Error> {
        let mut byte = [0u8; 1];
        let mut rest = [0u8; 3];

        loop {
            src.read_exact(&mut byte)?;
            if byte[0] != FRAME_HEADER[0] {
                self.stats.skipped_bytes += 1;
                continue;
            }

            src.read_exact(&mut rest)?;
            if rest[..] == FRAME_HEADER[1..] {
                return Ok(());
            }

            self.stats.resyncs += 1;
            debug!("header mismatch after 0xF4: {:02X?}", rest);
        }
    }

    /// Reads the next frame up to the end of its payload.
    ///
    /// Returns `Ok(None)` for frames that carry no targets to emit: zero
    /// length frames (whose footer is consumed here) and frames whose
    /// payload is too short for the declared target count (whose footer is
    /// left for the next header scan to skip).  Only I/O failures are
    /// returned as errors.
    pub fn read_frame<R: Read>(&mut self, src: &mut R) -> Result<Option<Payload>, Error> {
        self.sync(src)?;

        let mut len = [0u8; 2];
        src.read_exact(&mut len)?;
        let frame_len = u16::from_le_bytes(len) as usize;
        self.stats.frames += 1;

        if frame_len == 0 {
            self.stats.empty_frames += 1;
            self.read_footer(src)?;
            return Ok(None);
        }

        let mut data = vec![0; frame_len];
        src.read_exact(&mut data)?;
        trace!("frame payload: {:02X?}", data);

        match Payload::new(data, self.variant) {
            Ok(payload) => {
                if payload.alarm() {
                    self.stats.alarm_frames += 1;
                    trace!("frame alarm raised");
                }
                Ok(Some(payload))
            }
            Err(Error::ShortPayload { targets, available }) => {
                self.stats.short_payloads += 1;
                warn!(
                    "dropping frame: {} targets declared with {} bytes available",
                    targets, available
                );
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Consumes the 4-byte frame footer.  A mismatch is counted and logged,
    /// the following header scan recovers alignment.
    pub fn read_footer<R: Read>(&mut self, src: &mut R) -> Result<(), Error> {
        let mut footer = [0u8; 4];
        src.read_exact(&mut footer)?;

        if footer != FRAME_FOOTER {
            self.stats.bad_footers += 1;
            warn!("invalid frame footer: {:02X?}", footer);
        }

        Ok(())
    }

    /// Turns a byte source into a lazy sequence of decoded targets.
    pub fn stream<R: Read>(self, source: R) -> TargetStream<R> {
        TargetStream {
            source,
            decoder: self,
            frame: None,
            done: false,
            on_frame: None,
        }
    }
}

type StatsHook = Box<dyn FnMut(DecoderStats) + Send>;

/// Lazy, non-restartable sequence of targets decoded from a byte source.
///
/// Targets are yielded as soon as they are decoded, in wire order.  The
/// first I/O failure is yielded once as an error, after which the stream is
/// exhausted.
pub struct TargetStream<R> {
    source: R,
    decoder: FrameDecoder,
    frame: Option<Targets>,
    done: bool,
    on_frame: Option<StatsHook>,
}

impl<R: Read> TargetStream<R> {
    /// Registers a hook receiving the decoder counters after every frame,
    /// every decoded target and the terminal error, including frames which
    /// yield no targets.
    pub fn on_frame<F>(mut self, hook: F) -> Self
    where
        F: FnMut(DecoderStats) + Send + 'static,
    {
        self.on_frame = Some(Box::new(hook));
        self
    }

    /// Returns a snapshot of the decoder counters.
    pub fn stats(&self) -> DecoderStats {
        self.decoder.stats()
    }

    /// Returns true once the terminal error has been yielded.
    pub fn is_done(&self) -> bool {
        self.done
    }

    fn publish(&mut self) {
        let stats = self.decoder.stats;
        if let Some(hook) = &mut self.on_frame {
            hook(stats);
        }
    }

    fn advance(&mut self) -> Result<Target, Error> {
        loop {
            if let Some(frame) = &mut self.frame {
                if let Some(target) = frame.next() {
                    self.decoder.stats.targets += 1;
                    self.publish();
                    return Ok(target);
                }

                self.frame = None;
                self.decoder.read_footer(&mut self.source)?;
                self.publish();
            }

            let payload = self.decoder.read_frame(&mut self.source)?;
            self.publish();
            if let Some(payload) = payload {
                self.frame = Some(payload.into_targets());
            }
        }
    }
}

impl<R: Read> Iterator for TargetStream<R> {
    type Item = Result<Target, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.advance() {
            Ok(target) => Some(Ok(target)),
            Err(err) => {
                self.done = true;
                self.frame = None;
                self.publish();
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Direction;
    use std::io::{self, Cursor};

    const SCENARIO: [u8; 17] = [
        0xF4, 0xF3, 0xF2, 0xF1, 0x07, 0x00, 0x01, 0x00, 0x90, 0x0A, 0x01, 0x14, 0x1E, 0xF8, 0xF7,
        0xF6, 0xF5,
    ];

    const EMPTY_FRAME: [u8; 10] = [0xF4, 0xF3, 0xF2, 0xF1, 0x00, 0x00, 0xF8, 0xF7, 0xF6, 0xF5];

    /// Builds a frame from 5-byte `[angle, distance, direction, speed, snr]`
    /// records with the per-target alarm byte set to `alarm`.
    fn frame(targets: &[[u8; 5]], alarm: u8) -> Vec<u8> {
        let mut payload = vec![targets.len() as u8];
        for target in targets {
            payload.push(alarm);
            payload.extend_from_slice(target);
        }

        let mut frame = FRAME_HEADER.to_vec();
        frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        frame.extend_from_slice(&payload);
        frame.extend_from_slice(&FRAME_FOOTER);
        frame
    }

    fn decode(bytes: Vec<u8>, variant: ProtocolVariant) -> (Vec<Target>, Error, DecoderStats) {
        let mut stream = FrameDecoder::new(variant).stream(Cursor::new(bytes));
        let mut targets = Vec::new();

        loop {
            match stream.next() {
                Some(Ok(target)) => targets.push(target),
                Some(Err(err)) => {
                    assert!(stream.next().is_none());
                    return (targets, err, stream.stats());
                }
                None => panic!("stream ended without a terminal error"),
            }
        }
    }

    fn is_eof(err: &Error) -> bool {
        matches!(err, Error::Io(err) if err.kind() == io::ErrorKind::UnexpectedEof)
    }

    #[test]
    fn test_scenario_frame() {
        let (targets, err, stats) = decode(SCENARIO.to_vec(), ProtocolVariant::TargetAlarm);

        assert_eq!(
            targets,
            vec![Target {
                angle: 16,
                distance: 10,
                direction: Direction::Toward,
                speed: 20,
                snr: 30,
                alarm: Some(false),
            }]
        );
        assert!(is_eof(&err));
        assert_eq!(stats.frames, 1);
        assert_eq!(stats.targets, 1);
        assert_eq!(stats.bad_footers, 0);
        assert_eq!(stats.skipped_bytes, 0);
    }

    #[test]
    fn test_targets_in_payload_order() {
        let records = [
            [0x80, 0x01, 0x00, 0x05, 0x10],
            [0x81, 0x02, 0x01, 0x06, 0x11],
            [0x7F, 0x03, 0x02, 0x07, 0x12],
        ];
        let mut bytes = frame(&records, 0);
        bytes.extend(frame(&records[..1], 1));

        let (targets, err, stats) = decode(bytes, ProtocolVariant::TargetAlarm);
        assert!(is_eof(&err));
        assert_eq!(targets.len(), 4);

        let angles: Vec<_> = targets.iter().map(|t| t.angle).collect();
        assert_eq!(angles, vec![0, 1, -1, 0]);
        assert_eq!(targets[2].direction, Direction::Unknown(2));
        assert_eq!(targets[2].speed, 7);
        assert_eq!(targets[3].alarm, Some(true));
        assert_eq!(stats.frames, 2);
        assert_eq!(stats.alarm_frames, 1);
    }

    #[test]
    fn test_empty_frame() {
        let mut bytes = EMPTY_FRAME.to_vec();
        bytes.extend_from_slice(&SCENARIO);

        let (targets, err, stats) = decode(bytes, ProtocolVariant::TargetAlarm);
        assert!(is_eof(&err));
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].angle, 16);
        assert_eq!(stats.frames, 2);
        assert_eq!(stats.empty_frames, 1);
        assert_eq!(stats.skipped_bytes, 0);
        assert_eq!(stats.bad_footers, 0);
    }

    #[test]
    fn test_zero_target_frame() {
        let mut bytes = frame(&[], 0);
        bytes.extend_from_slice(&SCENARIO);

        let (targets, _, stats) = decode(bytes, ProtocolVariant::TargetAlarm);
        assert_eq!(targets.len(), 1);
        assert_eq!(stats.frames, 2);
        assert_eq!(stats.empty_frames, 0);
    }

    #[test]
    fn test_short_payload_resync() {
        // Three targets declared but only one complete record present.
        let mut bytes = vec![
            0xF4, 0xF3, 0xF2, 0xF1, 0x09, 0x00, 0x03, 0x00, 0x90, 0x0A, 0x01, 0x14, 0x1E, 0x00,
            0x90, 0xF8, 0xF7, 0xF6, 0xF5,
        ];
        bytes.extend(frame(&[[0x85, 0x20, 0x00, 0x30, 0x40]], 0));

        let (targets, err, stats) = decode(bytes, ProtocolVariant::TargetAlarm);
        assert!(is_eof(&err));
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].angle, 5);
        assert_eq!(targets[0].distance, 0x20);
        assert_eq!(stats.short_payloads, 1);
        assert_eq!(stats.frames, 2);
        // The footer of the dropped frame is skipped by the header scan.
        assert_eq!(stats.skipped_bytes, 4);
    }

    #[test]
    fn test_noise_before_header() {
        let mut bytes = vec![0x00, 0x13, 0xF5, 0xF3, 0xF2, 0xF1, 0x42];
        // Spurious 0xF4 followed by a mismatched remainder.
        bytes.extend_from_slice(&[0xF4, 0x00, 0x01, 0x02]);
        bytes.extend_from_slice(&[0xF4, 0xF3, 0xF2, 0x00]);
        bytes.extend_from_slice(&[0x55, 0xAA]);
        bytes.extend_from_slice(&SCENARIO);

        let (targets, err, stats) = decode(bytes, ProtocolVariant::TargetAlarm);
        assert!(is_eof(&err));
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].snr, 30);
        assert_eq!(stats.skipped_bytes, 9);
        assert_eq!(stats.resyncs, 2);
        assert_eq!(stats.frames, 1);
    }

    #[test]
    fn test_overlapping_header_missed() {
        // The second 0xF4 lands inside the block discarded after the first,
        // so this header is lost.
        let mut bytes = vec![0xF4];
        bytes.extend_from_slice(&SCENARIO);

        let (targets, err, stats) = decode(bytes.clone(), ProtocolVariant::TargetAlarm);
        assert!(is_eof(&err));
        assert!(targets.is_empty());
        assert_eq!(stats.resyncs, 1);
        assert_eq!(stats.frames, 0);

        // A later header is still found.
        bytes.extend_from_slice(&SCENARIO);
        let (targets, _, stats) = decode(bytes, ProtocolVariant::TargetAlarm);
        assert_eq!(targets.len(), 1);
        assert_eq!(stats.frames, 1);
    }

    #[test]
    fn test_bad_footer() {
        let mut bytes = SCENARIO.to_vec();
        bytes[13] = 0x00;
        bytes.extend_from_slice(&SCENARIO);

        let (targets, _, stats) = decode(bytes, ProtocolVariant::TargetAlarm);
        assert_eq!(targets.len(), 2);
        assert_eq!(stats.bad_footers, 1);
        assert_eq!(stats.frames, 2);
    }

    #[test]
    fn test_frame_alarm_variant() {
        let bytes = vec![
            0xF4, 0xF3, 0xF2, 0xF1, 0x0E, 0x00, 0x02, 0x01, // count, frame alarm
            0x00, 0x90, 0x0A, 0x01, 0x14, 0x1E, // target 0
            0x00, 0x60, 0x64, 0x00, 0x78, 0x05, // target 1
            0xF8, 0xF7, 0xF6, 0xF5,
        ];

        let (targets, err, stats) = decode(bytes, ProtocolVariant::FrameAlarm);
        assert!(is_eof(&err));
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].angle, 16);
        assert_eq!(targets[0].alarm, None);
        assert_eq!(targets[1].angle, -32);
        assert_eq!(targets[1].distance, 100);
        assert_eq!(targets[1].direction, Direction::Away);
        assert_eq!(targets[1].speed, 120);
        assert_eq!(stats.alarm_frames, 1);
        assert_eq!(stats.bad_footers, 0);
    }

    #[test]
    fn test_truncated_stream() {
        // The stream ends in the middle of the payload: the targets of the
        // incomplete frame are never emitted.
        let bytes = SCENARIO[..10].to_vec();
        let (targets, err, _) = decode(bytes, ProtocolVariant::TargetAlarm);
        assert!(targets.is_empty());
        assert!(is_eof(&err));
    }

    #[test]
    fn test_stats_published_per_frame() {
        let mut bytes = EMPTY_FRAME.to_vec();
        bytes.extend_from_slice(&EMPTY_FRAME);
        // One target declared, no record present.
        bytes.extend_from_slice(&[0xF4, 0xF3, 0xF2, 0xF1, 0x01, 0x00, 0x01]);
        bytes.extend_from_slice(&FRAME_FOOTER);

        let (tx, rx) = std::sync::mpsc::channel();
        let mut stream = FrameDecoder::default()
            .stream(Cursor::new(bytes))
            .on_frame(move |stats| tx.send(stats).unwrap());

        // No target is ever yielded, only the terminal error.
        assert!(matches!(stream.next(), Some(Err(_))));

        let published: Vec<DecoderStats> = rx.try_iter().collect();
        let frames: Vec<_> = published.iter().map(|s| s.frames).collect();
        assert_eq!(frames, vec![1, 2, 3, 3]);

        let last = published.last().unwrap();
        assert_eq!(last.empty_frames, 2);
        assert_eq!(last.short_payloads, 1);
        assert_eq!(last.skipped_bytes, 4);
        assert_eq!(*last, stream.stats());
    }

    #[test]
    fn test_io_error_is_terminal() {
        struct Failing;

        impl Read for Failing {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::TimedOut, "read timeout"))
            }
        }

        let mut stream = FrameDecoder::default().stream(Failing);
        match stream.next() {
            Some(Err(Error::Io(err))) => assert_eq!(err.kind(), io::ErrorKind::TimedOut),
            other => panic!("expected timeout, got {:?}", other),
        }
        assert!(stream.is_done());
        assert!(stream.next().is_none());
        assert!(stream.next().is_none());
    }
}
