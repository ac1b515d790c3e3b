// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use log::trace;
use std::{fmt, io};

/// Fixed start-of-frame marker for target reports.
pub const FRAME_HEADER: [u8; 4] = [0xF4, 0xF3, 0xF2, 0xF1];

/// Fixed end-of-frame marker for target reports, not counted in the length.
pub const FRAME_FOOTER: [u8; 4] = [0xF8, 0xF7, 0xF6, 0xF5];

/// Size of one target record in the payload target block.
pub const TARGET_LEN: usize = 6;

/// LD2451 driver error types.
#[derive(Debug)]
pub enum Error {
    /// I/O error from the byte source or sink, fatal for the decode loop
    Io(io::Error),
    /// Serial device could not be opened or configured
    Serial(serialport::Error),
    /// Declared target count needs more bytes than the payload carries
    ShortPayload {
        /// Number of targets declared by the frame
        targets: u8,
        /// Bytes available for the target block
        available: usize,
    },
    /// Read past the end of a byte slice
    UnexpectedEndOfSlice {
        /// Offset the read started at
        offset: usize,
        /// Length of the slice
        len: usize,
    },
    /// Ack did not start with the 0xFD marker
    AckMarker(u8),
    /// Ack status field was not 00 00
    AckStatus([u8; 2]),
    /// Ack did not end with 04 03 02 01
    AckTerminator([u8; 4]),
    /// The radar has been closed
    Closed,
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}

impl From<serialport::Error> for Error {
    fn from(err: serialport::Error) -> Error {
        Error::Serial(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Io(err) => write!(f, "io error: {}", err),
            Error::Serial(err) => write!(f, "serial error: {}", err),
            Error::ShortPayload { targets, available } => write!(
                f,
                "short payload: {} targets need {} bytes but only {} available",
                targets,
                *targets as usize * TARGET_LEN,
                available
            ),
            Error::UnexpectedEndOfSlice { offset, len } => {
                write!(f, "unexpected end of slice: offset {} of {}", offset, len)
            }
            Error::AckMarker(marker) => write!(f, "unexpected ack marker: 0x{:02X}", marker),
            Error::AckStatus(status) => write!(f, "command failed with status {:02X?}", status),
            Error::AckTerminator(end) => write!(f, "invalid ack terminator: {:02X?}", end),
            Error::Closed => write!(f, "radar closed"),
        }
    }
}

/// Direction of movement relative to the antenna.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Moving away from the sensor
    Away,
    /// Approaching the sensor
    Toward,
    /// Any other raw value reported by the sensor
    Unknown(u8),
}

impl From<u8> for Direction {
    fn from(value: u8) -> Self {
        match value {
            0 => Direction::Away,
            1 => Direction::Toward,
            other => Direction::Unknown(other),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Direction::Away => write!(f, "Away"),
            Direction::Toward => write!(f, "Toward"),
            Direction::Unknown(_) => write!(f, "Unknown"),
        }
    }
}

/// Payload layout of the target report frame.
///
/// Both layouts use 6-byte target records; they differ in where the alarm
/// flag lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolVariant {
    /// `count` then records of `[alarm, angle, distance, direction, speed, snr]`.
    #[default]
    TargetAlarm,
    /// `count alarm` then records of `[reserved, angle, distance, direction,
    /// speed, snr]`.
    FrameAlarm,
}

impl ProtocolVariant {
    /// Number of payload bytes in front of the target block.
    pub fn header_len(&self) -> usize {
        match self {
            ProtocolVariant::TargetAlarm => 1,
            ProtocolVariant::FrameAlarm => 2,
        }
    }
}

impl clap::ValueEnum for ProtocolVariant {
    fn value_variants<'a>() -> &'a [Self] {
        &[ProtocolVariant::TargetAlarm, ProtocolVariant::FrameAlarm]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        match self {
            Self::TargetAlarm => Some(clap::builder::PossibleValue::new("target-alarm")),
            Self::FrameAlarm => Some(clap::builder::PossibleValue::new("frame-alarm")),
        }
    }
}

impl fmt::Display for ProtocolVariant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProtocolVariant::TargetAlarm => write!(f, "target-alarm"),
            ProtocolVariant::FrameAlarm => write!(f, "frame-alarm"),
        }
    }
}

/// Detected radar target from one report frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    /// Angle in degrees relative to the antenna perpendicular
    pub angle: i16,
    /// Distance in meters
    pub distance: u8,
    /// Direction of movement relative to the antenna
    pub direction: Direction,
    /// Speed in km/h
    pub speed: u8,
    /// Signal to noise ratio
    pub snr: u8,
    /// Per-target alarm flag, only reported by [`ProtocolVariant::TargetAlarm`]
    pub alarm: Option<bool>,
}

impl Target {
    /// Decodes one 6-byte target record.
    pub fn from_record(record: &[u8; TARGET_LEN], variant: ProtocolVariant) -> Self {
        let alarm = match variant {
            ProtocolVariant::TargetAlarm => Some(record[0] == 1),
            ProtocolVariant::FrameAlarm => None,
        };

        Target {
            angle: record[1] as i16 - 0x80,
            distance: record[2],
            direction: Direction::from(record[3]),
            speed: record[4],
            snr: record[5],
            alarm,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Target => angle: {}° distance: {}m direction: {} speed: {}km/h snr: {}",
            self.angle, self.distance, self.direction, self.speed, self.snr
        )?;
        match self.alarm {
            Some(alarm) => write!(f, " alarm: {}", alarm),
            None => Ok(()),
        }
    }
}

/// Bounds-checked read cursor over a byte slice.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    /// Creates a cursor positioned at `offset`.
    pub fn new(data: &'a [u8], offset: usize) -> Self {
        Cursor { data, offset }
    }

    /// Bytes left after the cursor.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.offset)
    }

    /// Reads one byte, failing with `UnexpectedEndOfSlice` at the end.
    pub fn u8(&mut self) -> Result<u8, Error> {
        let [value] = self.array::<1>()?;
        Ok(value)
    }

    /// Reads the next `N` bytes, failing with `UnexpectedEndOfSlice` if fewer
    /// remain.
    pub fn array<const N: usize>(&mut self) -> Result<[u8; N], Error> {
        let end = self.offset + N;
        match self.data.get(self.offset..end) {
            Some(bytes) => {
                let mut out = [0u8; N];
                out.copy_from_slice(bytes);
                self.offset = end;
                Ok(out)
            }
            None => Err(Error::UnexpectedEndOfSlice {
                offset: self.offset,
                len: self.data.len(),
            }),
        }
    }
}

/// Validated payload of one target report frame.
///
/// Construction checks that the declared target count fits, so iterating
/// the targets never yields a partial frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    data: Vec<u8>,
    variant: ProtocolVariant,
}

impl Payload {
    /// Validates a payload read from the wire.
    pub fn new(data: Vec<u8>, variant: ProtocolVariant) -> Result<Payload, Error> {
        if data.len() < variant.header_len() || !fits(&data, variant) {
            return Err(short_payload(&data, variant));
        }

        let targets = data[0];
        let available = data.len() - variant.header_len();

        let trailing = available - targets as usize * TARGET_LEN;
        if trailing > 0 {
            trace!("payload carries {} trailing bytes", trailing);
        }

        Ok(Payload { data, variant })
    }

    /// Number of targets declared by the frame.
    pub fn n_targets(&self) -> u8 {
        self.data[0]
    }

    /// Alarm state of the frame: the frame-level flag for
    /// [`ProtocolVariant::FrameAlarm`], or whether any target raised its
    /// flag for [`ProtocolVariant::TargetAlarm`].
    pub fn alarm(&self) -> bool {
        match self.variant {
            ProtocolVariant::FrameAlarm => self.data[1] == 1,
            ProtocolVariant::TargetAlarm => (0..self.n_targets() as usize)
                .any(|index| self.data.get(1 + index * TARGET_LEN) == Some(&1)),
        }
    }

    /// Decodes the target at `index`.
    pub fn target(&self, index: u8) -> Result<Target, Error> {
        let offset = self.variant.header_len() + index as usize * TARGET_LEN;
        let record = Cursor::new(&self.data, offset)
            .array::<TARGET_LEN>()
            .map_err(|_| short_payload(&self.data, self.variant))?;
        Ok(Target::from_record(&record, self.variant))
    }

    /// Iterates over the targets of this payload in wire order.
    pub fn targets(&self) -> impl Iterator<Item = Target> + '_ {
        (0..self.n_targets()).filter_map(|index| self.target(index).ok())
    }

    /// Converts into an owning iterator over the targets.
    pub fn into_targets(self) -> Targets {
        Targets {
            payload: self,
            index: 0,
        }
    }
}

/// Whether the declared target count fits in the payload.
fn fits(data: &[u8], variant: ProtocolVariant) -> bool {
    match data.first() {
        Some(&targets) => {
            data.len().saturating_sub(variant.header_len()) >= targets as usize * TARGET_LEN
        }
        None => false,
    }
}

fn short_payload(data: &[u8], variant: ProtocolVariant) -> Error {
    Error::ShortPayload {
        targets: data.first().copied().unwrap_or(0),
        available: data.len().saturating_sub(variant.header_len()),
    }
}

/// Owning iterator over the targets of one payload.
#[derive(Debug, Clone)]
pub struct Targets {
    payload: Payload,
    index: u8,
}

impl Iterator for Targets {
    type Item = Target;

    fn next(&mut self) -> Option<Target> {
        if self.index >= self.payload.n_targets() {
            return None;
        }

        let target = self.payload.target(self.index).ok()?;
        self.index += 1;
        Some(target)
    }
}
