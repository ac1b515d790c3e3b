// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::protocol::Error;
use log::{debug, trace};
use std::{
    io::{Read, Write},
    ops::Range,
};

/// First byte of every command ack frame.
pub const ACK_MARKER: u8 = 0xFD;

/// Trailing 4 bytes of every command and ack frame.
pub const ACK_TERMINATOR: [u8; 4] = [0x04, 0x03, 0x02, 0x01];

/// Ack status reported for a successful command.
pub const ACK_STATUS_OK: [u8; 2] = [0x00, 0x00];

/// Enable configuration mode (command word 0x00FF, value 0x0001).
pub const ENTER_CONFIG: [u8; 14] = [
    0xFD, 0xFC, 0xFB, 0xFA, 0x04, 0x00, 0xFF, 0x00, 0x01, 0x00, 0x04, 0x03, 0x02, 0x01,
];

/// End configuration mode (command word 0x00FE).
pub const EXIT_CONFIG: [u8; 12] = [
    0xFD, 0xFC, 0xFB, 0xFA, 0x02, 0x00, 0xFE, 0x00, 0x04, 0x03, 0x02, 0x01,
];

/// Commands understood by the sensor on the configuration channel.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Switch the sensor into configuration mode
    EnterConfig,
    /// Return the sensor to target reporting
    ExitConfig,
}

impl Command {
    /// Fixed request frame for this command.
    pub fn frame(&self) -> &'static [u8] {
        match self {
            Command::EnterConfig => &ENTER_CONFIG,
            Command::ExitConfig => &EXIT_CONFIG,
        }
    }

    /// Length of the ack block following the 0xFD marker.
    pub fn ack_len(&self) -> usize {
        match self {
            Command::EnterConfig => 17,
            Command::ExitConfig => 13,
        }
    }

    /// Position of the status field inside the ack block.
    fn status_range(&self) -> Range<usize> {
        match self {
            Command::EnterConfig => 7..self.ack_len() - 8,
            Command::ExitConfig => 7..self.ack_len() - 4,
        }
    }
}

/// Sensor details reported in the enter-configuration ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConfigAck {
    /// Configuration protocol version
    pub protocol_version: u16,
    /// Receive buffer size of the sensor
    pub buffer_size: u16,
}

impl From<&[u8]> for ConfigAck {
    fn from(ack: &[u8]) -> Self {
        let field = |offset: usize| {
            ack.get(offset..offset + 2)
                .map(|b| u16::from_le_bytes([b[0], b[1]]))
                .unwrap_or(0)
        };

        ConfigAck {
            protocol_version: field(9),
            buffer_size: field(11),
        }
    }
}

/// Writes one command frame and validates its ack.
///
/// Returns the ack block following the 0xFD marker.
pub fn transact<P: Read + Write>(port: &mut P, command: Command) -> Result<Vec<u8>, Error> {
    trace!("{:?} request: {:02X?}", command, command.frame());
    port.write_all(command.frame())?;
    port.flush()?;

    let mut marker = [0u8; 1];
    port.read_exact(&mut marker)?;
    if marker[0] != ACK_MARKER {
        return Err(Error::AckMarker(marker[0]));
    }

    let mut ack = vec![0u8; command.ack_len()];
    port.read_exact(&mut ack)?;
    trace!("{:?} ack: {:02X?}", command, ack);

    let status = &ack[command.status_range()];
    if status != ACK_STATUS_OK {
        return Err(Error::AckStatus([status[0], status[1]]));
    }

    let end = &ack[ack.len() - ACK_TERMINATOR.len()..];
    if end != ACK_TERMINATOR {
        return Err(Error::AckTerminator([end[0], end[1], end[2], end[3]]));
    }

    Ok(ack)
}

/// Runs the enter/exit configuration exchange.
///
/// Both steps must succeed.  The exchange is not atomic: when the exit step
/// fails after a successful enter step the sensor may remain in
/// configuration mode, it is up to the caller to retry.
///
/// The port must not be read concurrently by a running decode loop.
pub fn execute<P: Read + Write>(port: &mut P) -> Result<ConfigAck, Error> {
    let ack = transact(port, Command::EnterConfig)?;
    let config = ConfigAck::from(&ack[..]);
    debug!(
        "configuration mode: protocol_version={} buffer_size={}",
        config.protocol_version, config.buffer_size
    );

    transact(port, Command::ExitConfig)?;
    debug!("configuration mode closed");

    Ok(config)
}
