// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! LD2451 Library
//!
//! This library provides a driver for the HLK-LD2451 24 GHz vehicle
//! detection radar, which streams target reports over a UART link.
//!
//! # Features
//!
//! - **Frame Decoder** - Resynchronizing decoder for the target report stream
//! - **Command Protocol** - Configuration mode exchange with ack validation
//! - **Target Stream** - Background decode thread with a bounded target queue
//!
//! # Example
//!
//! ```no_run
//! use ld2451::{Config, Ld2451};
//!
//! let mut radar = Ld2451::open(Config::new("/dev/ttyUSB0"))?;
//! loop {
//!     let target = radar.next_target()?;
//!     println!("{}", target);
//! }
//! # Ok::<(), ld2451::Error>(())
//! ```

#![warn(missing_docs)]

/// Wire constants, target records and error types
pub mod protocol;

/// Frame synchronization and target decoding
pub mod decoder;

/// Configuration command exchange
pub mod command;

/// Radar handle and target stream
pub mod radar;

/// Platform utilities
pub mod common;

pub use command::ConfigAck;
pub use decoder::DecoderStats;
pub use protocol::{Direction, Error, ProtocolVariant, Target};
pub use radar::{Config, Ld2451};
