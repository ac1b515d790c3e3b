// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use ld2451::{Config, ProtocolVariant};
use std::time::Duration;
use tracing::level_filters::LevelFilter;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// serial device connected to the radar
    #[arg(short, long, env, default_value = "/dev/ttyUSB0")]
    pub device: String,

    /// serial baud rate
    #[arg(long, env, default_value = "115200")]
    pub baud_rate: u32,

    /// Number of decoded targets queued before the decoder blocks.
    #[arg(long, env, default_value = "16")]
    pub buffer_size: usize,

    /// Serial read timeout in milliseconds, the radar reports continuously
    /// so a timeout is treated as a lost link.
    #[arg(long, env, default_value = "2000")]
    pub timeout_ms: u64,

    /// Payload layout of the target report frames.
    #[arg(long, env, default_value = "target-alarm")]
    pub variant: ProtocolVariant,

    /// Run the decode thread with real-time priority.
    #[arg(long, env)]
    pub realtime: bool,

    /// Run the enter/exit configuration exchange before monitoring.
    #[arg(short, long)]
    pub configure: bool,

    /// Monitor the serial link and print targets.
    #[arg(short, long)]
    pub monitor: bool,

    /// Stop monitoring after this many targets.
    #[arg(short = 'n', long)]
    pub count: Option<usize>,

    /// Application log level
    #[arg(long, env, default_value = "info")]
    pub rust_log: LevelFilter,

    /// Enable Tracy profiler broadcast
    #[arg(long, env)]
    pub tracy: bool,
}

impl From<&Args> for Config {
    fn from(args: &Args) -> Self {
        Config {
            serial_port: args.device.clone(),
            baud_rate: args.baud_rate,
            target_buffer_size: args.buffer_size,
            read_timeout: Duration::from_millis(args.timeout_ms),
            variant: args.variant,
            realtime: args.realtime,
        }
    }
}
