// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

mod args;

use args::Args;
use clap::Parser;
use ld2451::{command, radar::open_port, Config, Ld2451};
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt as _, Layer as _, Registry};
use tracy_client::{frame_mark, plot};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    args.tracy.then(tracy_client::Client::start);

    let stdout_log = tracing_subscriber::fmt::layer()
        .pretty()
        .with_filter(args.rust_log);

    let journald = match tracing_journald::layer() {
        Ok(journald) => Some(journald.with_filter(args.rust_log)),
        Err(_) => None,
    };

    let tracy = match args.tracy {
        true => Some(tracing_tracy::TracyLayer::default().with_filter(args.rust_log)),
        false => None,
    };

    let subscriber = Registry::default()
        .with(stdout_log)
        .with(journald)
        .with(tracy);
    tracing::subscriber::set_global_default(subscriber)?;
    tracing_log::LogTracer::init()?;

    let config = Config::from(&args);

    // The configuration exchange runs before the decode thread is started so
    // no target frames are read from the link while waiting for the acks.
    if args.configure {
        let mut port = open_port(&config)?;
        let ack = command::execute(&mut port)?;
        println!("Protocol Version: {}", ack.protocol_version);
        println!("Buffer Size: {}", ack.buffer_size);
    }

    if args.monitor {
        monitor(config, &args)?;
    }

    Ok(())
}

fn monitor(config: Config, args: &Args) -> Result<(), ld2451::Error> {
    debug!("monitoring {}", config.serial_port);
    let mut radar = Ld2451::open(config)?;
    let mut received = 0;

    let result = loop {
        if args.count.is_some_and(|count| received >= count) {
            break Ok(());
        }

        match radar.next_target() {
            Ok(target) => {
                received += 1;
                println!("{}", target);
                args.tracy.then(|| plot!("speed", target.speed as f64));
                args.tracy.then(frame_mark);
            }
            Err(err) => {
                error!("radar error: {}", err);
                break Err(err);
            }
        }
    };

    let stats = radar.stats();
    info!(
        "frames={} empty={} targets={} resyncs={} skipped_bytes={} short_payloads={} bad_footers={} alarms={}",
        stats.frames,
        stats.empty_frames,
        stats.targets,
        stats.resyncs,
        stats.skipped_bytes,
        stats.short_payloads,
        stats.bad_footers,
        stats.alarm_frames
    );
    radar.close();

    result
}
