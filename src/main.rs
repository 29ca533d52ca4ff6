// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

mod args;

use args::{Args, Backend};
use clap::Parser;
use edgefirst_still::{
    capture::capture_still,
    device::CameraManager,
    error::{CaptureError, Result},
    request::format_bytes_used,
    session::list_cameras,
    sink::PngSink,
    virt::{VirtualCameraManager, VirtualSensor},
    CaptureOptions,
};
use std::process;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{fmt, layer::SubscriberExt, Layer, Registry};

fn init_tracing(args: &Args) {
    let level = if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    let stderr = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(level);

    let journald = if args.journald {
        match tracing_journald::layer() {
            Ok(layer) => Some(layer.with_filter(level)),
            Err(e) => {
                eprintln!("journald unavailable: {e}");
                None
            }
        }
    } else {
        None
    };

    let subscriber = Registry::default().with(stderr).with(journald);
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to install tracing subscriber: {e}");
    }
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("failed to forward log records: {e}");
    }
}

fn run<M: CameraManager>(manager: &M, args: &Args) -> Result<()> {
    if args.list {
        let cameras = list_cameras(manager);
        if cameras.is_empty() {
            return Err(CaptureError::DeviceNotFound("(none available)".to_string()));
        }
        for id in cameras {
            println!("Camera: {id}");
        }
        return Ok(());
    }

    let options = CaptureOptions::from(args);
    let sink = PngSink::new(args.output.clone());
    let report = capture_still(manager, &options, &sink)?;
    info!(
        "captured {} from {} (bytes used {}) into {} in {:?}",
        report.config,
        report.camera,
        format_bytes_used(&report.bytes_used),
        sink.target(),
        report.elapsed
    );
    Ok(())
}

#[cfg(feature = "libcamera")]
fn run_libcamera(args: &Args) -> Result<()> {
    let manager = edgefirst_still::libcamera::LibcameraManager::new()?;
    run(&manager, args)
}

#[cfg(not(feature = "libcamera"))]
fn run_libcamera(_args: &Args) -> Result<()> {
    Err(CaptureError::Device(
        "built without the libcamera feature, use --backend virtual".to_string(),
    ))
}

fn main() {
    let args = Args::parse();
    init_tracing(&args);
    info!("EdgeFirst Still Capture");

    let res = match args.backend {
        Backend::Libcamera => run_libcamera(&args),
        Backend::Virtual => run(&VirtualCameraManager::single(VirtualSensor::default()), &args),
    };

    if let Err(e) = res {
        error!("{}", e);
        process::exit(e.exit_code());
    }
}
