// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use edgefirst_still::{
    buffers::BufferPool,
    capture::{capture_on, capture_still, CaptureOptions},
    controls::{ControlId, ControlValue},
    device::CameraManager,
    error::CaptureError,
    format::{ColorSpace, PixelFormat, StreamConfig},
    negotiate::StreamNegotiator,
    sink::{OutputTarget, PngSink},
    virt::{
        Backing, CompletionMode, PlaneLayout, VirtualCameraManager, VirtualSensor, VirtualStats,
        PATTERN_BLUE,
    },
};
use serial_test::serial;
use std::{error::Error, path::Path, time::Duration};

fn options(width: u32, height: u32) -> CaptureOptions {
    CaptureOptions {
        width,
        height,
        ..Default::default()
    }
}

fn assert_torn_down(stats: &VirtualStats) {
    assert_eq!(stats.open_mappings(), 0, "mappings left open");
    assert_eq!(stats.allocated_buffers(), 0, "buffers left allocated");
    assert_eq!(stats.acquired(), 0, "camera left acquired");
    assert!(!stats.running(), "camera left running");
}

fn check_pattern(path: &Path, width: u32, height: u32) -> Result<(), Box<dyn Error>> {
    assert_eq!(image::image_dimensions(path)?, (width, height));
    let img = image::open(path)?.to_rgb8();
    for (x, y, px) in img.enumerate_pixels() {
        assert_eq!(px.0, [x as u8, y as u8, PATTERN_BLUE], "pixel {x},{y}");
    }
    Ok(())
}

#[test]
#[serial]
fn test_capture_png() -> Result<(), Box<dyn Error>> {
    let mgr = VirtualCameraManager::single(VirtualSensor::default());
    let stats = mgr.stats("virtual0").ok_or("no stats")?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("test.png");
    let sink = PngSink::new(OutputTarget::File(path.clone()));

    let report = capture_still(&mgr, &options(64, 48), &sink)?;
    println!("{:?}", report);

    assert_eq!(report.camera, "virtual0");
    assert!(!report.adjusted);
    assert!(report.rejected_controls.is_empty());
    assert_eq!(report.config.stride(), 192);
    assert_eq!(report.config.color_space(), Some(ColorSpace::Rec709));
    assert_eq!(report.bytes_used, vec![192 * 48]);
    assert_eq!(report.written, std::fs::metadata(&path)?.len());
    check_pattern(&path, 64, 48)?;

    assert_eq!(stats.starts(), 1);
    assert_eq!(stats.queued(), 1);
    assert_eq!(stats.map_calls(), 1);
    assert_torn_down(&stats);
    Ok(())
}

#[test]
#[serial]
fn test_capture_padded_stride() -> Result<(), Box<dyn Error>> {
    let mgr = VirtualCameraManager::single(VirtualSensor::default().with_stride_align(256));
    let stats = mgr.stats("virtual0").ok_or("no stats")?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("padded.png");
    let sink = PngSink::new(OutputTarget::File(path.clone()));

    let report = capture_still(&mgr, &options(64, 48), &sink)?;
    assert_eq!(report.config.stride(), 256);
    check_pattern(&path, 64, 48)?;
    assert_torn_down(&stats);
    Ok(())
}

#[test]
#[serial]
fn test_capture_adjusted_size() -> Result<(), Box<dyn Error>> {
    let mgr = VirtualCameraManager::single(VirtualSensor::default().with_max_size(96, 64));
    let stats = mgr.stats("virtual0").ok_or("no stats")?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("adjusted.png");
    let sink = PngSink::new(OutputTarget::File(path.clone()));

    let report = capture_still(&mgr, &CaptureOptions::default(), &sink)?;
    assert!(report.adjusted);
    assert_eq!((report.config.width(), report.config.height()), (96, 64));
    check_pattern(&path, 96, 64)?;
    assert_torn_down(&stats);
    Ok(())
}

#[test]
#[serial]
fn test_cancelled_request() -> Result<(), Box<dyn Error>> {
    let sensor = VirtualSensor::default().with_completion(CompletionMode::Cancel);
    let mgr = VirtualCameraManager::single(sensor);
    let stats = mgr.stats("virtual0").ok_or("no stats")?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("cancelled.png");
    let sink = PngSink::new(OutputTarget::File(path.clone()));

    let err = capture_still(&mgr, &options(64, 48), &sink).unwrap_err();
    assert!(matches!(err, CaptureError::RequestFailed { .. }), "{err}");
    assert!(!path.exists());
    assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
    assert_torn_down(&stats);
    Ok(())
}

#[test]
#[serial]
fn test_timeout() -> Result<(), Box<dyn Error>> {
    let sensor = VirtualSensor::default().with_completion(CompletionMode::Never);
    let mgr = VirtualCameraManager::single(sensor);
    let stats = mgr.stats("virtual0").ok_or("no stats")?;
    let dir = tempfile::tempdir()?;
    let sink = PngSink::new(OutputTarget::File(dir.path().join("never.png")));

    let mut opts = options(64, 48);
    opts.timeout = Some(Duration::from_millis(200));
    let err = capture_still(&mgr, &opts, &sink).unwrap_err();
    assert!(matches!(err, CaptureError::TimedOut(_)), "{err}");
    assert_torn_down(&stats);
    Ok(())
}

#[test]
#[serial]
fn test_allocation_failure() -> Result<(), Box<dyn Error>> {
    let mgr = VirtualCameraManager::single(VirtualSensor::default().with_failing_allocation());
    let stats = mgr.stats("virtual0").ok_or("no stats")?;
    let dir = tempfile::tempdir()?;
    let sink = PngSink::new(OutputTarget::File(dir.path().join("alloc.png")));

    let err = capture_still(&mgr, &options(64, 48), &sink).unwrap_err();
    assert!(matches!(err, CaptureError::AllocationFailed(_)), "{err}");
    assert_eq!(stats.map_calls(), 0);
    assert_eq!(stats.starts(), 0);
    assert_torn_down(&stats);
    Ok(())
}

#[test]
#[serial]
fn test_encode_failure_tears_down() -> Result<(), Box<dyn Error>> {
    let mgr = VirtualCameraManager::single(VirtualSensor::default());
    let stats = mgr.stats("virtual0").ok_or("no stats")?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("missing").join("test.png");
    let sink = PngSink::new(OutputTarget::File(path.clone()));

    let err = capture_still(&mgr, &options(64, 48), &sink).unwrap_err();
    assert!(matches!(err, CaptureError::EncodeFailed(_)), "{err}");
    assert!(!path.exists());
    assert_torn_down(&stats);
    Ok(())
}

#[test]
fn test_incompatible_format() -> Result<(), Box<dyn Error>> {
    let mgr = VirtualCameraManager::single(VirtualSensor::default());
    let stats = mgr.stats("virtual0").ok_or("no stats")?;
    let dir = tempfile::tempdir()?;
    let sink = PngSink::new(OutputTarget::File(dir.path().join("rgb.png")));

    let mut opts = options(64, 48);
    opts.pixel_format = PixelFormat::Rgb888;
    let err = capture_still(&mgr, &opts, &sink).unwrap_err();
    assert!(matches!(err, CaptureError::InvalidConfiguration(_)), "{err}");
    assert_eq!(err.exit_code(), 4);
    assert_eq!(stats.map_calls(), 0);
    assert_torn_down(&stats);
    Ok(())
}

#[test]
fn test_device_busy() -> Result<(), Box<dyn Error>> {
    let mgr = VirtualCameraManager::single(VirtualSensor::default());
    let stats = mgr.stats("virtual0").ok_or("no stats")?;
    let dir = tempfile::tempdir()?;
    let sink = PngSink::new(OutputTarget::File(dir.path().join("busy.png")));

    let held = mgr.acquire("virtual0")?;
    let err = capture_still(&mgr, &options(64, 48), &sink).unwrap_err();
    assert!(matches!(err, CaptureError::DeviceBusy(_)), "{err}");
    assert_eq!(stats.acquired(), 1);
    assert_eq!(stats.map_calls(), 0);

    drop(held);
    assert_torn_down(&stats);
    Ok(())
}

#[test]
fn test_device_not_found() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let sink = PngSink::new(OutputTarget::File(dir.path().join("none.png")));

    let mgr = VirtualCameraManager::single(VirtualSensor::default());
    let mut opts = options(64, 48);
    opts.camera = Some("imx219".to_string());
    let err = capture_still(&mgr, &opts, &sink).unwrap_err();
    assert!(matches!(err, CaptureError::DeviceNotFound(_)), "{err}");

    let empty = VirtualCameraManager::new(Vec::new());
    let err = capture_still(&empty, &options(64, 48), &sink).unwrap_err();
    assert!(matches!(err, CaptureError::DeviceNotFound(_)), "{err}");
    Ok(())
}

#[test]
#[serial]
fn test_unsupported_control_dropped() -> Result<(), Box<dyn Error>> {
    let mgr = VirtualCameraManager::single(VirtualSensor::default());
    let stats = mgr.stats("virtual0").ok_or("no stats")?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("controls.png");
    let sink = PngSink::new(OutputTarget::File(path.clone()));

    let mut opts = options(64, 48);
    opts.controls.set(ControlId::ExposureTime, ControlValue::Int(5_000_000));
    let report = capture_still(&mgr, &opts, &sink)?;
    assert_eq!(report.rejected_controls, vec![ControlId::ExposureTime]);
    check_pattern(&path, 64, 48)?;
    assert_torn_down(&stats);
    Ok(())
}

#[test]
#[serial]
fn test_controls_applied_at_start() -> Result<(), Box<dyn Error>> {
    let mgr = VirtualCameraManager::single(VirtualSensor::default());
    let stats = mgr.stats("virtual0").ok_or("no stats")?;
    let dir = tempfile::tempdir()?;
    let sink = PngSink::new(OutputTarget::File(dir.path().join("start.png")));

    let mut camera = mgr.acquire("virtual0")?;
    let report = capture_on(&mut camera, &options(64, 48), &sink)?;
    assert!(report.rejected_controls.is_empty());

    let applied = camera.applied_controls();
    assert_eq!(applied.get(ControlId::ExposureTime), Some(ControlValue::Int(40000)));
    assert_eq!(applied.get(ControlId::AnalogueGain), Some(ControlValue::Float(1.0)));
    assert_eq!(applied.get(ControlId::Brightness), Some(ControlValue::Float(0.0)));
    assert_eq!(applied.get(ControlId::Contrast), Some(ControlValue::Float(1.0)));
    assert_eq!(
        applied.get(ControlId::ColourGains),
        Some(ControlValue::FloatPair([1.2, 1.2]))
    );
    assert_eq!(stats.starts(), 1);

    drop(camera);
    assert_torn_down(&stats);
    Ok(())
}

#[test]
#[serial]
fn test_shared_region_mapped_once() -> Result<(), Box<dyn Error>> {
    let sensor = VirtualSensor::default().with_layout(PlaneLayout::SharedRegion(3));
    let mgr = VirtualCameraManager::single(sensor);
    let stats = mgr.stats("virtual0").ok_or("no stats")?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("shared.png");
    let sink = PngSink::new(OutputTarget::File(path.clone()));

    let report = capture_still(&mgr, &options(64, 48), &sink)?;
    assert_eq!(report.bytes_used.len(), 3);
    assert_eq!(report.bytes_used.iter().sum::<u32>(), 192 * 48);
    assert_eq!(stats.map_calls(), 1);
    check_pattern(&path, 64, 48)?;
    assert_torn_down(&stats);
    Ok(())
}

#[test]
fn test_distinct_regions_mapped_separately() -> Result<(), Box<dyn Error>> {
    let sensor = VirtualSensor::default().with_layout(PlaneLayout::DistinctRegions(3));
    let mgr = VirtualCameraManager::single(sensor);
    let stats = mgr.stats("virtual0").ok_or("no stats")?;
    let mut cam = mgr.acquire("virtual0")?;

    let negotiator = StreamNegotiator::new(PixelFormat::Bgr888);
    let negotiated = negotiator.propose(&cam, &StreamConfig::new(64, 48, PixelFormat::Bgr888))?;
    let config = negotiator.commit(&mut cam, negotiated)?;
    let mut pool = BufferPool::allocate(&mut cam, &config)?;
    pool.map_all(&cam)?;

    assert_eq!(stats.map_calls(), 3);
    assert_eq!(stats.open_mappings(), 3);
    let spans = pool.spans(0).ok_or("buffer 0 not mapped")?;
    assert_eq!(spans.len(), 3);
    assert_eq!(spans.iter().map(|s| s.len()).sum::<usize>(), 192 * 48);

    pool.unmap_all(&cam)?;
    pool.free(&mut cam)?;
    assert_eq!(stats.open_mappings(), 0);
    assert_eq!(stats.allocated_buffers(), 0);
    Ok(())
}

#[test]
#[ignore = "requires a DMA heap"]
#[serial]
fn test_capture_dma_heap() -> Result<(), Box<dyn Error>> {
    let mgr = VirtualCameraManager::single(VirtualSensor::default().with_backing(Backing::CmaHeap));
    let stats = mgr.stats("virtual0").ok_or("no stats")?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("heap.png");
    let sink = PngSink::new(OutputTarget::File(path.clone()));

    capture_still(&mgr, &options(640, 480), &sink)?;
    check_pattern(&path, 640, 480)?;
    assert_torn_down(&stats);
    Ok(())
}

#[cfg(feature = "libcamera")]
#[test]
#[ignore = "requires a camera"]
#[serial]
fn test_capture_libcamera() -> Result<(), Box<dyn Error>> {
    let mgr = edgefirst_still::libcamera::LibcameraManager::new()?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("libcamera.png");
    let sink = PngSink::new(OutputTarget::File(path.clone()));

    let report = capture_still(&mgr, &CaptureOptions::default(), &sink)?;
    println!("{:?}", report);
    assert!(report.bytes_used.iter().any(|&n| n > 0));
    assert_eq!(report.config.color_space(), None);
    let (width, height) = image::image_dimensions(&path)?;
    assert_eq!((width, height), (report.config.width(), report.config.height()));
    Ok(())
}
