// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    bridge::completion_bridge,
    buffers::BufferPool,
    controls::{ControlId, ControlList, ControlValue},
    device::{Camera, CameraManager},
    error::{CaptureError, Result},
    format::{ColorSpace, CommittedConfig, PixelFormat, StreamConfig},
    negotiate::StreamNegotiator,
    request::{format_bytes_used, CaptureRequest},
    session::{resolve_camera, DeviceSession},
    sink::{FrameSink, FrameView},
};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Parameters of one still capture.
#[derive(Clone, Debug)]
pub struct CaptureOptions {
    /// Camera to use, the first available one when unset.
    pub camera: Option<String>,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub color_space: Option<ColorSpace>,
    pub buffer_count: u32,
    /// Controls applied when the camera starts.
    pub controls: ControlList,
    /// Bound on the completion wait. Unset waits indefinitely.
    pub timeout: Option<Duration>,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            camera: None,
            width: 2028,
            height: 1520,
            pixel_format: PixelFormat::Bgr888,
            color_space: Some(ColorSpace::Rec709),
            buffer_count: 1,
            controls: default_controls(),
            timeout: None,
        }
    }
}

impl CaptureOptions {
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            width: self.width,
            height: self.height,
            pixel_format: self.pixel_format,
            color_space: self.color_space,
            stride: 0,
            buffer_count: self.buffer_count,
        }
    }
}

/// Neutral brightness and contrast, unity gain, 40ms exposure and the
/// colour gains used for daylight stills.
pub fn default_controls() -> ControlList {
    ControlList::new()
        .with(ControlId::Brightness, ControlValue::Float(0.0))
        .with(ControlId::Contrast, ControlValue::Float(1.0))
        .with(ControlId::AnalogueGain, ControlValue::Float(1.0))
        .with(ControlId::ExposureTime, ControlValue::Int(40000))
        .with(ControlId::ColourGains, ControlValue::FloatPair([1.2, 1.2]))
}

/// Summary of a successful capture.
#[derive(Clone, Debug)]
pub struct CaptureReport {
    pub camera: String,
    pub config: CommittedConfig,
    /// The camera adjusted the requested configuration.
    pub adjusted: bool,
    /// Controls dropped because the camera does not accept their value.
    pub rejected_controls: Vec<ControlId>,
    /// Bytes the camera wrote per plane.
    pub bytes_used: Vec<u32>,
    /// Bytes written by the frame sink.
    pub written: u64,
    pub elapsed: Duration,
}

/// Captures one frame from a camera of `manager` and hands it to `sink`.
///
/// Whatever was acquired is torn down in reverse order before returning,
/// on success and on every error path: the camera is stopped, buffers are
/// unmapped and freed, and the camera is released.
pub fn capture_still<M, S>(manager: &M, options: &CaptureOptions, sink: &S) -> Result<CaptureReport>
where
    M: CameraManager,
    S: FrameSink + ?Sized,
{
    let start = Instant::now();
    let id = resolve_camera(manager, options.camera.as_deref())?;
    let mut session = DeviceSession::acquire(manager, &id)?;

    let result = capture_on(session.camera_mut(), options, sink);
    let released = session.release();

    let mut report = result?;
    released?;
    report.elapsed = start.elapsed();
    info!("capture finished in {:?}", report.elapsed);
    Ok(report)
}

/// Runs the capture on an already acquired camera. The camera is left
/// stopped with no buffers; releasing it is up to the caller.
pub fn capture_on<C, S>(camera: &mut C, options: &CaptureOptions, sink: &S) -> Result<CaptureReport>
where
    C: Camera,
    S: FrameSink + ?Sized,
{
    let negotiator = StreamNegotiator::new(sink.required_format());
    let negotiated = negotiator.propose(&*camera, &options.stream_config())?;
    let adjusted = negotiated.adjusted();
    let config = negotiator.commit(camera, negotiated)?;

    let mut pool = BufferPool::allocate(camera, &config)?;
    let mut started = false;
    let result = pool
        .map_all(&*camera)
        .and_then(|()| expose(camera, &pool, &config, options, sink, &mut started));

    let mut teardown = Ok(());
    if started {
        keep_first(&mut teardown, camera.stop());
    }
    keep_first(&mut teardown, pool.unmap_all(&*camera));
    keep_first(&mut teardown, pool.free(camera));

    let exposure = result?;
    teardown?;
    Ok(CaptureReport {
        camera: camera.id().to_string(),
        config,
        adjusted,
        rejected_controls: exposure.rejected_controls,
        bytes_used: exposure.bytes_used,
        written: exposure.written,
        elapsed: Duration::ZERO,
    })
}

fn keep_first(acc: &mut Result<()>, step: Result<()>) {
    if let Err(e) = step {
        warn!("teardown: {}", e);
        if acc.is_ok() {
            *acc = Err(e);
        }
    }
}

struct Exposure {
    rejected_controls: Vec<ControlId>,
    bytes_used: Vec<u32>,
    written: u64,
}

fn expose<C, S>(
    camera: &mut C,
    pool: &BufferPool,
    config: &CommittedConfig,
    options: &CaptureOptions,
    sink: &S,
    started: &mut bool,
) -> Result<Exposure>
where
    C: Camera,
    S: FrameSink + ?Sized,
{
    let buffer = pool
        .buffers()
        .first()
        .map(|b| b.id)
        .ok_or_else(|| {
            CaptureError::RequestConstructionFailed("no buffers allocated".to_string())
        })?;

    let mut request = CaptureRequest::create(camera, buffer as u64)?;
    request.bind_buffer(camera, buffer)?;

    let mut controls = options.controls.clone();
    let rejected = controls.retain_supported(&camera.control_ranges());
    for (id, value) in &rejected {
        warn!("camera {} does not accept {}={}, dropping it", camera.id(), id, value);
    }
    request.attach_controls(controls)?;

    let (notifier, gate) = completion_bridge();
    camera.on_request_completed(notifier);

    // Controls go to the start call once and are not carried by the request.
    let mut start_controls = request.take_controls();
    camera.start(Some(&start_controls))?;
    *started = true;
    start_controls.clear();

    request.queue(camera)?;
    let done = gate.wait_for(options.timeout)?;

    let finished = match request.complete(done) {
        Ok(finished) => finished,
        Err(e) => {
            error!("Camera returned without data: {}", e);
            return Err(e);
        }
    };
    info!("buffer size[s]: {}", format_bytes_used(&finished.bytes_used()));

    let span = pool
        .spans(buffer)
        .and_then(|spans| spans.first())
        .ok_or_else(|| CaptureError::Device(format!("buffer {buffer} is not mapped")))?;
    let frame = FrameView::new(
        span.as_slice(),
        config.width(),
        config.height(),
        config.stride(),
        config.pixel_format(),
    )?;
    let written = sink.write(&frame)?;
    let bytes_used = request.retire(finished);

    Ok(Exposure {
        rejected_controls: rejected.into_iter().map(|(id, _)| id).collect(),
        bytes_used,
        written,
    })
}
