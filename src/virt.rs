// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Synthetic camera backend.
//!
//! A [`VirtualCameraManager`] exposes sensors that behave like a libcamera
//! device from the pipeline's point of view: configurations are validated
//! and adjusted, buffers are real shared-memory regions (memfd or a DMA
//! heap) that the pipeline maps, and completions arrive on a separate
//! thread after the exposure time elapses. Counters in [`VirtualStats`]
//! record acquisitions, live mappings and allocated buffers so teardown can
//! be verified without hardware.

use crate::{
    bridge::Notifier,
    buffers::MappedSpan,
    controls::{ControlId, ControlList, ControlRange, ControlRanges, ControlValue},
    device::{
        BufferId, Camera, CameraManager, CompletedRequest, ConfigStatus, HardwareBuffer, Plane,
        RequestStatus,
    },
    error::{CaptureError, Result},
    format::{ColorSpace, PixelFormat, StreamConfig},
};
use dma_heap::{Heap, HeapKind};
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet},
    ffi::CStr,
    fs::File,
    io,
    os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use tracing::{debug, warn};

/// Byte written into row padding so readers that ignore the stride show up
/// in the output.
pub const PADDING_BYTE: u8 = 0xEE;

/// Blue channel value of every pattern pixel.
pub const PATTERN_BLUE: u8 = 0x80;

/// Memory the synthetic sensor allocates its buffers from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backing {
    Memfd,
    CmaHeap,
    SystemHeap,
}

/// How each buffer is split into planes and backing regions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaneLayout {
    /// One plane in one region.
    Single,
    /// `n` planes packed into one region.
    SharedRegion(usize),
    /// `n` planes, each in its own region.
    DistinctRegions(usize),
}

/// What the sensor does with a queued request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionMode {
    /// Fill the buffer and complete it.
    Complete,
    /// Complete the request as cancelled without data.
    Cancel,
    /// Never complete the request.
    Never,
}

/// Description of one synthetic sensor.
#[derive(Clone, Debug)]
pub struct VirtualSensor {
    pub id: String,
    pub max_width: u32,
    pub max_height: u32,
    pub formats: Vec<PixelFormat>,
    pub color_spaces: Vec<ColorSpace>,
    /// Row strides are rounded up to a multiple of this many bytes.
    pub stride_align: u32,
    pub layout: PlaneLayout,
    pub backing: Backing,
    pub completion: CompletionMode,
    pub fail_allocation: bool,
    /// Fixed readout delay; the exposure time control is used when unset.
    pub readout: Option<Duration>,
    pub controls: ControlRanges,
}

impl Default for VirtualSensor {
    fn default() -> Self {
        Self::new("virtual0")
    }
}

impl VirtualSensor {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            max_width: 4056,
            max_height: 3040,
            formats: vec![
                PixelFormat::Yuv420,
                PixelFormat::Bgr888,
                PixelFormat::Rgb888,
                PixelFormat::Xrgb8888,
                PixelFormat::Nv12,
            ],
            color_spaces: vec![ColorSpace::Sycc, ColorSpace::Rec709, ColorSpace::Srgb],
            stride_align: 64,
            layout: PlaneLayout::Single,
            backing: Backing::Memfd,
            completion: CompletionMode::Complete,
            fail_allocation: false,
            readout: None,
            controls: ControlRanges::from([
                (ControlId::ExposureTime, ControlRange::new(100.0, 1_000_000.0)),
                (ControlId::AnalogueGain, ControlRange::new(1.0, 22.26)),
                (ControlId::Brightness, ControlRange::new(-1.0, 1.0)),
                (ControlId::Contrast, ControlRange::new(0.0, 32.0)),
                (ControlId::ColourGains, ControlRange::new(0.0, 32.0)),
            ]),
        }
    }

    pub fn with_max_size(mut self, width: u32, height: u32) -> Self {
        self.max_width = width;
        self.max_height = height;
        self
    }

    pub fn with_formats(mut self, formats: &[PixelFormat]) -> Self {
        self.formats = formats.to_vec();
        self
    }

    pub fn with_stride_align(mut self, align: u32) -> Self {
        self.stride_align = align.max(1);
        self
    }

    pub fn with_layout(mut self, layout: PlaneLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_backing(mut self, backing: Backing) -> Self {
        self.backing = backing;
        self
    }

    pub fn with_completion(mut self, completion: CompletionMode) -> Self {
        self.completion = completion;
        self
    }

    pub fn with_failing_allocation(mut self) -> Self {
        self.fail_allocation = true;
        self
    }

    pub fn with_readout(mut self, readout: Duration) -> Self {
        self.readout = Some(readout);
        self
    }

    fn stride(&self, format: PixelFormat, width: u32) -> u32 {
        format.min_stride(width).div_ceil(self.stride_align) * self.stride_align
    }
}

/// Resource counters of one synthetic sensor.
#[derive(Debug, Default)]
pub struct VirtualStats {
    acquired: AtomicUsize,
    open_mappings: AtomicUsize,
    map_calls: AtomicUsize,
    allocated_buffers: AtomicUsize,
    running: AtomicBool,
    starts: AtomicUsize,
    queued: AtomicUsize,
}

impl VirtualStats {
    /// Sessions currently holding the sensor.
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    /// Spans mapped through the sensor and not yet unmapped.
    pub fn open_mappings(&self) -> usize {
        self.open_mappings.load(Ordering::SeqCst)
    }

    /// Total map requests since the sensor was created.
    pub fn map_calls(&self) -> usize {
        self.map_calls.load(Ordering::SeqCst)
    }

    pub fn allocated_buffers(&self) -> usize {
        self.allocated_buffers.load(Ordering::SeqCst)
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }
}

/// Camera manager over a fixed set of synthetic sensors.
pub struct VirtualCameraManager {
    sensors: Vec<VirtualSensor>,
    stats: HashMap<String, Arc<VirtualStats>>,
    claims: Arc<Mutex<HashSet<String>>>,
}

impl VirtualCameraManager {
    pub fn new(sensors: Vec<VirtualSensor>) -> Self {
        let stats = sensors
            .iter()
            .map(|s| (s.id.clone(), Arc::new(VirtualStats::default())))
            .collect();
        Self {
            sensors,
            stats,
            claims: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn single(sensor: VirtualSensor) -> Self {
        Self::new(vec![sensor])
    }

    pub fn stats(&self, id: &str) -> Option<Arc<VirtualStats>> {
        self.stats.get(id).cloned()
    }
}

impl CameraManager for VirtualCameraManager {
    type Camera<'a> = VirtualCamera;

    fn cameras(&self) -> Vec<String> {
        self.sensors.iter().map(|s| s.id.clone()).collect()
    }

    fn acquire(&self, id: &str) -> Result<VirtualCamera> {
        let sensor = self
            .sensors
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| CaptureError::DeviceNotFound(id.to_string()))?;
        let stats = self
            .stats(id)
            .ok_or_else(|| CaptureError::DeviceNotFound(id.to_string()))?;
        if !self.claims.lock().insert(id.to_string()) {
            return Err(CaptureError::DeviceBusy(id.to_string()));
        }
        stats.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(VirtualCamera {
            sensor: sensor.clone(),
            stats,
            claims: self.claims.clone(),
            config: None,
            buffers: Vec::new(),
            notifier: None,
            controls: ControlList::new(),
            running: false,
            released: false,
            inflight: Vec::new(),
        })
    }
}

struct VirtualBuffer {
    regions: Vec<OwnedFd>,
    planes: Vec<Plane>,
}

impl VirtualBuffer {
    fn region(&self, fd: RawFd) -> io::Result<File> {
        let owned = self
            .regions
            .iter()
            .find(|r| r.as_raw_fd() == fd)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "unknown region"))?;
        Ok(File::from(owned.try_clone()?))
    }
}

/// Request handle of the synthetic sensor.
#[derive(Debug)]
pub struct VirtualRequest {
    cookie: u64,
    buffer: Option<BufferId>,
}

/// A request returned by the synthetic sensor.
#[derive(Clone, Debug)]
pub struct VirtualCompletion {
    cookie: u64,
    status: RequestStatus,
    bytes_used: Vec<u32>,
}

impl CompletedRequest for VirtualCompletion {
    fn cookie(&self) -> u64 {
        self.cookie
    }

    fn status(&self) -> RequestStatus {
        self.status
    }

    fn bytes_used(&self) -> Vec<u32> {
        self.bytes_used.clone()
    }
}

/// An acquired synthetic sensor.
pub struct VirtualCamera {
    sensor: VirtualSensor,
    stats: Arc<VirtualStats>,
    claims: Arc<Mutex<HashSet<String>>>,
    config: Option<StreamConfig>,
    buffers: Vec<VirtualBuffer>,
    notifier: Option<Notifier<VirtualCompletion>>,
    controls: ControlList,
    running: bool,
    released: bool,
    inflight: Vec<JoinHandle<()>>,
}

impl VirtualCamera {
    pub fn stats(&self) -> &Arc<VirtualStats> {
        &self.stats
    }

    /// Controls applied by the last start call.
    pub fn applied_controls(&self) -> &ControlList {
        &self.controls
    }

    fn configured(&self) -> Result<&StreamConfig> {
        self.config
            .as_ref()
            .ok_or_else(|| {
                CaptureError::Device(format!("camera {} is not configured", self.sensor.id))
            })
    }

    fn region(&self, len: usize) -> Result<OwnedFd> {
        let alloc_err = |e: String| CaptureError::AllocationFailed(format!("{len} bytes: {e}"));
        match self.sensor.backing {
            Backing::Memfd => memfd(c"edgefirst-still", len).map_err(|e| alloc_err(e.to_string())),
            Backing::CmaHeap | Backing::SystemHeap => {
                let kind = match self.sensor.backing {
                    Backing::CmaHeap => HeapKind::Cma,
                    _ => HeapKind::System,
                };
                let heap = Heap::new(kind).map_err(|e| alloc_err(e.to_string()))?;
                heap.allocate(len).map_err(|e| alloc_err(e.to_string()))
            }
        }
    }

    fn allocate_buffer(
        &self,
        id: BufferId,
        frame_size: usize,
    ) -> Result<(VirtualBuffer, HardwareBuffer)> {
        let split = |n: usize| -> Vec<usize> {
            let n = n.max(1);
            let base = frame_size / n;
            (0..n)
                .map(|i| if i + 1 == n { frame_size - base * (n - 1) } else { base })
                .collect()
        };
        let mut regions = Vec::new();
        let mut planes = Vec::new();
        match self.sensor.layout {
            PlaneLayout::Single => {
                let fd = self.region(frame_size)?;
                planes.push(Plane::new(fd.as_raw_fd(), 0, frame_size));
                regions.push(fd);
            }
            PlaneLayout::SharedRegion(n) => {
                let fd = self.region(frame_size)?;
                let mut offset = 0;
                for length in split(n) {
                    planes.push(Plane::new(fd.as_raw_fd(), offset, length));
                    offset += length;
                }
                regions.push(fd);
            }
            PlaneLayout::DistinctRegions(n) => {
                for length in split(n) {
                    let fd = self.region(length)?;
                    planes.push(Plane::new(fd.as_raw_fd(), 0, length));
                    regions.push(fd);
                }
            }
        }
        let descriptor = HardwareBuffer {
            id,
            planes: planes.clone(),
        };
        Ok((VirtualBuffer { regions, planes }, descriptor))
    }

    fn readout(&self) -> Duration {
        if let Some(readout) = self.sensor.readout {
            return readout;
        }
        match self.controls.get(ControlId::ExposureTime) {
            Some(ControlValue::Int(us)) if us > 0 => Duration::from_micros(us as u64),
            _ => Duration::from_millis(10),
        }
    }

    fn join_inflight(&mut self) {
        for handle in self.inflight.drain(..) {
            if handle.join().is_err() {
                warn!("sensor readout thread panicked");
            }
        }
    }
}

impl Camera for VirtualCamera {
    type Request = VirtualRequest;
    type Completed = VirtualCompletion;

    fn id(&self) -> &str {
        &self.sensor.id
    }

    fn generate_configuration(&self) -> Result<StreamConfig> {
        let format = *self
            .sensor
            .formats
            .first()
            .ok_or_else(|| {
                CaptureError::InvalidConfiguration("sensor has no formats".to_string())
            })?;
        let mut config = StreamConfig::new(self.sensor.max_width, self.sensor.max_height, format);
        config.color_space = self.sensor.color_spaces.first().copied();
        config.stride = self.sensor.stride(format, config.width);
        Ok(config)
    }

    fn validate(&self, config: &mut StreamConfig) -> ConfigStatus {
        if config.width == 0 || config.height == 0 {
            return ConfigStatus::Invalid;
        }
        let Some(&default_format) = self.sensor.formats.first() else {
            return ConfigStatus::Invalid;
        };
        let mut status = ConfigStatus::Valid;

        let width = (config.width.min(self.sensor.max_width) & !1).max(2);
        let height = (config.height.min(self.sensor.max_height) & !1).max(2);
        if (width, height) != (config.width, config.height) {
            config.width = width;
            config.height = height;
            status = ConfigStatus::Adjusted;
        }

        if !self.sensor.formats.contains(&config.pixel_format) {
            config.pixel_format = default_format;
            status = ConfigStatus::Adjusted;
        }

        match config.color_space {
            Some(cs) if !self.sensor.color_spaces.contains(&cs) => {
                config.color_space = self.sensor.color_spaces.first().copied();
                status = ConfigStatus::Adjusted;
            }
            None => config.color_space = self.sensor.color_spaces.first().copied(),
            Some(_) => {}
        }

        if config.buffer_count == 0 {
            config.buffer_count = 1;
            status = ConfigStatus::Adjusted;
        }

        config.stride = self.sensor.stride(config.pixel_format, config.width);
        status
    }

    fn configure(&mut self, config: &StreamConfig) -> Result<()> {
        if self.running {
            return Err(CaptureError::Device(format!("camera {} is running", self.sensor.id)));
        }
        let mut check = config.clone();
        if self.validate(&mut check) != ConfigStatus::Valid || check != *config {
            return Err(CaptureError::InvalidConfiguration(format!(
                "camera {} cannot run {}",
                self.sensor.id, config
            )));
        }
        self.config = Some(config.clone());
        Ok(())
    }

    fn control_ranges(&self) -> ControlRanges {
        self.sensor.controls.clone()
    }

    fn allocate(&mut self) -> Result<Vec<HardwareBuffer>> {
        let config = self.configured()?.clone();
        if self.sensor.fail_allocation {
            return Err(CaptureError::AllocationFailed(format!(
                "camera {} has no buffer memory",
                self.sensor.id
            )));
        }
        if !self.buffers.is_empty() {
            return Err(CaptureError::AllocationFailed("buffers already allocated".to_string()));
        }
        let mut buffers = Vec::new();
        let mut descriptors = Vec::new();
        for id in 0..config.buffer_count as usize {
            let (buffer, descriptor) = self.allocate_buffer(id, config.frame_size())?;
            buffers.push(buffer);
            descriptors.push(descriptor);
        }
        self.buffers = buffers;
        self.stats
            .allocated_buffers
            .fetch_add(self.buffers.len(), Ordering::SeqCst);
        Ok(descriptors)
    }

    fn free(&mut self) -> Result<()> {
        if self.running {
            return Err(CaptureError::Device(format!(
                "camera {} must be stopped before freeing buffers",
                self.sensor.id
            )));
        }
        self.stats
            .allocated_buffers
            .fetch_sub(self.buffers.len(), Ordering::SeqCst);
        self.buffers.clear();
        Ok(())
    }

    fn create_request(&mut self, cookie: u64) -> Result<VirtualRequest> {
        self.configured()
            .map_err(|e| CaptureError::RequestConstructionFailed(e.to_string()))?;
        Ok(VirtualRequest { cookie, buffer: None })
    }

    fn attach_buffer(&mut self, request: &mut VirtualRequest, buffer: BufferId) -> Result<()> {
        if let Some(bound) = request.buffer {
            return Err(CaptureError::RequestConstructionFailed(format!(
                "request {} already holds buffer {}",
                request.cookie, bound
            )));
        }
        if buffer >= self.buffers.len() {
            return Err(CaptureError::RequestConstructionFailed(format!(
                "no buffer {buffer} allocated"
            )));
        }
        request.buffer = Some(buffer);
        Ok(())
    }

    fn on_request_completed(&mut self, notifier: Notifier<VirtualCompletion>) {
        self.notifier = Some(notifier);
    }

    fn start(&mut self, controls: Option<&ControlList>) -> Result<()> {
        if self.running {
            return Err(CaptureError::Device(format!("camera {} already started", self.sensor.id)));
        }
        self.configured()?;
        self.controls = controls.cloned().unwrap_or_default();
        self.running = true;
        self.stats.running.store(true, Ordering::SeqCst);
        self.stats.starts.fetch_add(1, Ordering::SeqCst);
        debug!("camera {} started with controls [{}]", self.sensor.id, self.controls);
        Ok(())
    }

    fn queue_request(&mut self, request: VirtualRequest) -> Result<()> {
        if !self.running {
            return Err(CaptureError::Device(format!("camera {} is not running", self.sensor.id)));
        }
        let config = self.configured()?.clone();
        let buffer_id = request.buffer.ok_or_else(|| {
            CaptureError::RequestConstructionFailed(format!(
                "request {} has no buffer",
                request.cookie
            ))
        })?;
        let notifier = self
            .notifier
            .clone()
            .ok_or_else(|| CaptureError::Device("no completion handler registered".to_string()))?;
        let buffer = self
            .buffers
            .get(buffer_id)
            .ok_or_else(|| {
                CaptureError::RequestConstructionFailed(format!("no buffer {buffer_id}"))
            })?;
        let targets = buffer
            .planes
            .iter()
            .map(|plane| Ok((buffer.region(plane.region)?, *plane)))
            .collect::<io::Result<Vec<_>>>()
            .map_err(|e| CaptureError::Device(e.to_string()))?;

        let mode = self.sensor.completion;
        let readout = self.readout();
        let cookie = request.cookie;
        let handle = thread::Builder::new()
            .name(format!("{}-readout", self.sensor.id))
            .spawn(move || {
                if mode == CompletionMode::Never {
                    return;
                }
                thread::sleep(readout);
                let status = match mode {
                    CompletionMode::Complete => match write_pattern(&config, &targets) {
                        Ok(()) => RequestStatus::Complete,
                        Err(e) => {
                            warn!("sensor readout failed: {}", e);
                            RequestStatus::Cancelled
                        }
                    },
                    _ => RequestStatus::Cancelled,
                };
                let bytes_used = targets
                    .iter()
                    .map(|(_, plane)| match status {
                        RequestStatus::Complete => plane.length as u32,
                        _ => 0,
                    })
                    .collect();
                notifier.notify(VirtualCompletion {
                    cookie,
                    status,
                    bytes_used,
                });
            })
            .map_err(|e| CaptureError::Device(e.to_string()))?;
        self.inflight.push(handle);
        self.stats.queued.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.join_inflight();
        if self.running {
            debug!("camera {} stopped", self.sensor.id);
        }
        self.running = false;
        self.stats.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        if self.released {
            return Err(CaptureError::Device(format!("camera {} already released", self.sensor.id)));
        }
        self.stop()?;
        self.notifier = None;
        self.released = true;
        self.claims.lock().remove(&self.sensor.id);
        self.stats.acquired.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn map_region(&self, region: RawFd, length: usize) -> Result<MappedSpan> {
        let span = MappedSpan::map(region, length)?;
        self.stats.map_calls.fetch_add(1, Ordering::SeqCst);
        self.stats.open_mappings.fetch_add(1, Ordering::SeqCst);
        Ok(span)
    }

    fn unmap_region(&self, span: MappedSpan) -> Result<()> {
        span.unmap()?;
        self.stats.open_mappings.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for VirtualCamera {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.release() {
                warn!("{}", e);
            }
        }
    }
}

fn memfd(name: &CStr, len: usize) -> io::Result<OwnedFd> {
    let fd = unsafe { libc::memfd_create(name.as_ptr(), libc::MFD_CLOEXEC) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };
    if unsafe { libc::ftruncate(fd.as_raw_fd(), len as libc::off_t) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

/// Synthetic frame: for the 24-bit formats pixel (x, y) holds bytes
/// `[x, y, PATTERN_BLUE]`, other formats get a diagonal ramp. Row padding
/// is filled with [`PADDING_BYTE`].
pub fn test_pattern(config: &StreamConfig) -> Vec<u8> {
    let bpp = config.pixel_format.bytes_per_pixel() as usize;
    let stride = config.stride as usize;
    let mut frame = vec![PADDING_BYTE; config.frame_size()];
    for y in 0..config.height as usize {
        for x in 0..config.width as usize {
            let offset = y * stride + x * bpp;
            let pixel = &mut frame[offset..offset + bpp];
            if bpp == 3 {
                pixel.copy_from_slice(&[x as u8, y as u8, PATTERN_BLUE]);
            } else {
                for (c, byte) in pixel.iter_mut().enumerate() {
                    *byte = (x + y + c) as u8;
                }
            }
        }
    }
    frame
}

fn write_pattern(config: &StreamConfig, targets: &[(File, Plane)]) -> Result<()> {
    let frame = test_pattern(config);
    let mut cursor = 0;
    for (file, plane) in targets {
        let end = (cursor + plane.length).min(frame.len());
        if cursor < end {
            // dmabuf fds do not support pwrite, write through a mapping
            let mut span = MappedSpan::map(file.as_raw_fd(), plane.end())?;
            span.as_mut_slice()[plane.offset..plane.offset + end - cursor]
                .copy_from_slice(&frame[cursor..end]);
            span.unmap()?;
        }
        cursor = end;
    }
    Ok(())
}
