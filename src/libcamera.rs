// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! libcamera backend.
//!
//! Buffers come from libcamera's frame buffer allocator and are mapped by
//! the pipeline through their dmabuf planes, so the region coalescing in
//! [`crate::buffers`] applies to real hardware buffers. The colour space is
//! chosen by the pipeline handler and is not reported back, so negotiated
//! configurations carry none.

use crate::{
    bridge::Notifier,
    controls::{ControlId, ControlList, ControlRange, ControlRanges, ControlValue},
    device::{
        BufferId, Camera, CameraManager, CompletedRequest, ConfigStatus, HardwareBuffer, Plane,
        RequestStatus,
    },
    error::{CaptureError, Result},
    format::{PixelFormat, StreamConfig},
};
use libcamera::{
    camera::{ActiveCamera, CameraConfiguration, CameraConfigurationStatus},
    camera_manager::CameraManager as LcCameraManager,
    control::ControlList as LcControlList,
    control_value::ControlValue as LcValue,
    controls::{self as lc, ControlId as LcControlId},
    framebuffer::AsFrameBuffer,
    framebuffer_allocator::{FrameBuffer, FrameBufferAllocator},
    geometry::Size,
    pixel_format::PixelFormat as LcPixelFormat,
    request::{Request, RequestStatus as LcRequestStatus},
    stream::{Stream, StreamRole},
};
use tracing::{debug, warn};

/// Cameras enumerated by the libcamera camera manager.
pub struct LibcameraManager {
    inner: LcCameraManager,
}

impl LibcameraManager {
    pub fn new() -> Result<Self> {
        let inner = LcCameraManager::new()
            .map_err(|e| CaptureError::Device(format!("failed to start camera manager: {e}")))?;
        Ok(Self { inner })
    }
}

impl CameraManager for LibcameraManager {
    type Camera<'a> = LibcameraCamera<'a>;

    fn cameras(&self) -> Vec<String> {
        let cameras = self.inner.cameras();
        (0..cameras.len())
            .filter_map(|i| cameras.get(i))
            .map(|cam| cam.id().to_string())
            .collect()
    }

    fn acquire(&self, id: &str) -> Result<LibcameraCamera<'_>> {
        let cameras = self.inner.cameras();
        let cam = (0..cameras.len())
            .filter_map(|i| cameras.get(i))
            .find(|cam| cam.id() == id)
            .ok_or_else(|| CaptureError::DeviceNotFound(id.to_string()))?;
        let active = cam.acquire().map_err(|e| match e.raw_os_error() {
            Some(libc::EBUSY) => CaptureError::DeviceBusy(id.to_string()),
            _ => CaptureError::Device(format!("failed to acquire camera {id}: {e}")),
        })?;
        Ok(LibcameraCamera {
            id: id.to_string(),
            camera: Some(active),
            config: None,
            stream: None,
            allocator: None,
            buffers: Vec::new(),
        })
    }
}

/// A request handed back by libcamera.
///
/// Owns the request and its frame buffer. Status and metadata are read on
/// the consumer side.
pub struct LibcameraCompletion {
    request: Request,
    stream: Option<Stream>,
}

impl CompletedRequest for LibcameraCompletion {
    fn cookie(&self) -> u64 {
        self.request.cookie()
    }

    fn status(&self) -> RequestStatus {
        match self.request.status() {
            LcRequestStatus::Pending => RequestStatus::Pending,
            LcRequestStatus::Complete => RequestStatus::Complete,
            LcRequestStatus::Cancelled => RequestStatus::Cancelled,
        }
    }

    fn bytes_used(&self) -> Vec<u32> {
        self.stream
            .and_then(|stream| self.request.buffer::<FrameBuffer>(&stream))
            .and_then(|fb| fb.metadata())
            .map(|meta| meta.planes().into_iter().map(|p| p.bytes_used).collect())
            .unwrap_or_default()
    }
}

/// An acquired libcamera camera.
pub struct LibcameraCamera<'m> {
    id: String,
    camera: Option<ActiveCamera<'m>>,
    config: Option<CameraConfiguration>,
    stream: Option<Stream>,
    allocator: Option<FrameBufferAllocator>,
    buffers: Vec<Option<FrameBuffer>>,
}

fn lc_format(format: PixelFormat) -> LcPixelFormat {
    LcPixelFormat::new(u32::from_le_bytes(format.fourcc()), 0)
}

fn lc_control(id: ControlId) -> u32 {
    let id = match id {
        ControlId::ExposureTime => LcControlId::ExposureTime,
        ControlId::AnalogueGain => LcControlId::AnalogueGain,
        ControlId::Brightness => LcControlId::Brightness,
        ControlId::Contrast => LcControlId::Contrast,
        ControlId::ColourGains => LcControlId::ColourGains,
    };
    id.into()
}

/// Copies what libcamera settled on into `config`. Returns `false` for a
/// format the pipeline cannot read.
fn read_back(
    config: &mut StreamConfig,
    fourcc: [u8; 4],
    width: u32,
    height: u32,
    stride: u32,
    buffer_count: u32,
) -> bool {
    let Some(format) = PixelFormat::from_fourcc(fourcc) else {
        return false;
    };
    if let Some(color_space) = config.color_space.take() {
        debug!("colour space {} left to the pipeline handler", color_space);
    }
    config.width = width;
    config.height = height;
    config.pixel_format = format;
    config.stride = stride;
    config.buffer_count = buffer_count;
    true
}

fn scalar(value: &LcValue) -> Option<f32> {
    match value {
        LcValue::Int32(v) => v.first().map(|v| *v as f32),
        LcValue::Int64(v) => v.first().map(|v| *v as f32),
        LcValue::Float(v) => v.first().copied(),
        _ => None,
    }
}

impl<'m> LibcameraCamera<'m> {
    fn active(&self) -> Result<&ActiveCamera<'m>> {
        self.camera
            .as_ref()
            .ok_or_else(|| CaptureError::Device(format!("camera {} was released", self.id)))
    }

    fn active_mut(&mut self) -> Result<&mut ActiveCamera<'m>> {
        let id = &self.id;
        self.camera
            .as_mut()
            .ok_or_else(|| CaptureError::Device(format!("camera {id} was released")))
    }

    fn stream(&self) -> Result<Stream> {
        self.stream
            .ok_or_else(|| CaptureError::Device(format!("camera {} is not configured", self.id)))
    }

    /// Builds a still capture configuration carrying `config` and validates
    /// it, writing the camera's adjustments back into `config`.
    fn still_configuration(
        &self,
        config: &mut StreamConfig,
    ) -> Option<(CameraConfiguration, ConfigStatus)> {
        let mut cfgs = self
            .camera
            .as_ref()?
            .generate_configuration(&[StreamRole::StillCapture])?;
        {
            let mut cfg = cfgs.get_mut(0)?;
            cfg.set_size(Size {
                width: config.width,
                height: config.height,
            });
            cfg.set_pixel_format(lc_format(config.pixel_format));
            cfg.set_buffer_count(config.buffer_count);
        }
        let status = match cfgs.validate() {
            CameraConfigurationStatus::Valid => ConfigStatus::Valid,
            CameraConfigurationStatus::Adjusted => ConfigStatus::Adjusted,
            CameraConfigurationStatus::Invalid => return Some((cfgs, ConfigStatus::Invalid)),
        };

        let (fourcc, size, stride, buffer_count) = {
            let cfg = cfgs.get(0)?;
            (
                cfg.get_pixel_format().fourcc().to_le_bytes(),
                cfg.get_size(),
                cfg.get_stride(),
                cfg.get_buffer_count(),
            )
        };
        if !read_back(config, fourcc, size.width, size.height, stride, buffer_count) {
            warn!(
                "camera {} chose unsupported format {}",
                self.id,
                String::from_utf8_lossy(&fourcc)
            );
            return Some((cfgs, ConfigStatus::Invalid));
        }
        Some((cfgs, status))
    }
}

impl<'m> Camera for LibcameraCamera<'m> {
    type Request = Request;
    type Completed = LibcameraCompletion;

    fn id(&self) -> &str {
        &self.id
    }

    fn generate_configuration(&self) -> Result<StreamConfig> {
        let cfgs = self
            .active()?
            .generate_configuration(&[StreamRole::StillCapture])
            .ok_or_else(|| {
                CaptureError::InvalidConfiguration("no still capture configuration".to_string())
            })?;
        let cfg = cfgs
            .get(0)
            .ok_or_else(|| CaptureError::InvalidConfiguration("empty configuration".to_string()))?;
        let fourcc = cfg.get_pixel_format().fourcc().to_le_bytes();
        let format = PixelFormat::from_fourcc(fourcc).ok_or_else(|| {
            CaptureError::InvalidConfiguration(format!(
                "default format {} is not supported",
                String::from_utf8_lossy(&fourcc)
            ))
        })?;
        let size = cfg.get_size();
        let mut config = StreamConfig::new(size.width, size.height, format);
        config.stride = cfg.get_stride();
        config.buffer_count = cfg.get_buffer_count();
        Ok(config)
    }

    fn validate(&self, config: &mut StreamConfig) -> ConfigStatus {
        match self.still_configuration(config) {
            Some((_, status)) => status,
            None => ConfigStatus::Invalid,
        }
    }

    fn configure(&mut self, config: &StreamConfig) -> Result<()> {
        let mut check = config.clone();
        let (mut cfgs, status) = self.still_configuration(&mut check).ok_or_else(|| {
            CaptureError::InvalidConfiguration(format!("camera {} cannot run {}", self.id, config))
        })?;
        if status == ConfigStatus::Invalid || check != *config {
            return Err(CaptureError::InvalidConfiguration(format!(
                "camera {} cannot run {}",
                self.id, config
            )));
        }
        self.active_mut()?
            .configure(&mut cfgs)
            .map_err(|e| CaptureError::InvalidConfiguration(format!("configure: {e}")))?;
        self.stream = cfgs.get(0).and_then(|cfg| cfg.stream());
        self.config = Some(cfgs);
        Ok(())
    }

    fn control_ranges(&self) -> ControlRanges {
        let Some(camera) = self.camera.as_ref() else {
            return ControlRanges::new();
        };
        let infos = camera.controls();
        [
            ControlId::ExposureTime,
            ControlId::AnalogueGain,
            ControlId::Brightness,
            ControlId::Contrast,
            ControlId::ColourGains,
        ]
        .into_iter()
        .filter_map(|id| {
            let info = infos.find(lc_control(id)).into_iter().next()?;
            let range = ControlRange::new(scalar(&info.min())?, scalar(&info.max())?);
            Some((id, range))
        })
        .collect()
    }

    fn allocate(&mut self) -> Result<Vec<HardwareBuffer>> {
        let stream = self.stream()?;
        let mut allocator = FrameBufferAllocator::new(self.active()?);
        let buffers = allocator
            .alloc(&stream)
            .map_err(|e| CaptureError::AllocationFailed(e.to_string()))?;

        let descriptors = buffers
            .iter()
            .enumerate()
            .map(|(id, fb)| {
                let planes = fb.planes();
                let planes = (0..planes.len())
                    .filter_map(|i| planes.get(i))
                    .map(|p| Plane::new(p.fd(), p.offset().unwrap_or(0), p.len()))
                    .collect();
                HardwareBuffer { id, planes }
            })
            .collect();
        self.buffers = buffers.into_iter().map(Some).collect();
        self.allocator = Some(allocator);
        Ok(descriptors)
    }

    fn free(&mut self) -> Result<()> {
        self.buffers.clear();
        self.allocator = None;
        Ok(())
    }

    fn create_request(&mut self, cookie: u64) -> Result<Request> {
        self.active()?.create_request(Some(cookie)).ok_or_else(|| {
            CaptureError::RequestConstructionFailed(format!(
                "camera {} returned no request",
                self.id
            ))
        })
    }

    fn attach_buffer(&mut self, request: &mut Request, buffer: BufferId) -> Result<()> {
        let stream = self.stream()?;
        let fb = self
            .buffers
            .get_mut(buffer)
            .and_then(Option::take)
            .ok_or_else(|| {
                CaptureError::RequestConstructionFailed(format!("buffer {buffer} is not available"))
            })?;
        request
            .add_buffer(&stream, fb)
            .map_err(|e| CaptureError::RequestConstructionFailed(e.to_string()))
    }

    fn on_request_completed(&mut self, notifier: Notifier<LibcameraCompletion>) {
        let stream = self.stream;
        if let Some(camera) = self.camera.as_mut() {
            camera.on_request_completed(move |request| {
                notifier.notify(LibcameraCompletion { request, stream });
            });
        }
    }

    fn start(&mut self, controls: Option<&ControlList>) -> Result<()> {
        let mut list = LcControlList::new();
        for (id, value) in controls.into_iter().flat_map(ControlList::iter) {
            let res = match (id, value) {
                (ControlId::ExposureTime, ControlValue::Int(v)) => list.set(lc::ExposureTime(v)),
                (ControlId::AnalogueGain, ControlValue::Float(v)) => list.set(lc::AnalogueGain(v)),
                (ControlId::Brightness, ControlValue::Float(v)) => list.set(lc::Brightness(v)),
                (ControlId::Contrast, ControlValue::Float(v)) => list.set(lc::Contrast(v)),
                (ControlId::ColourGains, ControlValue::FloatPair(v)) => {
                    list.set(lc::ColourGains(v))
                }
                (id, value) => {
                    warn!("control {}={} has the wrong type, skipping it", id, value);
                    continue;
                }
            };
            if let Err(e) = res {
                warn!("failed to set control {}={}: {:?}", id, value, e);
            }
        }
        self.active_mut()?
            .start(Some(&*list))
            .map_err(|e| CaptureError::Device(format!("start: {e}")))?;
        debug!("camera {} started", self.id);
        Ok(())
    }

    fn queue_request(&mut self, request: Request) -> Result<()> {
        self.active()?
            .queue_request(request)
            .map_err(|e| CaptureError::Device(format!("queue request: {e:?}")))
    }

    fn stop(&mut self) -> Result<()> {
        self.active_mut()?
            .stop()
            .map_err(|e| CaptureError::Device(format!("stop: {e}")))
    }

    fn release(&mut self) -> Result<()> {
        let camera = self
            .camera
            .take()
            .ok_or_else(|| CaptureError::Device(format!("camera {} already released", self.id)))?;
        self.buffers.clear();
        self.allocator = None;
        self.config = None;
        drop(camera);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ColorSpace;

    #[test]
    fn test_still_format_fourcc() {
        assert_eq!(lc_format(PixelFormat::Bgr888).fourcc(), 0x34324742);
        assert_eq!(lc_format(PixelFormat::Rgb888).fourcc(), 0x34324752);
    }

    #[test]
    fn test_read_back_drops_colour_space() {
        let mut config = StreamConfig::new(2028, 1520, PixelFormat::Bgr888)
            .with_color_space(ColorSpace::Rec709);
        assert!(read_back(&mut config, *b"BG24", 2028, 1520, 6144, 1));
        assert_eq!(config.color_space, None);
        assert_eq!(config.stride, 6144);
        assert_eq!(config.to_string(), "2028x1520-BGR888");

        assert!(!read_back(&mut config, *b"RGGB", 2028, 1520, 6144, 1));
        assert_eq!(config.pixel_format, PixelFormat::Bgr888);
    }
}
