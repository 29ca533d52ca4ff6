// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Boundary between the capture pipeline and a camera stack.
//!
//! A [`CameraManager`] enumerates and acquires cameras, an acquired
//! [`Camera`] negotiates a stream, hands out hardware buffers described as
//! planes over file-descriptor backed regions, and completes queued requests
//! asynchronously through a [`Notifier`].

use crate::{
    bridge::Notifier,
    buffers::MappedSpan,
    controls::{ControlList, ControlRanges},
    error::Result,
    format::StreamConfig,
};
use std::{fmt, os::fd::RawFd};

/// Index of a buffer within the set allocated for the stream.
pub type BufferId = usize;

/// One plane of a hardware buffer.
///
/// `region` identifies the backing allocation (a dmabuf or memfd descriptor
/// owned by the camera). Several planes may live in the same region at
/// different offsets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Plane {
    pub region: RawFd,
    pub offset: usize,
    pub length: usize,
}

impl Plane {
    pub const fn new(region: RawFd, offset: usize, length: usize) -> Self {
        Self {
            region,
            offset,
            length,
        }
    }

    pub const fn end(&self) -> usize {
        self.offset + self.length
    }
}

/// A camera-allocated frame buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HardwareBuffer {
    pub id: BufferId,
    pub planes: Vec<Plane>,
}

impl HardwareBuffer {
    /// Total bytes across all planes.
    pub fn len(&self) -> usize {
        self.planes.iter().map(|p| p.length).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.planes.is_empty()
    }
}

/// Completion status the camera reports for a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestStatus {
    Pending,
    Complete,
    Cancelled,
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Complete => "complete",
            RequestStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Outcome of asking the camera to validate a configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigStatus {
    Valid,
    Adjusted,
    Invalid,
}

/// A request handed back by the camera once it finished.
pub trait CompletedRequest: Send + 'static {
    fn cookie(&self) -> u64;
    fn status(&self) -> RequestStatus;
    /// Bytes the camera wrote to each plane of the request's buffer.
    fn bytes_used(&self) -> Vec<u32>;
}

/// Discovers and acquires cameras.
pub trait CameraManager {
    type Camera<'a>: Camera
    where
        Self: 'a;

    /// Identifiers of the cameras currently available.
    fn cameras(&self) -> Vec<String>;

    /// Claims exclusive ownership of a camera.
    ///
    /// Fails with `DeviceNotFound` for an unknown id and `DeviceBusy` when
    /// another session holds the camera.
    fn acquire(&self, id: &str) -> Result<Self::Camera<'_>>;
}

/// An acquired camera.
pub trait Camera {
    /// A request under construction, owned by the caller until queued.
    type Request;
    /// A request returned through the completion notifier.
    type Completed: CompletedRequest;

    fn id(&self) -> &str;

    /// The camera's default still-capture configuration.
    fn generate_configuration(&self) -> Result<StreamConfig>;

    /// Validates `config` in place. The camera may adjust any field,
    /// including the stride it computes for the chosen format.
    fn validate(&self, config: &mut StreamConfig) -> ConfigStatus;

    fn configure(&mut self, config: &StreamConfig) -> Result<()>;

    /// Ranges of the controls this camera accepts.
    fn control_ranges(&self) -> ControlRanges;

    /// Allocates the configured number of buffers for the stream.
    fn allocate(&mut self) -> Result<Vec<HardwareBuffer>>;

    fn free(&mut self) -> Result<()>;

    fn create_request(&mut self, cookie: u64) -> Result<Self::Request>;

    fn attach_buffer(&mut self, request: &mut Self::Request, buffer: BufferId) -> Result<()>;

    /// Registers the single sink for completed requests. The camera calls it
    /// from its own notification context.
    fn on_request_completed(&mut self, notifier: Notifier<Self::Completed>);

    fn start(&mut self, controls: Option<&ControlList>) -> Result<()>;

    fn queue_request(&mut self, request: Self::Request) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    /// Gives up ownership of the camera. Called once by the session.
    fn release(&mut self) -> Result<()>;

    /// Maps `length` bytes of a backing region into the process.
    fn map_region(&self, region: RawFd, length: usize) -> Result<MappedSpan> {
        MappedSpan::map(region, length)
    }

    fn unmap_region(&self, span: MappedSpan) -> Result<()> {
        span.unmap()
    }
}
