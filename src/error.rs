// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::device::RequestStatus;
use std::{io, os::fd::RawFd, time::Duration};
use thiserror::Error;

/// Failure kinds of a still capture.
///
/// Every kind carries its own diagnostic message and process exit code so a
/// caller can tell setup failures (device, negotiation, allocation) apart
/// from a request the camera completed without data.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("camera {0} not found")]
    DeviceNotFound(String),

    #[error("camera {0} is busy, it is acquired by another session")]
    DeviceBusy(String),

    #[error("invalid stream configuration: {0}")]
    InvalidConfiguration(String),

    #[error("failed to allocate frame buffers: {0}")]
    AllocationFailed(String),

    #[error("failed to map buffer region fd:{fd}: {source}")]
    MappingFailed {
        fd: RawFd,
        #[source]
        source: io::Error,
    },

    #[error("failed to construct capture request: {0}")]
    RequestConstructionFailed(String),

    #[error("camera returned request {cookie} without data ({status})")]
    RequestFailed { cookie: u64, status: RequestStatus },

    #[error("failed to write image: {0}")]
    EncodeFailed(String),

    #[error("timed out after {0:?} waiting for the request to complete")]
    TimedOut(Duration),

    #[error("completion source closed before the request completed")]
    CompletionLost,

    #[error("camera error: {0}")]
    Device(String),
}

impl CaptureError {
    /// Process exit code reported by the command line tool for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            CaptureError::DeviceNotFound(_) => 2,
            CaptureError::DeviceBusy(_) => 3,
            CaptureError::InvalidConfiguration(_) => 4,
            CaptureError::AllocationFailed(_) => 5,
            CaptureError::MappingFailed { .. } => 6,
            CaptureError::RequestConstructionFailed(_) => 7,
            CaptureError::RequestFailed { .. } => 8,
            CaptureError::EncodeFailed(_) => 9,
            CaptureError::TimedOut(_) => 10,
            CaptureError::CompletionLost => 11,
            CaptureError::Device(_) => 12,
        }
    }
}

impl From<image::ImageError> for CaptureError {
    fn from(err: image::ImageError) -> Self {
        CaptureError::EncodeFailed(err.to_string())
    }
}

pub type Result<T, E = CaptureError> = std::result::Result<T, E>;
