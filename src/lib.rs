// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! # EdgeFirst Still Capture Library
//!
//! Captures a single still frame from a camera and writes it as a PNG.
//!
//! ## Features
//!
//! - **Device Sessions**: Exclusive acquisition of one camera, released on
//!   every exit path.
//! - **Stream Negotiation**: The camera validates and may adjust the
//!   requested size, pixel format and color space; the adjusted stride is
//!   what the frame is read with.
//! - **Buffer Pool**: Camera buffers are mapped once per backing region, no
//!   matter how many planes share it.
//! - **Completion Bridge**: Completions raised on the camera's own thread
//!   are handed to the capture thread through a single-slot channel.
//! - **PNG Output**: Fast deflate with the average filter, written through a
//!   temporary file so a failed capture never leaves a partial image.
//!
//! Two camera stacks implement [`device::CameraManager`]: the synthetic
//! sensor in [`virt`], and libcamera behind the `libcamera` feature.
//!
//! ## Example
//!
//! ```no_run
//! use edgefirst_still::{
//!     capture::{capture_still, CaptureOptions},
//!     sink::{OutputTarget, PngSink},
//!     virt::{VirtualCameraManager, VirtualSensor},
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = VirtualCameraManager::single(VirtualSensor::default());
//! let sink = PngSink::new(OutputTarget::File("test.png".into()));
//! let report = capture_still(&manager, &CaptureOptions::default(), &sink)?;
//! println!("{} bytes from {}", report.written, report.camera);
//! # Ok(())
//! # }
//! ```
//!
//! ## Safety
//!
//! Buffer mapping and memfd allocation call into libc. The unsafe code is
//! confined to [`buffers::MappedSpan`] and the synthetic sensor's allocator.

pub mod bridge;
pub mod buffers;
pub mod capture;
pub mod controls;
pub mod device;
pub mod error;
pub mod format;
#[cfg(feature = "libcamera")]
pub mod libcamera;
pub mod negotiate;
pub mod request;
pub mod session;
pub mod sink;
pub mod virt;

pub use capture::{capture_still, CaptureOptions, CaptureReport};
pub use error::{CaptureError, Result};
