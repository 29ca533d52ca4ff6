// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use std::{fmt, str::FromStr};

/// Pixel formats a camera stream can be negotiated to.
///
/// Names follow the DRM/libcamera convention where the channel order is read
/// from the most significant byte of a little-endian word, so [`BGR888`]
/// stores its bytes in memory as R, G, B.
///
/// [`BGR888`]: PixelFormat::Bgr888
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 24-bit packed, memory order R G B
    Bgr888,
    /// 24-bit packed, memory order B G R
    Rgb888,
    /// 32-bit packed, memory order B G R X
    Xrgb8888,
    /// YUV 4:2:2 packed
    Yuyv,
    /// YUV 4:2:0 semi-planar
    Nv12,
    /// YUV 4:2:0 three plane
    Yuv420,
}

impl PixelFormat {
    pub const fn fourcc(&self) -> [u8; 4] {
        match self {
            PixelFormat::Bgr888 => *b"BG24",
            PixelFormat::Rgb888 => *b"RG24",
            PixelFormat::Xrgb8888 => *b"XR24",
            PixelFormat::Yuyv => *b"YUYV",
            PixelFormat::Nv12 => *b"NV12",
            PixelFormat::Yuv420 => *b"YU12",
        }
    }

    pub fn from_fourcc(fourcc: [u8; 4]) -> Option<Self> {
        [
            PixelFormat::Bgr888,
            PixelFormat::Rgb888,
            PixelFormat::Xrgb8888,
            PixelFormat::Yuyv,
            PixelFormat::Nv12,
            PixelFormat::Yuv420,
        ]
        .into_iter()
        .find(|fmt| fmt.fourcc() == fourcc)
    }

    /// Bytes per pixel of the first (or only) plane.
    pub const fn bytes_per_pixel(&self) -> u32 {
        match self {
            PixelFormat::Bgr888 | PixelFormat::Rgb888 => 3,
            PixelFormat::Xrgb8888 => 4,
            PixelFormat::Yuyv => 2,
            PixelFormat::Nv12 | PixelFormat::Yuv420 => 1,
        }
    }

    /// Smallest legal stride for a row of `width` pixels.
    pub const fn min_stride(&self, width: u32) -> u32 {
        width * self.bytes_per_pixel()
    }

    /// Total bytes of one frame with the given stride, all planes included.
    pub const fn frame_size(&self, stride: u32, height: u32) -> usize {
        let luma = stride as usize * height as usize;
        match self {
            PixelFormat::Nv12 | PixelFormat::Yuv420 => luma + luma / 2,
            _ => luma,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::Bgr888 => "BGR888",
            PixelFormat::Rgb888 => "RGB888",
            PixelFormat::Xrgb8888 => "XRGB8888",
            PixelFormat::Yuyv => "YUYV",
            PixelFormat::Nv12 => "NV12",
            PixelFormat::Yuv420 => "YUV420",
        };
        f.write_str(name)
    }
}

impl FromStr for PixelFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BGR888" => Ok(PixelFormat::Bgr888),
            "RGB888" => Ok(PixelFormat::Rgb888),
            "XRGB8888" => Ok(PixelFormat::Xrgb8888),
            "YUYV" => Ok(PixelFormat::Yuyv),
            "NV12" => Ok(PixelFormat::Nv12),
            "YUV420" => Ok(PixelFormat::Yuv420),
            other => Err(format!("unknown pixel format {other}")),
        }
    }
}

/// Colour spaces a stream can be tagged with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ColorSpace {
    Raw,
    Srgb,
    Sycc,
    Smpte170m,
    Rec709,
    Rec2020,
}

impl fmt::Display for ColorSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColorSpace::Raw => "RAW",
            ColorSpace::Srgb => "sRGB",
            ColorSpace::Sycc => "sYCC",
            ColorSpace::Smpte170m => "SMPTE170M",
            ColorSpace::Rec709 => "Rec709",
            ColorSpace::Rec2020 => "Rec2020",
        };
        f.write_str(name)
    }
}

impl FromStr for ColorSpace {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Ok(ColorSpace::Raw),
            "srgb" => Ok(ColorSpace::Srgb),
            "sycc" | "jpeg" => Ok(ColorSpace::Sycc),
            "smpte170m" => Ok(ColorSpace::Smpte170m),
            "rec709" => Ok(ColorSpace::Rec709),
            "rec2020" => Ok(ColorSpace::Rec2020),
            other => Err(format!("unknown colour space {other}")),
        }
    }
}

/// Geometry and format contract of one capture stream.
///
/// A desired configuration leaves `stride` at zero; the camera computes it
/// while validating.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamConfig {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub color_space: Option<ColorSpace>,
    pub stride: u32,
    pub buffer_count: u32,
}

impl StreamConfig {
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        Self {
            width,
            height,
            pixel_format,
            color_space: None,
            stride: 0,
            buffer_count: 1,
        }
    }

    pub fn with_color_space(mut self, color_space: ColorSpace) -> Self {
        self.color_space = Some(color_space);
        self
    }

    pub fn with_buffer_count(mut self, buffer_count: u32) -> Self {
        self.buffer_count = buffer_count;
        self
    }

    pub fn frame_size(&self) -> usize {
        self.pixel_format.frame_size(self.stride, self.height)
    }

    /// Checks the invariants a camera-accepted configuration must hold.
    pub fn check(&self) -> Result<(), String> {
        if self.width == 0 || self.height == 0 {
            return Err(format!("empty frame size {}x{}", self.width, self.height));
        }
        let min_stride = self.pixel_format.min_stride(self.width);
        if self.stride < min_stride {
            return Err(format!(
                "stride {} is smaller than {} bytes per row of {}",
                self.stride, min_stride, self.pixel_format
            ));
        }
        if self.buffer_count == 0 {
            return Err("buffer count must be at least 1".to_string());
        }
        Ok(())
    }
}

impl fmt::Display for StreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}-{}", self.width, self.height, self.pixel_format)?;
        if let Some(color_space) = self.color_space {
            write!(f, "/{color_space}")?;
        }
        Ok(())
    }
}

/// A configuration the camera has accepted. Read-only for the rest of the
/// session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommittedConfig(StreamConfig);

impl CommittedConfig {
    pub(crate) fn new(config: StreamConfig) -> Self {
        Self(config)
    }

    pub fn width(&self) -> u32 {
        self.0.width
    }

    pub fn height(&self) -> u32 {
        self.0.height
    }

    pub fn stride(&self) -> u32 {
        self.0.stride
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.0.pixel_format
    }

    pub fn color_space(&self) -> Option<ColorSpace> {
        self.0.color_space
    }

    pub fn as_config(&self) -> &StreamConfig {
        &self.0
    }
}

impl fmt::Display for CommittedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
