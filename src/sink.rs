// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    error::{CaptureError, Result},
    format::PixelFormat,
};
use image::{
    codecs::png::{CompressionType, FilterType, PngEncoder},
    ExtendedColorType, ImageEncoder,
};
use std::{
    borrow::Cow,
    fmt,
    io::{self, Write},
    path::{Path, PathBuf},
    str::FromStr,
};
use tempfile::NamedTempFile;
use tracing::info;

/// Pixel rows of a captured frame.
///
/// Row `i` starts at byte `i * stride`; the stride may include padding
/// beyond `width * bytes_per_pixel`.
#[derive(Clone, Copy, Debug)]
pub struct FrameView<'a> {
    data: &'a [u8],
    width: u32,
    height: u32,
    stride: u32,
    format: PixelFormat,
}

impl<'a> FrameView<'a> {
    pub fn new(
        data: &'a [u8],
        width: u32,
        height: u32,
        stride: u32,
        format: PixelFormat,
    ) -> Result<Self> {
        let row_bytes = format.min_stride(width) as usize;
        if stride as usize >= row_bytes && height > 0 {
            let needed = (height as usize - 1) * stride as usize + row_bytes;
            if data.len() >= needed {
                return Ok(Self {
                    data,
                    width,
                    height,
                    stride,
                    format,
                });
            }
        }
        Err(CaptureError::EncodeFailed(format!(
            "{} bytes cannot hold {}x{} {} with stride {}",
            data.len(),
            width,
            height,
            format,
            stride
        )))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn row_bytes(&self) -> usize {
        self.format.min_stride(self.width) as usize
    }

    /// Pixel bytes of row `i`, padding excluded.
    pub fn row(&self, i: u32) -> Option<&'a [u8]> {
        if i >= self.height {
            return None;
        }
        let start = i as usize * self.stride as usize;
        self.data.get(start..start + self.row_bytes())
    }

    pub fn rows(&self) -> impl Iterator<Item = &'a [u8]> + '_ {
        (0..self.height).filter_map(move |i| self.row(i))
    }

    /// The frame with rows packed back to back. Borrows when the stride
    /// has no padding.
    pub fn packed(&self) -> Cow<'a, [u8]> {
        let row_bytes = self.row_bytes();
        if self.stride as usize == row_bytes {
            return Cow::Borrowed(&self.data[..row_bytes * self.height as usize]);
        }
        let mut out = Vec::with_capacity(row_bytes * self.height as usize);
        for row in self.rows() {
            out.extend_from_slice(row);
        }
        Cow::Owned(out)
    }
}

/// Where an encoded image is written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutputTarget {
    Stdout,
    File(PathBuf),
}

impl FromStr for OutputTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Err("empty output path".to_string()),
            "-" => Ok(OutputTarget::Stdout),
            path => Ok(OutputTarget::File(PathBuf::from(path))),
        }
    }
}

impl fmt::Display for OutputTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputTarget::Stdout => f.write_str("-"),
            OutputTarget::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Consumer of a completed frame.
pub trait FrameSink {
    /// The only pixel format this sink accepts.
    fn required_format(&self) -> PixelFormat;

    /// Persists the frame, returning the number of bytes written.
    fn write(&self, frame: &FrameView<'_>) -> Result<u64>;
}

/// Writes 8-bit RGB PNG images with fast deflate and the average filter.
#[derive(Clone, Debug)]
pub struct PngSink {
    target: OutputTarget,
}

impl PngSink {
    pub fn new(target: OutputTarget) -> Self {
        Self { target }
    }

    pub fn target(&self) -> &OutputTarget {
        &self.target
    }

    fn write_to_file(&self, path: &Path, png: &[u8]) -> Result<()> {
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let failed = |what: &str, e: &dyn std::fmt::Display| {
            CaptureError::EncodeFailed(format!("failed to {} {}: {}", what, path.display(), e))
        };
        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| failed("open file", &e))?;
        tmp.write_all(png)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| failed("write", &e))?;
        tmp.persist(path).map_err(|e| failed("persist", &e.error))?;
        Ok(())
    }
}

/// Encodes a packed 8-bit RGB frame as PNG.
pub fn encode_png(frame: &FrameView<'_>) -> Result<Vec<u8>> {
    if frame.format() != PixelFormat::Bgr888 {
        return Err(CaptureError::EncodeFailed(format!(
            "pixel format for png should be {} not {}",
            PixelFormat::Bgr888,
            frame.format()
        )));
    }
    let pixels = frame.packed();
    let mut png = Vec::new();
    let encoder = PngEncoder::new_with_quality(&mut png, CompressionType::Fast, FilterType::Avg);
    encoder.write_image(&pixels, frame.width(), frame.height(), ExtendedColorType::Rgb8)?;
    Ok(png)
}

impl FrameSink for PngSink {
    fn required_format(&self) -> PixelFormat {
        PixelFormat::Bgr888
    }

    fn write(&self, frame: &FrameView<'_>) -> Result<u64> {
        let png = encode_png(frame)?;
        match &self.target {
            OutputTarget::Stdout => {
                let mut stdout = io::stdout().lock();
                stdout
                    .write_all(&png)
                    .and_then(|()| stdout.flush())
                    .map_err(|e| {
                        CaptureError::EncodeFailed(format!("failed to write stdout: {e}"))
                    })?;
            }
            OutputTarget::File(path) => self.write_to_file(path, &png)?,
        }
        info!("Wrote PNG file of {} bytes to {}", png.len(), self.target);
        Ok(png.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 4x2 frame, 3 bytes per pixel, stride 16 with 4 padding bytes per row.
    fn padded_frame() -> Vec<u8> {
        let mut data = vec![0xEE; 32];
        for x in 0..12 {
            data[x] = x as u8;
            data[16 + x] = 100 + x as u8;
        }
        data
    }

    #[test]
    fn test_row_uses_stride() {
        let data = padded_frame();
        let view = FrameView::new(&data, 4, 2, 16, PixelFormat::Bgr888).unwrap();
        let row1 = view.row(1).unwrap();
        assert_eq!(row1.as_ptr(), data[16..].as_ptr());
        assert_eq!(row1[0], 100);
        assert_eq!(row1.len(), 12);
        assert!(view.row(2).is_none());
    }

    #[test]
    fn test_packed_drops_padding() {
        let data = padded_frame();
        let view = FrameView::new(&data, 4, 2, 16, PixelFormat::Bgr888).unwrap();
        let packed = view.packed();
        assert_eq!(packed.len(), 24);
        assert_eq!(packed[12], 100);
        assert!(!packed.contains(&0xEE));
    }

    #[test]
    fn test_packed_borrows_without_padding() {
        let data = vec![1u8; 24];
        let view = FrameView::new(&data, 4, 2, 12, PixelFormat::Bgr888).unwrap();
        assert!(matches!(view.packed(), Cow::Borrowed(_)));
    }

    #[test]
    fn test_last_row_may_omit_padding() {
        let data = vec![0u8; 16 + 12];
        assert!(FrameView::new(&data, 4, 2, 16, PixelFormat::Bgr888).is_ok());
        assert!(FrameView::new(&data[..27], 4, 2, 16, PixelFormat::Bgr888).is_err());
    }

    #[test]
    fn test_stride_below_row_rejected() {
        let data = vec![0u8; 64];
        assert!(FrameView::new(&data, 4, 2, 11, PixelFormat::Bgr888).is_err());
    }

    #[test]
    fn test_encode_png_header() {
        let data = padded_frame();
        let view = FrameView::new(&data, 4, 2, 16, PixelFormat::Bgr888).unwrap();
        let png = encode_png(&view).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
        assert_eq!(&png[12..16], b"IHDR");
        assert_eq!(u32::from_be_bytes(png[16..20].try_into().unwrap()), 4);
        assert_eq!(u32::from_be_bytes(png[20..24].try_into().unwrap()), 2);
    }

    #[test]
    fn test_encode_rejects_other_formats() {
        let data = vec![0u8; 32];
        let view = FrameView::new(&data, 4, 2, 16, PixelFormat::Rgb888).unwrap();
        assert!(matches!(encode_png(&view), Err(CaptureError::EncodeFailed(_))));
    }

    #[test]
    fn test_output_target() {
        assert_eq!("-".parse::<OutputTarget>(), Ok(OutputTarget::Stdout));
        assert_eq!(
            "out/test.png".parse::<OutputTarget>(),
            Ok(OutputTarget::File(PathBuf::from("out/test.png")))
        );
        assert!("".parse::<OutputTarget>().is_err());
    }
}
