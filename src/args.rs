// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use edgefirst_still::{
    controls::{ControlId, ControlList, ControlValue},
    format::{ColorSpace, PixelFormat},
    sink::OutputTarget,
    CaptureOptions,
};
use std::time::Duration;

/// Camera stack to capture from.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Copy)]
pub enum Backend {
    /// libcamera (requires the `libcamera` build feature)
    Libcamera,
    /// Synthetic sensor producing a test pattern
    Virtual,
}

impl Default for Backend {
    fn default() -> Self {
        if cfg!(feature = "libcamera") {
            Backend::Libcamera
        } else {
            Backend::Virtual
        }
    }
}

/// Command-line arguments for EdgeFirst Still Capture.
///
/// Captures one frame and writes it as a PNG. Arguments can be specified
/// via command line or environment variables.
///
/// # Example
///
/// ```bash
/// # Via command line
/// edgefirst-still --size 2028 1520 --exposure 20000 --output still.png
///
/// # Via environment variables
/// export EXPOSURE=20000
/// export OUTPUT=still.png
/// edgefirst-still
/// ```
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Camera identifier, the first available camera when unset
    #[arg(short, long, env = "CAMERA")]
    pub camera: Option<String>,

    /// List the available cameras and exit
    #[arg(long)]
    pub list: bool,

    /// Camera stack to capture from
    #[arg(long, env = "BACKEND", value_enum, default_value_t)]
    pub backend: Backend,

    /// Capture resolution in pixels (width height)
    #[arg(
        short,
        long,
        env = "CAPTURE_SIZE",
        default_value = "2028 1520",
        value_delimiter = ' ',
        num_args = 2
    )]
    pub size: Vec<u32>,

    /// Pixel format requested from the camera
    #[arg(long, env = "FORMAT", default_value = "BGR888")]
    pub format: PixelFormat,

    /// Colour space requested from the camera
    #[arg(long, env = "COLOR_SPACE", default_value = "rec709")]
    pub color_space: ColorSpace,

    /// Exposure time in microseconds
    #[arg(short, long, env = "EXPOSURE", default_value = "40000")]
    pub exposure: i32,

    /// Analogue gain
    #[arg(short, long, env = "GAIN", default_value = "1.0")]
    pub gain: f32,

    /// Brightness adjustment (-1.0 to 1.0)
    #[arg(long, env = "BRIGHTNESS", default_value = "0.0", allow_negative_numbers = true)]
    pub brightness: f32,

    /// Contrast (1.0 is neutral)
    #[arg(long, env = "CONTRAST", default_value = "1.0")]
    pub contrast: f32,

    /// Red and blue colour gains (red blue)
    #[arg(
        long,
        env = "COLOUR_GAINS",
        default_value = "1.2 1.2",
        value_delimiter = ' ',
        num_args = 2
    )]
    pub colour_gains: Vec<f32>,

    /// Output PNG path, "-" writes to stdout
    #[arg(short, long, env = "OUTPUT", default_value = "test.png")]
    pub output: OutputTarget,

    /// Give up waiting for the frame after this many milliseconds
    #[arg(long, env = "TIMEOUT_MS")]
    pub timeout_ms: Option<u64>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Also log to the systemd journal
    #[arg(long, env = "JOURNALD")]
    pub journald: bool,
}

impl Args {
    pub fn controls(&self) -> ControlList {
        let gains = match self.colour_gains[..] {
            [red, blue] => [red, blue],
            _ => [1.2, 1.2],
        };
        ControlList::new()
            .with(ControlId::Brightness, ControlValue::Float(self.brightness))
            .with(ControlId::Contrast, ControlValue::Float(self.contrast))
            .with(ControlId::AnalogueGain, ControlValue::Float(self.gain))
            .with(ControlId::ExposureTime, ControlValue::Int(self.exposure))
            .with(ControlId::ColourGains, ControlValue::FloatPair(gains))
    }
}

impl From<&Args> for CaptureOptions {
    fn from(args: &Args) -> Self {
        CaptureOptions {
            camera: args.camera.clone(),
            width: args.size[0],
            height: args.size[1],
            pixel_format: args.format,
            color_space: Some(args.color_space),
            buffer_count: 1,
            controls: args.controls(),
            timeout: args.timeout_ms.map(Duration::from_millis),
        }
    }
}
