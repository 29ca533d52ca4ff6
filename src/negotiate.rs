// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    device::{Camera, ConfigStatus},
    error::{CaptureError, Result},
    format::{CommittedConfig, PixelFormat, StreamConfig},
};
use tracing::{info, warn};

/// A configuration the camera validated, possibly after adjusting it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Negotiated {
    pub config: StreamConfig,
    pub status: ConfigStatus,
}

impl Negotiated {
    pub fn adjusted(&self) -> bool {
        self.status == ConfigStatus::Adjusted
    }
}

/// Agrees a stream configuration with the camera.
///
/// The negotiator knows the pixel format the frame sink consumes and
/// refuses anything else before the camera is configured, so an
/// incompatible request never reaches buffer allocation.
pub struct StreamNegotiator {
    required: PixelFormat,
}

impl StreamNegotiator {
    pub fn new(required: PixelFormat) -> Self {
        Self { required }
    }

    fn check_format(&self, format: PixelFormat, what: &str) -> Result<()> {
        if format != self.required {
            return Err(CaptureError::InvalidConfiguration(format!(
                "{what} pixel format {format} is not the {} the frame sink consumes",
                self.required
            )));
        }
        Ok(())
    }

    /// Submits `desired` for validation and returns what the camera would
    /// actually run. Callers must use the returned configuration.
    pub fn propose<C: Camera>(&self, camera: &C, desired: &StreamConfig) -> Result<Negotiated> {
        self.check_format(desired.pixel_format, "requested")?;

        match camera.generate_configuration() {
            Ok(default) => info!("Default StillCapture configuration: {}", default),
            Err(e) => warn!("no default configuration from camera {}: {}", camera.id(), e),
        }

        let mut config = desired.clone();
        let status = camera.validate(&mut config);
        match status {
            ConfigStatus::Valid => {}
            ConfigStatus::Adjusted => {
                warn!("camera adjusted configuration {} to {}", desired, config)
            }
            ConfigStatus::Invalid => {
                return Err(CaptureError::InvalidConfiguration(format!(
                    "camera {} rejected {}",
                    camera.id(),
                    desired
                )))
            }
        }
        info!(
            "Validated StillCapture configuration: {} stride {}",
            config, config.stride
        );
        Ok(Negotiated { config, status })
    }

    /// Applies a negotiated configuration. After this the configuration is
    /// frozen for the session.
    pub fn commit<C: Camera>(
        &self,
        camera: &mut C,
        negotiated: Negotiated,
    ) -> Result<CommittedConfig> {
        let config = negotiated.config;
        self.check_format(config.pixel_format, "negotiated")?;
        config
            .check()
            .map_err(CaptureError::InvalidConfiguration)?;
        camera.configure(&config)?;
        info!("configured camera {} for {}", camera.id(), config);
        Ok(CommittedConfig::new(config))
    }
}
