// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    device::{Camera, CameraManager},
    error::{CaptureError, Result},
};
use tracing::{debug, info, warn};

/// Lists the identifiers of the available cameras.
pub fn list_cameras<M: CameraManager>(manager: &M) -> Vec<String> {
    let cameras = manager.cameras();
    for id in &cameras {
        debug!("Camera: {}", id);
    }
    cameras
}

/// Picks the requested camera, or the first available one when none was
/// requested.
pub fn resolve_camera<M: CameraManager>(manager: &M, requested: Option<&str>) -> Result<String> {
    match requested {
        Some(id) => Ok(id.to_string()),
        None => list_cameras(manager)
            .into_iter()
            .next()
            .ok_or_else(|| CaptureError::DeviceNotFound("(none available)".to_string())),
    }
}

/// Exclusive ownership of one acquired camera.
///
/// [`release`](Self::release) consumes the session, so the camera is
/// released at most once. A session dropped without an explicit release
/// still releases the camera and logs a warning.
pub struct DeviceSession<C: Camera> {
    camera: C,
    released: bool,
}

impl<C: Camera> DeviceSession<C> {
    /// Acquires the camera `id` from `manager`.
    pub fn acquire<'m, M>(manager: &'m M, id: &str) -> Result<Self>
    where
        M: CameraManager<Camera<'m> = C> + 'm,
    {
        let camera = manager.acquire(id)?;
        info!("acquired camera {}", id);
        Ok(Self {
            camera,
            released: false,
        })
    }

    pub fn id(&self) -> &str {
        self.camera.id()
    }

    pub fn camera(&self) -> &C {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut C {
        &mut self.camera
    }

    /// Releases the camera.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        let res = self.camera.release();
        match &res {
            Ok(()) => info!("released camera {}", self.camera.id()),
            Err(e) => warn!("releasing camera {} failed: {}", self.camera.id(), e),
        }
        res
    }
}

impl<C: Camera> Drop for DeviceSession<C> {
    fn drop(&mut self) {
        if !self.released {
            warn!("camera {} session dropped without release", self.camera.id());
            if let Err(e) = self.camera.release() {
                warn!("releasing camera {} failed: {}", self.camera.id(), e);
            }
        }
    }
}
