// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    controls::ControlList,
    device::{BufferId, Camera, CompletedRequest, RequestStatus},
    error::{CaptureError, Result},
};
use std::fmt;
use tracing::debug;

/// Lifecycle of a single capture request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestState {
    Created,
    BufferBound,
    ControlsAttached,
    Queued,
    Completed,
    Failed,
    Retired,
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One exposure: a target buffer plus the controls to apply.
///
/// The camera-side request handle is held until [`queue`](Self::queue)
/// hands it to the camera; from then on the request belongs to the
/// hardware path and nothing on it can change until the completion comes
/// back through [`complete`](Self::complete).
pub struct CaptureRequest<R> {
    cookie: u64,
    state: RequestState,
    buffer: Option<BufferId>,
    controls: ControlList,
    handle: Option<R>,
}

impl<R> CaptureRequest<R> {
    /// Obtains a new request from the camera.
    pub fn create<C>(camera: &mut C, cookie: u64) -> Result<Self>
    where
        C: Camera<Request = R>,
    {
        let handle = camera.create_request(cookie)?;
        Ok(Self {
            cookie,
            state: RequestState::Created,
            buffer: None,
            controls: ControlList::new(),
            handle: Some(handle),
        })
    }

    pub fn cookie(&self) -> u64 {
        self.cookie
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn buffer(&self) -> Option<BufferId> {
        self.buffer
    }

    pub fn controls(&self) -> &ControlList {
        &self.controls
    }

    /// Attaches the target buffer. A request carries exactly one buffer.
    pub fn bind_buffer<C>(&mut self, camera: &mut C, buffer: BufferId) -> Result<()>
    where
        C: Camera<Request = R>,
    {
        if self.state != RequestState::Created {
            return Err(CaptureError::RequestConstructionFailed(format!(
                "request {} already has buffer {:?} bound ({})",
                self.cookie, self.buffer, self.state
            )));
        }
        let handle = self.handle.as_mut().ok_or_else(|| {
            CaptureError::RequestConstructionFailed(format!(
                "request {} has no handle",
                self.cookie
            ))
        })?;
        camera.attach_buffer(handle, buffer)?;
        self.buffer = Some(buffer);
        self.state = RequestState::BufferBound;
        Ok(())
    }

    /// Sets the control values for this exposure.
    pub fn attach_controls(&mut self, controls: ControlList) -> Result<()> {
        match self.state {
            RequestState::BufferBound | RequestState::ControlsAttached => {
                self.controls = controls;
                self.state = RequestState::ControlsAttached;
                Ok(())
            }
            state => Err(CaptureError::RequestConstructionFailed(format!(
                "cannot attach controls to request {} in state {}",
                self.cookie, state
            ))),
        }
    }

    /// Moves the attached controls out so they can be passed to the camera
    /// start call, leaving the request with none.
    pub fn take_controls(&mut self) -> ControlList {
        std::mem::take(&mut self.controls)
    }

    /// Hands the request to the camera.
    pub fn queue<C>(&mut self, camera: &mut C) -> Result<()>
    where
        C: Camera<Request = R>,
    {
        match self.state {
            RequestState::BufferBound | RequestState::ControlsAttached => {}
            state => {
                return Err(CaptureError::RequestConstructionFailed(format!(
                    "cannot queue request {} in state {}",
                    self.cookie, state
                )))
            }
        }
        let handle = self.handle.take().ok_or_else(|| {
            CaptureError::RequestConstructionFailed(format!(
                "request {} has no handle",
                self.cookie
            ))
        })?;
        camera.queue_request(handle)?;
        self.state = RequestState::Queued;
        debug!("request {} queued", self.cookie);
        Ok(())
    }

    /// Records the camera's completion and returns the finished request.
    ///
    /// A request the camera returned without valid data moves to `Failed`
    /// and yields `RequestFailed`; its buffer must not be read.
    pub fn complete<D: CompletedRequest>(&mut self, done: D) -> Result<Finished<D>> {
        if self.state != RequestState::Queued {
            return Err(CaptureError::Device(format!(
                "completion for request {} in state {}",
                self.cookie, self.state
            )));
        }
        if done.cookie() != self.cookie {
            return Err(CaptureError::Device(format!(
                "completion for request {} while waiting on {}",
                done.cookie(),
                self.cookie
            )));
        }
        match done.status() {
            RequestStatus::Complete => {
                self.state = RequestState::Completed;
                Ok(Finished { done })
            }
            status => {
                self.state = RequestState::Failed;
                Err(CaptureError::RequestFailed {
                    cookie: self.cookie,
                    status,
                })
            }
        }
    }

    /// Discards the request after its data has been consumed.
    pub fn retire<D: CompletedRequest>(&mut self, finished: Finished<D>) -> Vec<u32> {
        let bytes_used = finished.bytes_used();
        self.state = RequestState::Retired;
        bytes_used
    }
}

/// A request the camera completed with valid data.
pub struct Finished<D> {
    done: D,
}

impl<D: CompletedRequest> Finished<D> {
    pub fn cookie(&self) -> u64 {
        self.done.cookie()
    }

    /// Per-plane bytes the camera wrote.
    pub fn bytes_used(&self) -> Vec<u32> {
        self.done.bytes_used()
    }
}

/// Formats per-plane byte counts as `a/b/c`.
pub fn format_bytes_used(bytes_used: &[u32]) -> String {
    bytes_used
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bridge::completion_bridge,
        buffers::BufferPool,
        capture::default_controls,
        controls::{ControlId, ControlValue},
        device::CameraManager,
        format::{PixelFormat, StreamConfig},
        negotiate::StreamNegotiator,
        virt::{CompletionMode, VirtualCamera, VirtualCameraManager, VirtualSensor},
    };
    use std::time::Duration;

    fn prepared(completion: CompletionMode) -> (VirtualCameraManager, VirtualCamera, BufferPool) {
        let sensor = VirtualSensor::default()
            .with_completion(completion)
            .with_readout(Duration::from_millis(1));
        let mgr = VirtualCameraManager::single(sensor);
        let mut cam = mgr.acquire("virtual0").unwrap();
        let negotiator = StreamNegotiator::new(PixelFormat::Bgr888);
        let negotiated = negotiator
            .propose(&cam, &StreamConfig::new(64, 48, PixelFormat::Bgr888))
            .unwrap();
        let config = negotiator.commit(&mut cam, negotiated).unwrap();
        let pool = BufferPool::allocate(&mut cam, &config).unwrap();
        (mgr, cam, pool)
    }

    #[test]
    fn test_second_bind_rejected() {
        let (_mgr, mut cam, pool) = prepared(CompletionMode::Complete);
        let mut request = CaptureRequest::create(&mut cam, 7).unwrap();
        assert_eq!(request.state(), RequestState::Created);

        request.bind_buffer(&mut cam, 0).unwrap();
        assert_eq!(request.state(), RequestState::BufferBound);
        assert!(matches!(
            request.bind_buffer(&mut cam, 0),
            Err(CaptureError::RequestConstructionFailed(_))
        ));
        assert_eq!(request.buffer(), Some(0));
        pool.free(&mut cam).unwrap();
    }

    #[test]
    fn test_controls_need_buffer() {
        let (_mgr, mut cam, pool) = prepared(CompletionMode::Complete);
        let mut request = CaptureRequest::create(&mut cam, 1).unwrap();
        assert!(request.attach_controls(ControlList::new()).is_err());
        assert!(request.queue(&mut cam).is_err());
        pool.free(&mut cam).unwrap();
    }

    #[test]
    fn test_complete_and_retire() {
        let (_mgr, mut cam, mut pool) = prepared(CompletionMode::Complete);
        pool.map_all(&cam).unwrap();
        let mut request = CaptureRequest::create(&mut cam, 3).unwrap();
        request.bind_buffer(&mut cam, 0).unwrap();

        let (notifier, gate) = completion_bridge();
        cam.on_request_completed(notifier);
        cam.start(None).unwrap();
        request.queue(&mut cam).unwrap();
        assert_eq!(request.state(), RequestState::Queued);
        assert!(request.attach_controls(ControlList::new()).is_err());

        let done = gate.wait_timeout(Duration::from_secs(5)).unwrap();
        let finished = request.complete(done).unwrap();
        assert_eq!(request.state(), RequestState::Completed);
        assert_eq!(finished.cookie(), 3);

        let bytes_used = request.retire(finished);
        assert_eq!(request.state(), RequestState::Retired);
        assert_eq!(bytes_used, vec![192 * 48]);

        cam.stop().unwrap();
        pool.unmap_all(&cam).unwrap();
        pool.free(&mut cam).unwrap();
    }

    #[test]
    fn test_cancelled_request_fails() {
        let (_mgr, mut cam, pool) = prepared(CompletionMode::Cancel);
        let mut request = CaptureRequest::create(&mut cam, 9).unwrap();
        request.bind_buffer(&mut cam, 0).unwrap();

        let (notifier, gate) = completion_bridge();
        cam.on_request_completed(notifier);
        cam.start(None).unwrap();
        request.queue(&mut cam).unwrap();

        let done = gate.wait_timeout(Duration::from_secs(5)).unwrap();
        match request.complete(done) {
            Err(CaptureError::RequestFailed { cookie, status }) => {
                assert_eq!(cookie, 9);
                assert_eq!(status, RequestStatus::Cancelled);
            }
            _ => panic!("cancelled request must fail"),
        }
        assert_eq!(request.state(), RequestState::Failed);

        cam.stop().unwrap();
        pool.free(&mut cam).unwrap();
    }

    #[test]
    fn test_controls_move_to_start() {
        let (_mgr, mut cam, mut pool) = prepared(CompletionMode::Complete);
        let mut request = CaptureRequest::create(&mut cam, 1).unwrap();
        request.bind_buffer(&mut cam, 0).unwrap();
        request.attach_controls(default_controls()).unwrap();
        assert_eq!(request.state(), RequestState::ControlsAttached);
        assert_eq!(request.controls().len(), 5);

        let controls = request.take_controls();
        assert!(request.controls().is_empty());
        cam.start(Some(&controls)).unwrap();
        assert_eq!(
            cam.applied_controls().get(ControlId::ExposureTime),
            Some(ControlValue::Int(40000))
        );
        assert!(request.controls().is_empty());

        cam.stop().unwrap();
        pool.unmap_all(&cam).unwrap();
        pool.free(&mut cam).unwrap();
    }

    #[test]
    fn test_format_bytes_used() {
        assert_eq!(format_bytes_used(&[9123840]), "9123840");
        assert_eq!(format_bytes_used(&[100, 50, 50]), "100/50/50");
        assert_eq!(format_bytes_used(&[]), "");
    }
}
