// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    device::{BufferId, Camera, HardwareBuffer, Plane},
    error::{CaptureError, Result},
    format::CommittedConfig,
};
use std::{
    collections::BTreeMap,
    io,
    mem::ManuallyDrop,
    ops::Range,
    os::fd::RawFd,
    ptr::{null_mut, NonNull},
    slice::{from_raw_parts, from_raw_parts_mut},
};
use tracing::{debug, warn};

/// A run of adjacent planes that share one backing region.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegionRun {
    pub region: RawFd,
    /// Bytes to map from the start of the region so every plane in the run
    /// is covered.
    pub length: usize,
    /// Indices of the planes covered by this run.
    pub planes: Range<usize>,
}

/// Groups planes into one run per maximal sequence of adjacent planes with
/// the same backing region.
///
/// Each plane lands in exactly one run. A run is mapped from offset zero up
/// to the furthest plane end, which for densely packed planes equals the
/// sum of their lengths.
pub fn coalesce(planes: &[Plane]) -> Vec<RegionRun> {
    let mut runs: Vec<RegionRun> = Vec::new();
    for (index, plane) in planes.iter().enumerate() {
        match runs.last_mut() {
            Some(run) if run.region == plane.region => {
                run.length = run.length.max(plane.end());
                run.planes.end = index + 1;
            }
            _ => runs.push(RegionRun {
                region: plane.region,
                length: plane.end(),
                planes: index..index + 1,
            }),
        }
    }
    runs
}

/// A process mapping over one coalesced backing region.
///
/// Must be released with [`unmap`](Self::unmap) (usually through
/// [`Camera::unmap_region`]). A span that is dropped while still mapped is
/// unmapped with a warning.
#[derive(Debug)]
pub struct MappedSpan {
    ptr: NonNull<u8>,
    len: usize,
    region: RawFd,
}

impl MappedSpan {
    /// Maps `len` bytes of `region` shared and read/write from offset zero.
    pub fn map(region: RawFd, len: usize) -> Result<Self> {
        if len == 0 {
            return Err(CaptureError::MappingFailed {
                fd: region,
                source: io::Error::new(io::ErrorKind::InvalidInput, "empty region"),
            });
        }
        let addr = unsafe {
            libc::mmap(
                null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                region,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(CaptureError::MappingFailed {
                fd: region,
                source: io::Error::last_os_error(),
            });
        }
        let ptr = NonNull::new(addr.cast::<u8>()).ok_or_else(|| CaptureError::MappingFailed {
            fd: region,
            source: io::Error::other("mmap returned null"),
        })?;
        debug!("mapped fd:{} {} bytes at {:?}", region, len, ptr);
        Ok(Self { ptr, len, region })
    }

    pub fn unmap(self) -> Result<()> {
        let span = ManuallyDrop::new(self);
        span.munmap().map_err(|source| CaptureError::MappingFailed {
            fd: span.region,
            source,
        })
    }

    fn munmap(&self) -> io::Result<()> {
        if unsafe { libc::munmap(self.ptr.as_ptr().cast(), self.len) } != 0 {
            return Err(io::Error::last_os_error());
        }
        debug!("unmapped fd:{} {} bytes", self.region, self.len);
        Ok(())
    }

    pub fn region(&self) -> RawFd {
        self.region
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// CPU view of the mapped bytes.
    ///
    /// The camera may still be writing to a buffer that belongs to a queued
    /// request. Only read spans of a buffer whose request has completed.
    pub fn as_slice(&self) -> &[u8] {
        unsafe { from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for MappedSpan {
    fn drop(&mut self) {
        warn!("mapped span fd:{} dropped without unmap", self.region);
        if let Err(e) = self.munmap() {
            warn!("unmap failed: {}", e);
        }
    }
}

/// Hardware buffers of the committed stream and their CPU mappings.
///
/// Lifecycle: [`allocate`](Self::allocate), [`map_all`](Self::map_all),
/// then after the camera has stopped [`unmap_all`](Self::unmap_all) and
/// [`free`](Self::free). The mapped table is only touched from the capture
/// thread.
pub struct BufferPool {
    buffers: Vec<HardwareBuffer>,
    mapped: BTreeMap<BufferId, Vec<MappedSpan>>,
    freed: bool,
}

impl BufferPool {
    /// Reserves the configured number of buffers. Failure is fatal; no
    /// partial retry is attempted.
    pub fn allocate<C: Camera>(camera: &mut C, config: &CommittedConfig) -> Result<Self> {
        let buffers = camera.allocate()?;
        if buffers.is_empty() {
            return Err(CaptureError::AllocationFailed(
                "camera returned no buffers".to_string(),
            ));
        }
        let frame_size = config.as_config().frame_size();
        for buffer in &buffers {
            if buffer.len() < frame_size {
                warn!(
                    "buffer {} holds {} bytes, a {} frame needs {}",
                    buffer.id,
                    buffer.len(),
                    config,
                    frame_size
                );
            }
        }
        debug!("Allocated: {} buffers for stream.", buffers.len());
        Ok(Self {
            buffers,
            mapped: BTreeMap::new(),
            freed: false,
        })
    }

    pub fn buffers(&self) -> &[HardwareBuffer] {
        &self.buffers
    }

    /// Maps every buffer, one mapping per coalesced region run.
    ///
    /// On failure the spans mapped so far stay in the table so
    /// [`unmap_all`](Self::unmap_all) releases them.
    pub fn map_all<C: Camera>(&mut self, camera: &C) -> Result<()> {
        for buffer in &self.buffers {
            let spans = self.mapped.entry(buffer.id).or_default();
            for run in coalesce(&buffer.planes) {
                spans.push(camera.map_region(run.region, run.length)?);
            }
            debug!("buffer {} mapped in {} span(s)", buffer.id, spans.len());
        }
        Ok(())
    }

    /// Spans of one buffer, in plane order.
    pub fn spans(&self, id: BufferId) -> Option<&[MappedSpan]> {
        self.mapped.get(&id).map(Vec::as_slice)
    }

    pub fn mapped_spans(&self) -> usize {
        self.mapped.values().map(Vec::len).sum()
    }

    /// Unmaps every span exactly once. Every span is attempted; the first
    /// failure is returned. The camera must be stopped.
    pub fn unmap_all<C: Camera>(&mut self, camera: &C) -> Result<()> {
        let mut result = Ok(());
        for (_, spans) in std::mem::take(&mut self.mapped) {
            for span in spans {
                if let Err(e) = camera.unmap_region(span) {
                    warn!("{}", e);
                    if result.is_ok() {
                        result = Err(e);
                    }
                }
            }
        }
        result
    }

    /// Releases the hardware buffers. Spans still mapped are unmapped first.
    pub fn free<C: Camera>(mut self, camera: &mut C) -> Result<()> {
        let unmapped = if self.mapped.is_empty() {
            Ok(())
        } else {
            warn!("freeing buffers with {} span(s) still mapped", self.mapped_spans());
            self.unmap_all(&*camera)
        };
        self.freed = true;
        let freed = camera.free();
        unmapped.and(freed)
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        if !self.freed {
            warn!("buffer pool dropped without free");
        }
    }
}
