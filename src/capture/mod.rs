//! V4L2 capture device: kernel-buffer acquisition, format negotiation,
//! zero-copy dequeue/requeue, pixel-format conversion.

mod ioctl;
pub mod convert;

use crate::error::CaptureError;
use crate::pipeline::state::{PixelFormat, VideoConfig};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::ptr;
use std::time::Duration;
use tracing::{debug, warn};

const NUM_BUFFERS: u32 = 4;
/// Canonical resolutions substituted when the device reports a
/// stepwise/continuous range instead of an enumerable list.
const CANONICAL_RESOLUTIONS: &[(u32, u32)] = &[(1920, 1080), (1280, 720), (640, 480)];
const CANONICAL_FRAMERATES_STEPWISE: &[u32] = &[60, 30];
const CANONICAL_FRAMERATES_EMPTY: &[u32] = &[30];

/// Which V4L2 queue/buffer layout this device's lifetime is fixed to,
/// probed once at `open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BufferDiscipline {
    SinglePlane,
    MultiPlane,
}

impl BufferDiscipline {
    fn buf_type(self) -> u32 {
        match self {
            BufferDiscipline::SinglePlane => ioctl::BUF_TYPE_VIDEO_CAPTURE,
            BufferDiscipline::MultiPlane => ioctl::BUF_TYPE_VIDEO_CAPTURE_MPLANE,
        }
    }
}

/// Which of the two states a buffer index can be in at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BufferState {
    OwnedByKernel,
    OwnedByConsumer,
}

struct MappedBuffer {
    ptr: *mut u8,
    length: usize,
    state: BufferState,
    /// Valid bytes as of the last successful dequeue of this index.
    bytesused: usize,
}

// SAFETY: the mapped region is only ever touched by the thread that owns
// the CaptureDevice and by the kernel between enqueue and dequeue.
unsafe impl Send for MappedBuffer {}

pub struct CaptureDevice {
    path: PathBuf,
    file: File,
    discipline: BufferDiscipline,
    buffers: Vec<MappedBuffer>,
    streaming: bool,
    consecutive_timeouts: u32,
    current_format: Option<PixelFormat>,
}


impl CaptureDevice {
    /// Opens the device read/write, non-blocking, and probes once whether
    /// it reports single-plane or multi-plane capture capability.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CaptureError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc_o_nonblock())
            .open(&path)?;

        let fd = ioctl::raw_fd_of(&file);
        let discipline = probe_discipline(fd)?;
        debug!(target: "capture", ?discipline, path = %path.display(), "opened capture device");

        Ok(Self {
            path,
            file,
            discipline,
            buffers: Vec::new(),
            streaming: false,
            consecutive_timeouts: 0,
            current_format: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn fd(&self) -> RawFd {
        ioctl::raw_fd_of(&self.file)
    }

    /// Ordered `(human-readable-name, fourcc)` pairs the device advertises.
    /// Only valid after `open`.
    pub fn enumerate_formats(&self) -> Result<Vec<(String, [u8; 4])>, CaptureError> {
        let mut out = Vec::new();
        let mut index = 0u32;
        loop {
            let mut desc = ioctl::v4l2_fmtdesc { index, type_: self.discipline.buf_type(), ..Default::default() };
            match unsafe { ioctl::enum_fmt(self.fd(), &mut desc) } {
                Ok(_) => {
                    let fourcc = desc.pixelformat.to_le_bytes();
                    let name = cstr_to_string(&desc.description);
                    out.push((name, fourcc));
                    index += 1;
                }
                Err(nix::errno::Errno::EINVAL) => break,
                Err(e) => return Err(CaptureError::Io(e.to_string())),
            }
        }
        Ok(out)
    }

    /// Discrete sizes the device supports for `fourcc`; substitutes the
    /// canonical set on stepwise/continuous ranges.
    pub fn enumerate_resolutions(&self, fourcc: [u8; 4]) -> Result<Vec<(u32, u32)>, CaptureError> {
        let pixelformat = u32::from_le_bytes(fourcc);
        let mut out = Vec::new();
        let mut index = 0u32;
        loop {
            let mut frm = ioctl::v4l2_frmsizeenum { index, pixel_format: pixelformat, ..Default::default() };
            match unsafe { ioctl::enum_framesizes(self.fd(), &mut frm) } {
                Ok(_) => match frm.type_ {
                    ioctl::FRMSIZE_TYPE_DISCRETE => {
                        let d = frm.discrete();
                        out.push((d.width, d.height));
                        index += 1;
                    }
                    ioctl::FRMSIZE_TYPE_STEPWISE | ioctl::FRMSIZE_TYPE_CONTINUOUS => {
                        return Ok(CANONICAL_RESOLUTIONS.to_vec());
                    }
                    _ => break,
                },
                Err(nix::errno::Errno::EINVAL) => break,
                Err(e) => return Err(CaptureError::Io(e.to_string())),
            }
        }
        Ok(out)
    }

    /// Discrete fps values for `(fourcc, w, h)`; substitutes on
    /// stepwise/continuous, and `{30}` if the device reports nothing.
    pub fn enumerate_framerates(&self, fourcc: [u8; 4], w: u32, h: u32) -> Result<Vec<u32>, CaptureError> {
        let pixelformat = u32::from_le_bytes(fourcc);
        let mut out = Vec::new();
        let mut index = 0u32;
        loop {
            let mut frm = ioctl::v4l2_frmivalenum {
                index,
                pixel_format: pixelformat,
                width: w,
                height: h,
                ..Default::default()
            };
            match unsafe { ioctl::enum_frameintervals(self.fd(), &mut frm) } {
                Ok(_) => match frm.type_ {
                    ioctl::FRMIVAL_TYPE_DISCRETE => {
                        let (num, den) = frm.discrete();
                        if num > 0 {
                            out.push(den / num);
                        }
                        index += 1;
                    }
                    ioctl::FRMIVAL_TYPE_STEPWISE | ioctl::FRMIVAL_TYPE_CONTINUOUS => {
                        return Ok(CANONICAL_FRAMERATES_STEPWISE.to_vec());
                    }
                    _ => break,
                },
                Err(nix::errno::Errno::EINVAL) => break,
                Err(e) => return Err(CaptureError::Io(e.to_string())),
            }
        }
        if out.is_empty() {
            Ok(CANONICAL_FRAMERATES_EMPTY.to_vec())
        } else {
            Ok(out)
        }
    }

    /// Negotiates format, sets frame interval, requests buffers, maps
    /// them, queues all of them, and enables streaming.
    ///
    /// Idempotent: calling `start` while capturing first `stop`s.
    pub fn start(&mut self, cfg: VideoConfig) -> Result<(), CaptureError> {
        if self.streaming {
            self.stop()?;
        }

        let mut fmt = ioctl::v4l2_format { type_: self.discipline.buf_type(), ..Default::default() };
        match self.discipline {
            BufferDiscipline::SinglePlane => {
                fmt.fmt.pix = ioctl::v4l2_pix_format {
                    width: cfg.width,
                    height: cfg.height,
                    pixelformat: u32::from_le_bytes(cfg.pixel_format.fourcc()),
                    field: ioctl::FIELD_NONE,
                    ..Default::default()
                };
            }
            BufferDiscipline::MultiPlane => {
                let mut pix_mp = ioctl::v4l2_pix_format_mplane {
                    width: cfg.width,
                    height: cfg.height,
                    pixelformat: u32::from_le_bytes(cfg.pixel_format.fourcc()),
                    field: ioctl::FIELD_NONE,
                    num_planes: 1,
                    ..Default::default()
                };
                pix_mp.plane_fmt[0] = ioctl::v4l2_plane_pix_format::default();
                fmt.fmt.pix_mp = pix_mp;
            }
        }

        unsafe { ioctl::s_fmt(self.fd(), &mut fmt) }.map_err(|e| match e {
            nix::errno::Errno::EINVAL => CaptureError::Format(format!("{:?}", cfg)),
            other => CaptureError::Io(other.to_string()),
        })?;

        self.set_frame_interval(cfg.fps)?;
        self.request_and_map_buffers()?;
        self.queue_all()?;
        self.stream_on()?;

        self.streaming = true;
        self.current_format = Some(cfg.pixel_format);
        self.consecutive_timeouts = 0;
        Ok(())
    }

    fn set_frame_interval(&self, fps: u32) -> Result<(), CaptureError> {
        if fps == 0 {
            return Ok(());
        }
        let mut parm = ioctl::v4l2_streamparm { type_: self.discipline.buf_type(), ..Default::default() };
        parm.parm.capture = ioctl::v4l2_captureparm {
            timeperframe: ioctl::v4l2_fract { numerator: 1, denominator: fps },
            ..Default::default()
        };
        match unsafe { ioctl::s_parm(self.fd(), &mut parm) } {
            Ok(_) => Ok(()),
            // Not every driver supports VIDIOC_S_PARM; treat as best-effort.
            Err(nix::errno::Errno::ENOTTY) | Err(nix::errno::Errno::EINVAL) => Ok(()),
            Err(e) => Err(CaptureError::Io(e.to_string())),
        }
    }

    fn request_and_map_buffers(&mut self) -> Result<(), CaptureError> {
        let mut req = ioctl::v4l2_requestbuffers {
            count: NUM_BUFFERS,
            type_: self.discipline.buf_type(),
            memory: ioctl::MEMORY_MMAP,
            ..Default::default()
        };
        match unsafe { ioctl::reqbufs(self.fd(), &mut req) } {
            Ok(_) => {}
            Err(nix::errno::Errno::EBUSY) => return Err(CaptureError::Busy),
            Err(e) => return Err(CaptureError::Io(e.to_string())),
        }

        let mut buffers = Vec::with_capacity(req.count as usize);
        for index in 0..req.count {
            let mut planes = [ioctl::v4l2_plane::default(); 1];
            let mut buf = ioctl::v4l2_buffer {
                index,
                type_: self.discipline.buf_type(),
                memory: ioctl::MEMORY_MMAP,
                ..Default::default()
            };
            if self.discipline == BufferDiscipline::MultiPlane {
                buf.m.planes = planes.as_mut_ptr();
                buf.length = planes.len() as u32;
            }
            unsafe { ioctl::querybuf(self.fd(), &mut buf) }.map_err(|e| CaptureError::Io(e.to_string()))?;

            // SAFETY: `buf.m` was just populated by the kernel through the
            // union member matching `self.discipline`.
            let (offset, length) = match self.discipline {
                BufferDiscipline::SinglePlane => (unsafe { buf.m.offset }, buf.length as usize),
                BufferDiscipline::MultiPlane => {
                    (unsafe { planes[0].m.mem_offset }, planes[0].length as usize)
                }
            };

            let ptr = unsafe {
                nix::sys::mman::mmap(
                    None,
                    std::num::NonZeroUsize::new(length).ok_or_else(|| {
                        CaptureError::Io("kernel reported zero-length buffer".into())
                    })?,
                    nix::sys::mman::ProtFlags::PROT_READ | nix::sys::mman::ProtFlags::PROT_WRITE,
                    nix::sys::mman::MapFlags::MAP_SHARED,
                    &self.file,
                    offset as i64,
                )
            }
            .map_err(|e| CaptureError::Io(e.to_string()))?;

            buffers.push(MappedBuffer {
                ptr: ptr.as_ptr() as *mut u8,
                length,
                state: BufferState::OwnedByConsumer,
                bytesused: 0,
            });
        }
        self.buffers = buffers;
        Ok(())
    }

    fn queue_all(&mut self) -> Result<(), CaptureError> {
        for index in 0..self.buffers.len() as u32 {
            self.queue_index(index)?;
        }
        Ok(())
    }

    fn queue_index(&mut self, index: u32) -> Result<(), CaptureError> {
        let mut planes = [ioctl::v4l2_plane::default(); 1];
        let mut buf = ioctl::v4l2_buffer {
            index,
            type_: self.discipline.buf_type(),
            memory: ioctl::MEMORY_MMAP,
            ..Default::default()
        };
        if self.discipline == BufferDiscipline::MultiPlane {
            planes[0].length = self.buffers[index as usize].length as u32;
            buf.m.planes = planes.as_mut_ptr();
            buf.length = planes.len() as u32;
        }
        unsafe { ioctl::qbuf(self.fd(), &mut buf) }.map_err(|e| CaptureError::Io(e.to_string()))?;
        self.buffers[index as usize].state = BufferState::OwnedByKernel;
        Ok(())
    }

    fn stream_on(&self) -> Result<(), CaptureError> {
        let buf_type = self.discipline.buf_type();
        unsafe { ioctl::streamon(self.fd(), &buf_type) }.map_err(|e| CaptureError::Io(e.to_string()))?;
        Ok(())
    }

    /// Disables streaming, unmaps, and releases kernel buffers via an
    /// explicit zero-count request. Runs every step even if an earlier
    /// one fails.
    pub fn stop(&mut self) -> Result<(), CaptureError> {
        let buf_type = self.discipline.buf_type();
        let off_result = unsafe { ioctl::streamoff(self.fd(), &buf_type) };

        for buf in &self.buffers {
            // SAFETY: ptr/length came from a matching successful mmap.
            unsafe {
                let _ = nix::sys::mman::munmap(
                    ptr::NonNull::new_unchecked(buf.ptr as *mut core::ffi::c_void),
                    buf.length,
                );
            }
        }
        self.buffers.clear();

        // Explicit zero-count REQBUFS releases the kernel-side allocation;
        // skipping this is the most common cause of a later Busy.
        let mut req = ioctl::v4l2_requestbuffers {
            count: 0,
            type_: self.discipline.buf_type(),
            memory: ioctl::MEMORY_MMAP,
            ..Default::default()
        };
        let reqbufs_result = unsafe { ioctl::reqbufs(self.fd(), &mut req) };

        self.streaming = false;
        self.current_format = None;

        off_result.map_err(|e| CaptureError::Io(e.to_string()))?;
        reqbufs_result.map_err(|e| CaptureError::Io(e.to_string()))?;
        Ok(())
    }

    /// Waits up to `timeout` for a ready buffer, then dequeues it, returning
    /// its index. Returns `None` on timeout; `Ok(Some(index))` must be
    /// matched by exactly one later [`CaptureDevice::enqueue`] call.
    ///
    /// Deliberately returns only the index rather than an index+slice pair:
    /// a slice borrowed from `&mut self` here would keep that mutable
    /// borrow alive for as long as the caller holds the data, making the
    /// matching `enqueue` call (which also needs `&mut self`) unreachable
    /// under the borrow checker. Callers fetch the data separately via
    /// [`CaptureDevice::frame_data`], a `&self` borrow that can end before
    /// `enqueue` needs exclusive access again.
    pub fn dequeue(&mut self, timeout: Duration) -> Result<Option<u32>, CaptureError> {
        let mut poll_fd = [nix::poll::PollFd::new(
            unsafe { std::os::fd::BorrowedFd::borrow_raw(self.fd()) },
            nix::poll::PollFlags::POLLIN,
        )];
        let millis = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        let poll_timeout = nix::poll::PollTimeout::try_from(millis).unwrap_or(nix::poll::PollTimeout::MAX);
        let ready = nix::poll::poll(&mut poll_fd, poll_timeout)
            .map_err(|e| CaptureError::Io(e.to_string()))?;

        if ready == 0 {
            self.consecutive_timeouts += 1;
            return Ok(None);
        }
        self.consecutive_timeouts = 0;

        let mut planes = [ioctl::v4l2_plane::default(); 1];
        let mut buf = ioctl::v4l2_buffer {
            type_: self.discipline.buf_type(),
            memory: ioctl::MEMORY_MMAP,
            ..Default::default()
        };
        if self.discipline == BufferDiscipline::MultiPlane {
            buf.m.planes = planes.as_mut_ptr();
            buf.length = planes.len() as u32;
        }
        match unsafe { ioctl::dqbuf(self.fd(), &mut buf) } {
            Ok(_) => {}
            Err(nix::errno::Errno::EAGAIN) => return Ok(None),
            Err(e) => return Err(CaptureError::Io(e.to_string())),
        }

        let index = buf.index;
        let len = match self.discipline {
            BufferDiscipline::SinglePlane => buf.bytesused as usize,
            BufferDiscipline::MultiPlane => planes[0].bytesused as usize,
        };
        let mapped = &mut self.buffers[index as usize];
        mapped.state = BufferState::OwnedByConsumer;
        mapped.bytesused = len.min(mapped.length);

        Ok(Some(index))
    }

    /// The valid bytes of the buffer at `index` as of its last dequeue.
    /// Valid until the matching [`CaptureDevice::enqueue`] call.
    pub fn frame_data(&self, index: u32) -> &[u8] {
        let mapped = &self.buffers[index as usize];
        // SAFETY: the kernel handed this index back via DQBUF and it
        // stays valid until the caller's matching `enqueue`.
        unsafe { std::slice::from_raw_parts(mapped.ptr, mapped.bytesused) }
    }

    /// Returns `index` to the kernel. Must be called at most once per
    /// successful `dequeue`.
    pub fn enqueue(&mut self, index: u32) -> Result<(), CaptureError> {
        self.queue_index(index)
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn current_format(&self) -> Option<PixelFormat> {
        self.current_format
    }

    pub fn consecutive_timeouts(&self) -> u32 {
        self.consecutive_timeouts
    }
}

impl Drop for CaptureDevice {
    fn drop(&mut self) {
        if self.streaming {
            if let Err(e) = self.stop() {
                warn!(target: "capture", error = %e, "stop during drop failed");
            }
        }
    }
}

fn probe_discipline(fd: RawFd) -> Result<BufferDiscipline, CaptureError> {
    let mut caps = ioctl::v4l2_capability::default();
    unsafe { ioctl::querycap(fd, &mut caps) }.map_err(|e| CaptureError::Io(e.to_string()))?;

    // device_caps is populated when V4L2_CAP_DEVICE_CAPS is set; otherwise
    // capabilities already reflects this device's own caps.
    let flags = if caps.device_caps != 0 { caps.device_caps } else { caps.capabilities };

    if flags & ioctl::CAP_VIDEO_CAPTURE_MPLANE != 0 {
        Ok(BufferDiscipline::MultiPlane)
    } else if flags & ioctl::CAP_VIDEO_CAPTURE != 0 {
        Ok(BufferDiscipline::SinglePlane)
    } else {
        Err(CaptureError::Io("device advertises no capture capability".into()))
    }
}

fn cstr_to_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn libc_o_nonblock() -> i32 {
    // O_NONBLOCK, hand-written to avoid a direct libc dependency just for
    // one constant (the value is stable across Linux architectures).
    0o4000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_resolutions_cover_common_targets() {
        assert!(CANONICAL_RESOLUTIONS.contains(&(1920, 1080)));
        assert!(CANONICAL_RESOLUTIONS.contains(&(1280, 720)));
        assert!(CANONICAL_RESOLUTIONS.contains(&(640, 480)));
    }

    #[test]
    fn buffer_discipline_picks_buf_type() {
        assert_eq!(BufferDiscipline::SinglePlane.buf_type(), ioctl::BUF_TYPE_VIDEO_CAPTURE);
        assert_eq!(BufferDiscipline::MultiPlane.buf_type(), ioctl::BUF_TYPE_VIDEO_CAPTURE_MPLANE);
    }
}
