//! Raw V4L2 ioctl surface: capability query, format/framesize/frameinterval
//! enumeration, buffer request/query, queue/dequeue, stream on/off.
//!
//! The kernel ABI structs below are the subset of `linux/videodev2.h`
//! this bridge touches, mirrored field-for-field (including the union
//! members' real pointer-sized layout) so the sizes `ioctl_readwrite!`
//! bakes into each `_IOWR` command number match the kernel's. Both the
//! single-plane (`v4l2_buffer`/`v4l2_format` with an embedded `pix`) and
//! multi-plane (`pix_mp` + an out-of-line `v4l2_plane` array reached via
//! `v4l2_buffer_m::planes`) layouts are modeled; [`super::BufferDiscipline`]
//! picks one per device at `open` time and every later call goes through
//! that discipline.

#![allow(non_camel_case_types)]

use nix::{ioctl_readwrite, ioctl_write_ptr};
use std::os::unix::io::RawFd;

pub const VIDIOC_MAGIC: u8 = b'V';

pub const BUF_TYPE_VIDEO_CAPTURE: u32 = 1;
pub const BUF_TYPE_VIDEO_CAPTURE_MPLANE: u32 = 9;

pub const MEMORY_MMAP: u32 = 1;

pub const FIELD_NONE: u32 = 1;

/// `V4L2_CAP_VIDEO_CAPTURE`
pub const CAP_VIDEO_CAPTURE: u32 = 0x0000_0001;
/// `V4L2_CAP_VIDEO_CAPTURE_MPLANE`
pub const CAP_VIDEO_CAPTURE_MPLANE: u32 = 0x0000_1000;

pub const FRMSIZE_TYPE_DISCRETE: u32 = 1;
pub const FRMSIZE_TYPE_CONTINUOUS: u32 = 2;
pub const FRMSIZE_TYPE_STEPWISE: u32 = 3;

pub const FRMIVAL_TYPE_DISCRETE: u32 = 1;
pub const FRMIVAL_TYPE_CONTINUOUS: u32 = 2;
pub const FRMIVAL_TYPE_STEPWISE: u32 = 3;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_capability {
    pub driver: [u8; 16],
    pub card: [u8; 32],
    pub bus_info: [u8; 32],
    pub version: u32,
    pub capabilities: u32,
    pub device_caps: u32,
    pub reserved: [u32; 3],
}

impl Default for v4l2_capability {
    fn default() -> Self {
        // SAFETY: an all-zero v4l2_capability is a valid bit pattern.
        unsafe { std::mem::zeroed() }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct v4l2_pix_format {
    pub width: u32,
    pub height: u32,
    pub pixelformat: u32,
    pub field: u32,
    pub bytesperline: u32,
    pub sizeimage: u32,
    pub colorspace: u32,
    pub priv_: u32,
    pub flags: u32,
    pub ycbcr_enc: u32,
    pub quantization: u32,
    pub xfer_func: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct v4l2_plane_pix_format {
    pub sizeimage: u32,
    pub bytesperline: u32,
    pub reserved: [u16; 6],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_pix_format_mplane {
    pub width: u32,
    pub height: u32,
    pub pixelformat: u32,
    pub field: u32,
    pub colorspace: u32,
    pub plane_fmt: [v4l2_plane_pix_format; 8],
    pub num_planes: u8,
    pub flags: u8,
    pub ycbcr_enc: u8,
    pub quantization: u8,
    pub xfer_func: u8,
    pub reserved: [u8; 7],
}

impl Default for v4l2_pix_format_mplane {
    fn default() -> Self {
        // SAFETY: all-zero is valid for this struct.
        unsafe { std::mem::zeroed() }
    }
}

/// `v4l2_format` with only the two union members this bridge uses.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_format {
    pub type_: u32,
    pub fmt: FormatUnion,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union FormatUnion {
    pub pix: v4l2_pix_format,
    pub pix_mp: v4l2_pix_format_mplane,
    pub raw_data: [u8; 200],
}

impl Default for v4l2_format {
    fn default() -> Self {
        Self {
            type_: 0,
            fmt: FormatUnion { raw_data: [0u8; 200] },
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct v4l2_fmtdesc {
    pub index: u32,
    pub type_: u32,
    pub flags: u32,
    pub description: [u8; 32],
    pub pixelformat: u32,
    pub mbus_code: u32,
    pub reserved: [u32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct v4l2_frmsize_discrete {
    pub width: u32,
    pub height: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct v4l2_frmsize_stepwise {
    pub min_width: u32,
    pub min_height: u32,
    pub max_width: u32,
    pub max_height: u32,
    pub step_width: u32,
    pub step_height: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_frmsizeenum {
    pub index: u32,
    pub pixel_format: u32,
    pub type_: u32,
    pub union_data: [u32; 6],
    pub reserved: [u32; 2],
}

impl Default for v4l2_frmsizeenum {
    fn default() -> Self {
        // SAFETY: all-zero is valid.
        unsafe { std::mem::zeroed() }
    }
}

impl v4l2_frmsizeenum {
    pub fn discrete(&self) -> v4l2_frmsize_discrete {
        v4l2_frmsize_discrete { width: self.union_data[0], height: self.union_data[1] }
    }

    pub fn stepwise(&self) -> v4l2_frmsize_stepwise {
        v4l2_frmsize_stepwise {
            min_width: self.union_data[0],
            min_height: self.union_data[1],
            max_width: self.union_data[2],
            max_height: self.union_data[3],
            step_width: self.union_data[4],
            step_height: self.union_data[5],
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_frmivalenum {
    pub index: u32,
    pub pixel_format: u32,
    pub width: u32,
    pub height: u32,
    pub type_: u32,
    pub union_data: [u32; 4],
    pub reserved: [u32; 2],
}

impl Default for v4l2_frmivalenum {
    fn default() -> Self {
        // SAFETY: all-zero is valid.
        unsafe { std::mem::zeroed() }
    }
}

impl v4l2_frmivalenum {
    /// Discrete interval as `(numerator, denominator)`, e.g. `(1, 30)` for 30fps.
    pub fn discrete(&self) -> (u32, u32) {
        (self.union_data[0], self.union_data[1])
    }
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct v4l2_fract {
    pub numerator: u32,
    pub denominator: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct v4l2_captureparm {
    pub capability: u32,
    pub capturemode: u32,
    pub timeperframe: v4l2_fract,
    pub extendedmode: u32,
    pub readbuffers: u32,
    pub reserved: [u32; 4],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_streamparm {
    pub type_: u32,
    pub parm: ParmUnion,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union ParmUnion {
    pub capture: v4l2_captureparm,
    pub raw_data: [u8; 200],
}

impl Default for v4l2_streamparm {
    fn default() -> Self {
        Self { type_: 0, parm: ParmUnion { raw_data: [0u8; 200] } }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct v4l2_requestbuffers {
    pub count: u32,
    pub type_: u32,
    pub memory: u32,
    pub capabilities: u32,
    pub flags: u8,
    pub reserved: [u8; 3],
}

/// `v4l2_timecode`. Sits between `timestamp` and `sequence` in the real
/// `v4l2_buffer` ABI (videodev2.h) — 16 bytes, not part of any union.
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct v4l2_timecode {
    pub type_: u32,
    pub flags: u32,
    pub frames: u8,
    pub seconds: u8,
    pub minutes: u8,
    pub hours: u8,
    pub userbits: [u8; 4],
}

/// `v4l2_plane`'s own `m` union: `{ mem_offset: __u32, userptr: unsigned
/// long, fd: __s32 }`, pointer-sized (8 bytes on 64-bit) via `userptr`.
#[repr(C)]
#[derive(Clone, Copy)]
pub union v4l2_plane_m {
    pub mem_offset: u32,
    pub userptr: usize,
    pub fd: i32,
}

impl Default for v4l2_plane_m {
    fn default() -> Self {
        // SAFETY: all-zero is a valid bit pattern for every member.
        unsafe { std::mem::zeroed() }
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_plane {
    pub bytesused: u32,
    pub length: u32,
    pub m: v4l2_plane_m,
    pub data_offset: u32,
    pub reserved: [u32; 11],
}

impl Default for v4l2_plane {
    fn default() -> Self {
        // SAFETY: all-zero is a valid v4l2_plane.
        unsafe { std::mem::zeroed() }
    }
}

/// `v4l2_buffer`'s `m` union: `{ offset: __u32, userptr: unsigned long,
/// planes: struct v4l2_plane *, fd: __s32 }`, pointer-sized (8 bytes on
/// 64-bit) because of the `planes`/`userptr` members. For multi-plane
/// capture this genuinely holds a pointer to an out-of-line
/// `[v4l2_plane]` array the caller owns for the duration of the ioctl —
/// it is not an inline array embedded in `v4l2_buffer` itself.
#[repr(C)]
#[derive(Clone, Copy)]
pub union v4l2_buffer_m {
    pub offset: u32,
    pub userptr: usize,
    pub planes: *mut v4l2_plane,
    pub fd: i32,
}

impl Default for v4l2_buffer_m {
    fn default() -> Self {
        // SAFETY: all-zero is a valid bit pattern for every member.
        unsafe { std::mem::zeroed() }
    }
}

/// `v4l2_buffer` with the mmap-memory union member only (this bridge never
/// uses `USERPTR`/`DMABUF`). Field order and types mirror videodev2.h
/// field-for-field, including `timecode` and the pointer-sized `m` union,
/// so `size_of::<v4l2_buffer>()` — baked into the `VIDIOC_{QUERY,Q,DQ}BUF`
/// command numbers by `ioctl_readwrite!` — matches what the kernel expects.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_buffer {
    pub index: u32,
    pub type_: u32,
    pub bytesused: u32,
    pub flags: u32,
    pub field: u32,
    pub timestamp_sec: i64,
    pub timestamp_usec: i64,
    pub timecode: v4l2_timecode,
    pub sequence: u32,
    pub memory: u32,
    pub m: v4l2_buffer_m,
    pub length: u32,
    pub reserved2: u32,
    /// Anonymous union in the kernel header (`request_fd`/`reserved`,
    /// both 4 bytes); unused by this bridge, kept only for layout parity.
    pub request_fd: i32,
}

impl Default for v4l2_buffer {
    fn default() -> Self {
        // SAFETY: all-zero is a valid v4l2_buffer.
        unsafe { std::mem::zeroed() }
    }
}

ioctl_readwrite!(querycap, VIDIOC_MAGIC, 0, v4l2_capability);
ioctl_readwrite!(enum_fmt, VIDIOC_MAGIC, 2, v4l2_fmtdesc);
ioctl_readwrite!(g_fmt, VIDIOC_MAGIC, 4, v4l2_format);
ioctl_readwrite!(s_fmt, VIDIOC_MAGIC, 5, v4l2_format);
ioctl_readwrite!(reqbufs, VIDIOC_MAGIC, 8, v4l2_requestbuffers);
ioctl_readwrite!(querybuf, VIDIOC_MAGIC, 9, v4l2_buffer);
ioctl_readwrite!(qbuf, VIDIOC_MAGIC, 15, v4l2_buffer);
ioctl_readwrite!(dqbuf, VIDIOC_MAGIC, 17, v4l2_buffer);
ioctl_write_ptr!(streamon, VIDIOC_MAGIC, 18, u32);
ioctl_write_ptr!(streamoff, VIDIOC_MAGIC, 19, u32);
ioctl_readwrite!(enum_framesizes, VIDIOC_MAGIC, 74, v4l2_frmsizeenum);
ioctl_readwrite!(enum_frameintervals, VIDIOC_MAGIC, 75, v4l2_frmivalenum);
ioctl_readwrite!(g_parm, VIDIOC_MAGIC, 21, v4l2_streamparm);
ioctl_readwrite!(s_parm, VIDIOC_MAGIC, 22, v4l2_streamparm);

/// Wraps one ioctl call, mapping `EAGAIN`/`EWOULDBLOCK` to `Ok(None)` so
/// callers can distinguish "try again" from a hard failure.
pub fn retry_on_eagain<T>(
    result: nix::Result<T>,
) -> Result<Option<T>, nix::errno::Errno> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(nix::errno::Errno::EAGAIN) => Ok(None),
        Err(e) => Err(e),
    }
}

pub fn raw_fd_of(file: &std::fs::File) -> RawFd {
    use std::os::unix::io::AsRawFd;
    file.as_raw_fd()
}
