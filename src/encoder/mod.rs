//! H.264 encoding
//!
//! ## Responsibilities
//!
//! - BGR frames in, encoded packets out, suitable for a live muxer
//! - Extradata bootstrap: a synthetic neutral frame is fed and drained
//!   after open so SPS/PPS exist before the first real packet. The
//!   encoder is never flushed with a null frame mid-session; that puts
//!   libx264 in EOF mode and it refuses further input.
//! - NAL-scan fallback and timestamp discipline live in submodules

pub mod nal;
mod timestamps;

pub use timestamps::TimestampGate;

use crate::error::Result;
use ffmpeg_next::software::scaling;
use ffmpeg_next::{codec, encoder, format::Pixel, frame, Dictionary, Packet, Rational};
use opencv::core::Mat;
use opencv::prelude::*;

/// Owned encoded packet handed to the muxer
#[derive(Debug, Clone)]
pub struct EncodedPacket {
    pub data: Vec<u8>,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub keyframe: bool,
}

/// Software (or h264_bm hardware, when present) H.264 encoder
pub struct H264Encoder {
    encoder: encoder::video::Encoder,
    scaler: scaling::Context,
    width: u32,
    height: u32,
    fps: i32,
    frame_index: i64,
}

impl H264Encoder {
    pub fn new(width: u32, height: u32, fps: i32, bitrate: Option<i64>) -> Result<Self> {
        let codec = encoder::find_by_name("h264_bm")
            .or_else(|| encoder::find(codec::Id::H264))
            .ok_or_else(|| crate::Error::Bootstrap("no H.264 encoder available".to_string()))?;

        let mut enc = codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()?;

        let bitrate = bitrate.unwrap_or_else(|| default_bitrate(width, height, fps));

        enc.set_width(width);
        enc.set_height(height);
        enc.set_format(Pixel::YUV420P);
        enc.set_time_base(Rational(1, fps));
        enc.set_frame_rate(Some(Rational(fps, 1)));
        enc.set_gop(fps as u32);
        enc.set_max_b_frames(0);
        enc.set_bit_rate(bitrate as usize);
        enc.set_flags(codec::Flags::GLOBAL_HEADER);

        let mut opts = Dictionary::new();
        opts.set("preset", "ultrafast");
        opts.set("tune", "zerolatency");
        opts.set("profile", "baseline");
        opts.set("x264-params", "repeat_headers=1");

        let encoder = enc.open_with(opts)?;

        let scaler = scaling::Context::get(
            Pixel::BGR24,
            width,
            height,
            Pixel::YUV420P,
            width,
            height,
            scaling::Flags::BILINEAR,
        )?;

        tracing::info!(width, height, fps, bitrate, "H.264 encoder opened");

        Ok(Self {
            encoder,
            scaler,
            width,
            height,
            fps,
            frame_index: 0,
        })
    }

    /// Encoder time base (1/fps)
    pub fn time_base(&self) -> Rational {
        Rational(1, self.fps)
    }

    /// Feed one synthetic neutral frame and drain every packet it
    /// produces without forwarding them. Returns the extradata the
    /// library exposes afterwards; may still be empty.
    pub fn bootstrap(&mut self) -> Result<Vec<u8>> {
        let mut neutral = frame::Video::new(Pixel::YUV420P, self.width, self.height);
        // black: luma 0, chroma at midpoint
        neutral.data_mut(0).fill(0);
        neutral.data_mut(1).fill(128);
        neutral.data_mut(2).fill(128);
        neutral.set_pts(Some(self.frame_index));
        self.frame_index += 1;

        self.encoder.send_frame(&neutral)?;
        let drained = self.drain()?;
        tracing::debug!(packets = drained.len(), "Bootstrap frame drained");

        Ok(self.extradata())
    }

    /// Encode one BGR frame; pts is an internal 1-per-frame counter
    pub fn encode(&mut self, bgr: &Mat) -> Result<Vec<EncodedPacket>> {
        if bgr.cols() as u32 != self.width || bgr.rows() as u32 != self.height {
            return Err(crate::Error::Codec(format!(
                "frame {}x{} does not match encoder {}x{}",
                bgr.cols(),
                bgr.rows(),
                self.width,
                self.height
            )));
        }

        let mut input = frame::Video::new(Pixel::BGR24, self.width, self.height);
        copy_bgr_mat(bgr, &mut input)?;

        let mut yuv = frame::Video::empty();
        self.scaler.run(&input, &mut yuv)?;
        yuv.set_pts(Some(self.frame_index));
        self.frame_index += 1;

        self.encoder.send_frame(&yuv)?;
        self.drain()
    }

    fn drain(&mut self) -> Result<Vec<EncodedPacket>> {
        let mut packets = Vec::new();
        let mut packet = Packet::empty();
        loop {
            match self.encoder.receive_packet(&mut packet) {
                Ok(()) => {
                    let data = packet.data().map(<[u8]>::to_vec).unwrap_or_default();
                    packets.push(EncodedPacket {
                        data,
                        pts: packet.pts(),
                        dts: packet.dts(),
                        keyframe: packet.is_key(),
                    });
                }
                Err(ffmpeg_next::Error::Other { errno })
                    if errno == ffmpeg_next::util::error::EAGAIN =>
                {
                    break
                }
                Err(ffmpeg_next::Error::Eof) => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(packets)
    }

    /// Parameter-set bytes the library has populated, if any
    pub fn extradata(&self) -> Vec<u8> {
        unsafe {
            let ctx = self.encoder.as_ptr();
            let ptr = (*ctx).extradata;
            let size = (*ctx).extradata_size;
            if ptr.is_null() || size <= 0 {
                Vec::new()
            } else {
                std::slice::from_raw_parts(ptr, size as usize).to_vec()
            }
        }
    }

    /// The most recent frame counter value, used to fill missing PTS
    pub fn frame_index(&self) -> i64 {
        self.frame_index
    }

    /// Borrow the opened encoder (stream parameter copy at mux open)
    pub fn as_codec(&self) -> &encoder::video::Encoder {
        &self.encoder
    }
}

/// Resolution-derived default when no bitrate is configured
pub fn default_bitrate(width: u32, height: u32, fps: i32) -> i64 {
    width as i64 * height as i64 * fps as i64 / 10
}

/// Copy a BGR Mat into a BGR24 video frame, honoring the frame stride
fn copy_bgr_mat(mat: &Mat, frame: &mut frame::Video) -> Result<()> {
    let rows = mat.rows() as usize;
    let row_bytes = mat.cols() as usize * 3;
    let src = mat.data_bytes()?;
    let src_step = mat.mat_step().get(0);
    let dst_stride = frame.stride(0);
    let dst = frame.data_mut(0);

    for y in 0..rows {
        let s = &src[y * src_step..y * src_step + row_bytes];
        let d = &mut dst[y * dst_stride..y * dst_stride + row_bytes];
        d.copy_from_slice(s);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_bitrate_formula() {
        assert_eq!(default_bitrate(1920, 1080, 25), 1920 * 1080 * 25 / 10);
        assert_eq!(default_bitrate(1280, 720, 30), 2_764_800);
    }
}
