//! Live muxing
//!
//! ## Responsibilities
//!
//! - FLV/RTMP output for the push stream, RTP (PS or H.264) output for
//!   GB28181 sessions
//! - Header-time extradata enforcement: the container header is never
//!   written without non-empty parameter sets
//! - PushSession ties an encoder and an output together: deferred open
//!   on the first live keyframe when bootstrap extradata is empty,
//!   timestamp gating, periodic flushing

use crate::encoder::{nal, EncodedPacket, H264Encoder, TimestampGate};
use crate::error::Result;
use ffmpeg_next::{codec, encoder, format, packet, Dictionary, Packet, Rational, Rescale};
use opencv::core::Mat;

/// Flush cadence in packets, in addition to every keyframe
const FLUSH_INTERVAL: u32 = 10;

/// FLV/RTMP and RTP streams use a millisecond container clock
const MUX_TIME_BASE: Rational = Rational(1, 1000);

/// Where a push session delivers its packets
#[derive(Debug, Clone)]
pub enum PushTarget {
    Rtmp {
        url: String,
    },
    Rtp {
        dest_ip: String,
        dest_port: u16,
        /// decimal digits, ten of them for GB28181 sessions
        ssrc: String,
        /// "PS" wraps in MPEG-PS over RTP, anything else is raw H.264
        ps_mode: bool,
    },
}

impl PushTarget {
    fn url(&self) -> String {
        match self {
            Self::Rtmp { url } => url.clone(),
            Self::Rtp {
                dest_ip,
                dest_port,
                ssrc,
                ..
            } => format!("rtp://{dest_ip}:{dest_port}?ssrc={ssrc}"),
        }
    }

    fn container(&self) -> &'static str {
        match self {
            Self::Rtmp { .. } => "flv",
            Self::Rtp { ps_mode: true, .. } => "mpegts",
            Self::Rtp { ps_mode: false, .. } => "rtp",
        }
    }

    fn format_options(&self) -> Dictionary<'static> {
        let mut opts = Dictionary::new();
        if let Self::Rtmp { .. } = self {
            opts.set("tcp_nodelay", "1");
            opts.set("buffer_size", "1048576");
            // microseconds
            opts.set("rw_timeout", "30000000");
        }
        opts
    }
}

/// Open output context with one H.264 stream
struct MuxedOutput {
    octx: format::context::Output,
    stream_index: usize,
    stream_time_base: Rational,
    packets_since_flush: u32,
}

impl MuxedOutput {
    /// Opens the container and writes its header. Extradata must be
    /// non-empty; an empty record is a bootstrap fault, not something
    /// to paper over with a header the player cannot decode.
    fn open(target: &PushTarget, enc: &H264Encoder, extradata: &[u8]) -> Result<Self> {
        if extradata.is_empty() {
            return Err(crate::Error::Bootstrap(
                "refusing to write container header without parameter sets".to_string(),
            ));
        }

        let url = target.url();
        let mut octx = format::output_as(&url, target.container())?;

        let codec = encoder::find(codec::Id::H264)
            .ok_or_else(|| crate::Error::Bootstrap("H.264 codec unavailable".to_string()))?;
        let mut ost = octx.add_stream(codec)?;
        ost.set_parameters(enc.as_codec());
        ost.set_time_base(MUX_TIME_BASE);
        let stream_index = ost.index();

        set_stream_extradata(&mut ost, extradata)?;

        octx.write_header_with(target.format_options())?;

        // write_header may rewrite the stream clock
        let stream_time_base = octx
            .stream(stream_index)
            .map(|s| s.time_base())
            .unwrap_or(MUX_TIME_BASE);

        tracing::info!(
            url = %url,
            container = target.container(),
            "Mux output opened"
        );

        Ok(Self {
            octx,
            stream_index,
            stream_time_base,
            packets_since_flush: 0,
        })
    }

    fn write(&mut self, data: &[u8], pts: i64, dts: i64, keyframe: bool) -> Result<()> {
        let mut packet = Packet::copy(data);
        packet.set_stream(self.stream_index);
        packet.set_pts(Some(pts));
        packet.set_dts(Some(dts));
        if keyframe {
            packet.set_flags(packet::Flags::KEY);
        }
        packet.write_interleaved(&mut self.octx)?;

        self.packets_since_flush += 1;
        if keyframe || self.packets_since_flush >= FLUSH_INTERVAL {
            self.flush_io();
            self.packets_since_flush = 0;
        }
        Ok(())
    }

    fn flush_io(&mut self) {
        unsafe {
            let pb = (*self.octx.as_mut_ptr()).pb;
            if !pb.is_null() {
                ffmpeg_next::ffi::avio_flush(pb);
            }
        }
    }

    fn close(mut self) {
        let _ = self.octx.write_trailer();
    }
}

/// Copy parameter-set bytes onto the stream descriptor
fn set_stream_extradata(ost: &mut format::stream::StreamMut<'_>, extradata: &[u8]) -> Result<()> {
    use ffmpeg_next::ffi::{av_mallocz, AV_INPUT_BUFFER_PADDING_SIZE};

    unsafe {
        let par = (*ost.as_mut_ptr()).codecpar;
        let buf = av_mallocz(extradata.len() + AV_INPUT_BUFFER_PADDING_SIZE as usize) as *mut u8;
        if buf.is_null() {
            return Err(crate::Error::Internal(
                "extradata allocation failed".to_string(),
            ));
        }
        std::ptr::copy_nonoverlapping(extradata.as_ptr(), buf, extradata.len());
        (*par).extradata = buf;
        (*par).extradata_size = extradata.len() as i32;
    }
    Ok(())
}

/// One live push: encoder plus output, with deferred container open
/// when bootstrap extradata is unavailable
pub struct PushSession {
    encoder: H264Encoder,
    target: PushTarget,
    output: Option<MuxedOutput>,
    gate: TimestampGate,
    encoder_time_base: Rational,
}

impl PushSession {
    /// Opens the encoder and bootstraps it. When the bootstrap yields
    /// extradata the container header is written immediately; otherwise
    /// the open is deferred until the first live keyframe supplies the
    /// parameter sets.
    pub fn open(
        target: PushTarget,
        width: u32,
        height: u32,
        fps: i32,
        bitrate: Option<i64>,
    ) -> Result<Self> {
        let mut encoder = H264Encoder::new(width, height, fps, bitrate)?;
        let extradata = encoder.bootstrap()?;
        let encoder_time_base = encoder.time_base();

        let output = if extradata.is_empty() {
            tracing::warn!(
                url = %target.url(),
                "Encoder extradata empty after bootstrap, deferring container open"
            );
            None
        } else {
            Some(MuxedOutput::open(&target, &encoder, &extradata)?)
        };

        Ok(Self {
            encoder,
            target,
            output,
            gate: TimestampGate::new(),
            encoder_time_base,
        })
    }

    /// Encode and push one BGR frame
    pub fn push(&mut self, frame: &Mat) -> Result<()> {
        let fallback_pts = self.encoder.frame_index();
        let packets = self.encoder.encode(frame)?;
        for packet in packets {
            self.forward(packet, fallback_pts)?;
        }
        Ok(())
    }

    fn forward(&mut self, packet: EncodedPacket, fallback_pts: i64) -> Result<()> {
        if self.output.is_none() {
            // deferred open: scan the first live keyframe for SPS/PPS
            if !packet.keyframe {
                return Ok(());
            }
            let avcc = nal::avcc_from_keyframe(&packet.data).ok_or_else(|| {
                crate::Error::Bootstrap(
                    "keyframe carries no SPS/PPS, cannot open container".to_string(),
                )
            })?;
            self.output = Some(MuxedOutput::open(&self.target, &self.encoder, &avcc)?);
        }

        let output = match self.output.as_mut() {
            Some(o) => o,
            None => return Ok(()),
        };

        let pts = packet.pts.unwrap_or(fallback_pts);
        let dts = packet.dts.unwrap_or(pts);
        let pts = pts.rescale(self.encoder_time_base, output.stream_time_base);
        let dts = dts.rescale(self.encoder_time_base, output.stream_time_base);

        if let Some((pts, dts)) = self.gate.admit(pts, dts, packet.keyframe) {
            output.write(&packet.data, pts, dts, packet.keyframe)?;
        }
        Ok(())
    }

    /// Whether the container header has been written
    pub fn connected(&self) -> bool {
        self.output.is_some()
    }

    /// Write the trailer and drop the output
    pub fn close(mut self) {
        if let Some(output) = self.output.take() {
            output.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rtp_target_url_carries_ssrc() {
        let target = PushTarget::Rtp {
            dest_ip: "192.168.1.50".to_string(),
            dest_port: 30000,
            ssrc: "0200000132".to_string(),
            ps_mode: true,
        };
        assert_eq!(target.url(), "rtp://192.168.1.50:30000?ssrc=0200000132");
        assert_eq!(target.container(), "mpegts");
    }

    #[test]
    fn test_rtp_h264_uses_raw_rtp_container() {
        let target = PushTarget::Rtp {
            dest_ip: "10.0.0.1".to_string(),
            dest_port: 30100,
            ssrc: "1".to_string(),
            ps_mode: false,
        };
        assert_eq!(target.container(), "rtp");
    }

    #[test]
    fn test_rtmp_target() {
        let target = PushTarget::Rtmp {
            url: "rtmp://media/live/ch1".to_string(),
        };
        assert_eq!(target.url(), "rtmp://media/live/ch1");
        assert_eq!(target.container(), "flv");
    }
}
