//! H.264 NAL parsing and AVCDecoderConfigurationRecord assembly
//!
//! Fallback path for encoders that leave extradata empty after open:
//! the first live keyframe is scanned for SPS/PPS and the AVC1 record
//! is built by hand before the muxer writes its header.

const NAL_TYPE_SPS: u8 = 7;
const NAL_TYPE_PPS: u8 = 8;

/// Split an Annex B byte stream into NAL unit payloads (start codes
/// stripped). Both 4-byte and 3-byte start codes are recognized.
pub fn nal_units(data: &[u8]) -> Vec<&[u8]> {
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 2 < data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            if i + 3 < data.len() && data[i + 2] == 0 && data[i + 3] == 1 {
                starts.push(i + 4);
                i += 4;
                continue;
            }
            if data[i + 2] == 1 {
                starts.push(i + 3);
                i += 3;
                continue;
            }
        }
        i += 1;
    }

    let mut units = Vec::with_capacity(starts.len());
    for (n, &start) in starts.iter().enumerate() {
        let end = if n + 1 < starts.len() {
            // back off over the next unit's start code
            let next = starts[n + 1];
            if next >= 4 && data[next - 4..next] == [0, 0, 0, 1] {
                next - 4
            } else {
                next - 3
            }
        } else {
            data.len()
        };
        if start < end {
            units.push(&data[start..end]);
        }
    }
    units
}

/// First SPS and PPS payloads in an Annex B stream
pub fn extract_sps_pps(data: &[u8]) -> (Option<&[u8]>, Option<&[u8]>) {
    let mut sps = None;
    let mut pps = None;
    for unit in nal_units(data) {
        if unit.is_empty() {
            continue;
        }
        match unit[0] & 0x1F {
            NAL_TYPE_SPS if sps.is_none() => sps = Some(unit),
            NAL_TYPE_PPS if pps.is_none() => pps = Some(unit),
            _ => {}
        }
        if sps.is_some() && pps.is_some() {
            break;
        }
    }
    (sps, pps)
}

/// Assemble an AVCDecoderConfigurationRecord from raw SPS/PPS payloads.
///
/// Layout: version, profile, compat, level, lengthSizeMinusOne (0x03,
/// 4-byte NAL length prefixes), one SPS with BE16 length, one PPS with
/// BE16 length. Profile/compat/level come from SPS bytes 1..3; a
/// malformed SPS falls back to baseline/3.1.
pub fn build_avcc(sps: &[u8], pps: &[u8]) -> Vec<u8> {
    let (profile, compat, level) = if sps.len() >= 4 {
        (sps[1], sps[2], sps[3])
    } else {
        (0x42, 0xE0, 0x1F)
    };

    let mut record = Vec::with_capacity(11 + sps.len() + pps.len());
    record.push(0x01);
    record.push(profile);
    record.push(compat);
    record.push(level);
    record.push(0x03); // lengthSizeMinusOne
    record.push(0xE1); // one SPS
    record.extend_from_slice(&(sps.len() as u16).to_be_bytes());
    record.extend_from_slice(sps);
    record.push(0x01); // one PPS
    record.extend_from_slice(&(pps.len() as u16).to_be_bytes());
    record.extend_from_slice(pps);
    record
}

/// Build the AVC1 record straight from a keyframe's Annex B payload
pub fn avcc_from_keyframe(data: &[u8]) -> Option<Vec<u8>> {
    let (sps, pps) = extract_sps_pps(data);
    match (sps, pps) {
        (Some(sps), Some(pps)) => Some(build_avcc(sps, pps)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 0x67 = SPS (type 7), 0x68 = PPS (type 8), 0x65 = IDR slice
    const SPS: [u8; 8] = [0x67, 0x64, 0x00, 0x1F, 0xAC, 0xD9, 0x40, 0x50];
    const PPS: [u8; 4] = [0x68, 0xEB, 0xE3, 0xCB];

    fn keyframe_stream() -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&[0, 0, 0, 1]);
        data.extend_from_slice(&SPS);
        data.extend_from_slice(&[0, 0, 0, 1]);
        data.extend_from_slice(&PPS);
        data.extend_from_slice(&[0, 0, 1]); // 3-byte start code
        data.extend_from_slice(&[0x65, 0x88, 0x84, 0x00]);
        data
    }

    #[test]
    fn test_nal_units_both_start_codes() {
        let data = keyframe_stream();
        let units = nal_units(&data);
        assert_eq!(units.len(), 3);
        assert_eq!(units[0], &SPS);
        assert_eq!(units[1], &PPS);
        assert_eq!(units[2][0], 0x65);
    }

    #[test]
    fn test_extract_sps_pps() {
        let data = keyframe_stream();
        let (sps, pps) = extract_sps_pps(&data);
        assert_eq!(sps, Some(&SPS[..]));
        assert_eq!(pps, Some(&PPS[..]));
    }

    #[test]
    fn test_avcc_layout() {
        let record = build_avcc(&SPS, &PPS);

        assert_eq!(record[0], 0x01);
        assert_eq!(record[1], 0x64); // profile from SPS[1]
        assert_eq!(record[2], 0x00);
        assert_eq!(record[3], 0x1F);
        assert_eq!(record[4], 0x03); // lengthSizeMinusOne
        assert_eq!(record[5], 0xE1);

        let sps_len = u16::from_be_bytes([record[6], record[7]]) as usize;
        assert_eq!(sps_len, SPS.len());
        assert_eq!(&record[8..8 + sps_len], &SPS);

        let pps_count_at = 8 + sps_len;
        assert_eq!(record[pps_count_at], 0x01);
        let pps_len =
            u16::from_be_bytes([record[pps_count_at + 1], record[pps_count_at + 2]]) as usize;
        assert_eq!(pps_len, PPS.len());
        assert_eq!(&record[pps_count_at + 3..], &PPS);
    }

    #[test]
    fn test_malformed_sps_uses_default_profile() {
        let short_sps = [0x67, 0x42];
        let record = build_avcc(&short_sps, &PPS);
        assert_eq!(record[1], 0x42);
        assert_eq!(record[2], 0xE0);
        assert_eq!(record[3], 0x1F);
        assert_eq!(record[4], 0x03);
    }

    #[test]
    fn test_avcc_from_keyframe() {
        let record = avcc_from_keyframe(&keyframe_stream()).unwrap();
        assert_eq!(record[4], 0x03);

        // stream without parameter sets yields nothing
        let slice_only = [0u8, 0, 0, 1, 0x65, 0x88];
        assert!(avcc_from_keyframe(&slice_only).is_none());
    }
}
