//! Mono 16-bit little-endian PCM helpers.

/// Bytes per sample of the only format the pipeline carries
pub const BYTES_PER_SAMPLE: usize = 2;

/// One silent sample, fed when a flush produced no audio so that its
/// completion callback still fires
pub const SILENT_SENTINEL: [u8; BYTES_PER_SAMPLE] = [0, 0];

/// Decode little-endian i16 samples. A trailing odd byte is ignored.
#[must_use]
pub fn decode(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Encode samples as little-endian bytes
#[must_use]
pub fn encode(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

/// Round and saturate a floating point sample into the i16 range
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn quantize(value: f64) -> i16 {
    value.round().clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_ignores_trailing_byte() {
        let samples = decode(&[0x01, 0x00, 0xff, 0x7f, 0x42]);
        assert_eq!(samples, vec![1, i16::MAX]);
    }

    #[test]
    fn test_encode_little_endian() {
        assert_eq!(encode(&[-2, 256]), vec![0xfe, 0xff, 0x00, 0x01]);
    }

    #[test]
    fn test_quantize_saturates() {
        assert_eq!(quantize(40_000.0), i16::MAX);
        assert_eq!(quantize(-40_000.0), i16::MIN);
        assert_eq!(quantize(12.4), 12);
        assert_eq!(quantize(f64::NAN), 0);
    }
}
