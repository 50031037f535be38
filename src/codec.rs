// src/codec.rs
//
// Voltage <-> DAC code conversion for the SP1060.
//
// The instrument represents an output voltage as an unsigned 24-bit code:
//   code = (Vout + 10) * 838860.75      (truncated)
//   Vout = code / 838860.75 - 10        (rounded to 1 uV)
// Codes travel on the wire as upper-case hexadecimal without prefix.

use crate::error::{DacError, Result};

/// Codes per volt (2^23 / 10).
pub const CODES_PER_VOLT: f64 = 838_860.75;

/// Offset added before scaling, so that -10 V maps to code 0.
pub const VOLTAGE_OFFSET: f64 = 10.0;

/// Largest code the 24-bit DAC accepts (+10 V).
pub const MAX_CODE: u32 = 0x00FF_FFFF;

/// Stateless converter shared by channels and the device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DacCodec;

impl DacCodec {
    /// Convert a voltage to its DAC code.
    ///
    /// Non-finite values and values whose code would fall outside `0..=MAX_CODE`
    /// are rejected instead of being saturated.
    pub fn encode(&self, volts: f64) -> Result<u32> {
        if !volts.is_finite() {
            return Err(DacError::Conversion(volts));
        }
        let scaled = (volts + VOLTAGE_OFFSET) * CODES_PER_VOLT;
        if scaled < 0.0 || scaled.trunc() > MAX_CODE as f64 {
            return Err(DacError::Conversion(volts));
        }
        Ok(scaled.trunc() as u32)
    }

    /// Parse a hexadecimal code as reported by the device (surrounding whitespace allowed).
    pub fn decode(&self, raw: &str) -> Result<f64> {
        let digits = raw.trim();
        let code = u32::from_str_radix(digits, 16).map_err(|_| {
            DacError::protocol("codec", format!("invalid DAC code: {:?}", raw))
        })?;
        if code > MAX_CODE {
            return Err(DacError::protocol(
                "codec",
                format!("DAC code {:X} exceeds 24 bits", code),
            ));
        }
        Ok(self.code_to_volts(code))
    }

    /// Inverse of `encode`, rounded to 6 decimal places.
    pub fn code_to_volts(&self, code: u32) -> f64 {
        let volts = code as f64 / CODES_PER_VOLT - VOLTAGE_OFFSET;
        (volts * 1e6).round() / 1e6
    }

    /// Wire form of a code: upper-case hex, no padding.
    pub fn format_code(&self, code: u32) -> String {
        format!("{:X}", code)
    }

    /// Encode and format in one go.
    pub fn encode_hex(&self, volts: f64) -> Result<String> {
        self.encode(volts).map(|code| self.format_code(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_endpoints() {
        let codec = DacCodec;
        assert_eq!(codec.encode(-10.0).unwrap(), 0);
        assert_eq!(codec.encode(10.0).unwrap(), 16_777_215);
        assert_eq!(codec.encode(0.0).unwrap(), 8_388_607);
    }

    #[test]
    fn test_encode_truncates() {
        // (1.0 + 10) * 838860.75 = 9227468.25
        assert_eq!(DacCodec.encode(1.0).unwrap(), 9_227_468);
        // (-9.9999999 + 10) * 838860.75 = 0.0838..., truncates to 0
        assert_eq!(DacCodec.encode(-9.9999999).unwrap(), 0);
    }

    #[test]
    fn test_encode_rejects_non_numeric() {
        assert!(matches!(DacCodec.encode(f64::NAN), Err(DacError::Conversion(_))));
        assert!(matches!(
            DacCodec.encode(f64::INFINITY),
            Err(DacError::Conversion(_))
        ));
    }

    #[test]
    fn test_encode_rejects_out_of_span() {
        assert!(DacCodec.encode(-10.1).is_err());
        assert!(DacCodec.encode(10.000_01).is_err());
    }

    #[test]
    fn test_decode() {
        let codec = DacCodec;
        assert_eq!(codec.decode("0").unwrap(), -10.0);
        assert_eq!(codec.decode("FFFFFF").unwrap(), 10.0);
        // Mid-scale sits half a code off zero, which rounds to -1 uV.
        assert_eq!(codec.decode("  7fffff\r\n").unwrap(), -0.000001);
        assert_eq!(codec.decode("800000").unwrap(), 0.000001);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(DacCodec.decode("XYZ"), Err(DacError::Protocol { .. })));
        assert!(matches!(DacCodec.decode(""), Err(DacError::Protocol { .. })));
        assert!(matches!(DacCodec.decode("1000000"), Err(DacError::Protocol { .. })));
    }

    #[test]
    fn test_format_code() {
        assert_eq!(DacCodec.format_code(0xFFFFFF), "FFFFFF");
        assert_eq!(DacCodec.format_code(0xAB), "AB");
        assert_eq!(DacCodec.encode_hex(10.0).unwrap(), "FFFFFF");
    }

    #[test]
    fn test_round_trip_within_one_microvolt() {
        let codec = DacCodec;
        // Every 997th microvolt across the full span, plus both ends.
        let mut micro: i64 = -10_000_000;
        while micro <= 10_000_000 {
            let v = micro as f64 / 1e6;
            let back = codec.decode(&codec.encode_hex(v).unwrap()).unwrap();
            assert!(
                (back - v).abs() <= 1e-6 + 1e-9,
                "round trip of {} gave {}",
                v,
                back
            );
            micro += 997;
        }
        let back = codec.decode(&codec.encode_hex(10.0).unwrap()).unwrap();
        assert_eq!(back, 10.0);
    }
}
