//! Frame decoder for the device's text line protocol
//!
//! The device reports one record per line as `<angle>,<duty>,<timer>` and
//! ends a run with a line carrying the `Fim` token and no separator.
//! The firmware terminates records with a trailing comma (`"1.0,30.0,5,\n"`),
//! so three fields followed by one empty field are accepted as well.
//!
//! Decoding is stateless: each call sees exactly one line, and line
//! reassembly is the transport's job.

use crate::error::LineParseError;
use crate::types::Sample;

/// Field separator used by the wire format
pub const FIELD_SEPARATOR: char = ',';

/// Token the device sends when a run finishes
pub const END_OF_RUN_TOKEN: &str = "Fim";

/// Result of decoding one line
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    /// A complete sample
    Sample(Sample),
    /// The device's end-of-run marker
    EndOfRun,
    /// The line was discarded
    ParseFailure(LineParseError),
}

impl LineOutcome {
    /// Get the sample if this outcome carries one
    pub fn sample(&self) -> Option<&Sample> {
        match self {
            LineOutcome::Sample(s) => Some(s),
            _ => None,
        }
    }
}

/// Decode one raw line (with or without its trailing newline)
pub fn decode(raw: &[u8]) -> LineOutcome {
    let Ok(text) = std::str::from_utf8(raw) else {
        return LineOutcome::ParseFailure(LineParseError::InvalidUtf8);
    };
    decode_str(text)
}

/// Decode one line of text
pub fn decode_str(text: &str) -> LineOutcome {
    let line = text.trim_end_matches(['\n', '\r']);

    if !line.contains(FIELD_SEPARATOR) {
        if line.contains(END_OF_RUN_TOKEN) {
            return LineOutcome::EndOfRun;
        }
        return LineOutcome::ParseFailure(LineParseError::MissingSeparator);
    }

    match parse_fields(line) {
        Ok(sample) => LineOutcome::Sample(sample),
        Err(e) => LineOutcome::ParseFailure(e),
    }
}

fn parse_fields(line: &str) -> Result<Sample, LineParseError> {
    let mut fields: Vec<&str> = line.split(FIELD_SEPARATOR).map(str::trim).collect();

    // Firmware trailer: "a,b,t,"
    if fields.len() == 4 && fields[3].is_empty() {
        fields.pop();
    }
    if fields.len() != 3 {
        return Err(LineParseError::FieldCount {
            found: fields.len(),
        });
    }

    let angle = parse_float("angle", fields[0])?;
    let duty = parse_float("duty", fields[1])?;
    let timer = fields[2]
        .parse::<u64>()
        .map_err(|_| LineParseError::InvalidInteger {
            value: fields[2].to_string(),
        })?;

    Ok(Sample::new(angle, duty, timer))
}

fn parse_float(field: &'static str, value: &str) -> Result<f64, LineParseError> {
    let parsed = value
        .parse::<f64>()
        .map_err(|_| LineParseError::InvalidFloat {
            field,
            value: value.to_string(),
        })?;
    if !parsed.is_finite() {
        return Err(LineParseError::NonFinite { field });
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_valid_line() {
        assert_eq!(
            decode(b"10.5,21.0,50\n"),
            LineOutcome::Sample(Sample::new(10.5, 21.0, 50))
        );
    }

    #[test]
    fn test_decode_firmware_trailing_comma() {
        assert_eq!(
            decode(b"-3.6000,30.0000,1234,\r\n"),
            LineOutcome::Sample(Sample::new(-3.6, 30.0, 1234))
        );
    }

    #[test]
    fn test_decode_end_of_run() {
        assert_eq!(decode(b"Fim\n"), LineOutcome::EndOfRun);
        // ESP log formatting around the token
        assert_eq!(decode(b"I (20345) encoder: Fim\r\n"), LineOutcome::EndOfRun);
    }

    #[test]
    fn test_decode_line_without_separator_is_ignorable() {
        assert_eq!(
            decode(b"bad-line\n"),
            LineOutcome::ParseFailure(LineParseError::MissingSeparator)
        );
        assert_eq!(
            decode(b"\n"),
            LineOutcome::ParseFailure(LineParseError::MissingSeparator)
        );
    }

    #[test]
    fn test_separator_wins_over_end_token() {
        // A line containing a separator is a sample candidate even if it mentions the token
        assert_eq!(
            decode(b"Fim,1,2\n"),
            LineOutcome::ParseFailure(LineParseError::InvalidFloat {
                field: "angle",
                value: "Fim".to_string(),
            })
        );
    }

    #[test]
    fn test_decode_wrong_arity() {
        assert_eq!(
            decode(b"1.0,2.0\n"),
            LineOutcome::ParseFailure(LineParseError::FieldCount { found: 2 })
        );
        assert_eq!(
            decode(b"1.0,2.0,3,4\n"),
            LineOutcome::ParseFailure(LineParseError::FieldCount { found: 4 })
        );
        assert_eq!(
            decode(b"1.0,2.0,3,,\n"),
            LineOutcome::ParseFailure(LineParseError::FieldCount { found: 5 })
        );
    }

    #[test]
    fn test_decode_non_numeric_fields() {
        assert!(matches!(
            decode(b"1.0,abc,3\n"),
            LineOutcome::ParseFailure(LineParseError::InvalidFloat { field: "duty", .. })
        ));
        assert!(matches!(
            decode(b"1.0,2.0,3.5\n"),
            LineOutcome::ParseFailure(LineParseError::InvalidInteger { .. })
        ));
        assert!(matches!(
            decode(b"1.0,2.0,-5\n"),
            LineOutcome::ParseFailure(LineParseError::InvalidInteger { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_non_finite() {
        assert_eq!(
            decode(b"NaN,2.0,3\n"),
            LineOutcome::ParseFailure(LineParseError::NonFinite { field: "angle" })
        );
        assert_eq!(
            decode(b"1.0,inf,3\n"),
            LineOutcome::ParseFailure(LineParseError::NonFinite { field: "duty" })
        );
    }

    #[test]
    fn test_decode_invalid_utf8() {
        assert_eq!(
            decode(&[0xff, 0xfe, b',', b'\n']),
            LineOutcome::ParseFailure(LineParseError::InvalidUtf8)
        );
    }

    #[test]
    fn test_outcome_sample_accessor() {
        let outcome = decode_str("1,2,3");
        assert_eq!(outcome.sample(), Some(&Sample::new(1.0, 2.0, 3)));
        assert_eq!(LineOutcome::EndOfRun.sample(), None);
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_valid_triples_always_decode(
            angle in -1.0e6f64..1.0e6,
            duty in 0.0f64..100.0,
            timer in 0u64..10_000_000,
        ) {
            let line = format!("{:.4},{:.4},{}\n", angle, duty, timer);
            let outcome = decode(line.as_bytes());
            let sample = outcome.sample().copied();
            prop_assert!(sample.is_some(), "line {:?} did not decode", line);
            let sample = sample.unwrap();
            prop_assert_eq!(sample.timer, timer);
            prop_assert!((sample.angle - angle).abs() < 1e-3);
            prop_assert!((sample.duty - duty).abs() < 1e-3);
        }

        #[test]
        fn test_wrong_arity_never_yields_sample(
            fields in prop::collection::vec("[0-9]{1,4}", 1..8usize)
        ) {
            prop_assume!(fields.len() != 3);
            let line = fields.join(",");
            prop_assert!(decode_str(&line).sample().is_none());
        }

        #[test]
        fn test_garbage_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
            let _ = decode(&bytes);
        }
    }
}
