//! Instrument family detection from the `*IDN?` response.
//!
//! Typical responses:
//!
//! - `KEITHLEY INSTRUMENTS INC.,MODEL 2400,1398745,C30 ...`
//! - `Keithley Instruments Inc., Model 2602B, 4381203, 3.2.2`
//! - `KEITHLEY INSTRUMENTS,MODEL 2450,04096218,1.7.12b`

use regex::Regex;
use smu_core::{InstrumentError, InstrumentFamily};
use std::sync::LazyLock;

/// Models answering the SCPI 2400 command set.
const SCPI_MODELS: &[u16] = &[2400, 2401, 2410, 2420, 2425, 2430, 2440, 2450, 2460, 2470];

static MODEL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)model\s*(\d{4})").expect("Invalid model regex"));

/// Model number parsed from an identity string, if any.
pub fn model_number(identity: &str) -> Option<u16> {
    MODEL_REGEX
        .captures(identity)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Select the command family for `identity`.
///
/// # Errors
/// `Unsupported` when the identity does not name a Keithley 2400- or
/// 2600-series model.
pub fn detect_family(identity: &str) -> Result<InstrumentFamily, InstrumentError> {
    let unsupported =
        || InstrumentError::unsupported(format!("unrecognized instrument identity `{identity}`"));

    if !identity.to_ascii_lowercase().contains("keithley") {
        return Err(unsupported());
    }
    match model_number(identity) {
        Some(model) if SCPI_MODELS.contains(&model) => Ok(InstrumentFamily::Keithley2400),
        Some(model) if (2600..2700).contains(&model) => Ok(InstrumentFamily::Keithley2600),
        _ => Err(unsupported()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smu_core::InstrumentErrorKind;

    #[test]
    fn detects_scpi_models() {
        for idn in [
            "KEITHLEY INSTRUMENTS INC.,MODEL 2400,1398745,C30   Mar 17 2006 09:29:29/A02  /K/J",
            "KEITHLEY INSTRUMENTS,MODEL 2450,04096218,1.7.12b",
            "Keithley Instruments Inc.,Model 2410,0,C33",
        ] {
            assert_eq!(detect_family(idn).unwrap(), InstrumentFamily::Keithley2400, "{idn}");
        }
    }

    #[test]
    fn detects_tsp_models() {
        for idn in [
            "Keithley Instruments Inc., Model 2602B, 4381203, 3.2.2",
            "Keithley Instruments Inc., Model 2636A, 1234, 2.2.5",
            "KEITHLEY INSTRUMENTS,MODEL 2601,0,1.0",
        ] {
            assert_eq!(detect_family(idn).unwrap(), InstrumentFamily::Keithley2600, "{idn}");
        }
    }

    #[test]
    fn rejects_unknown_instruments() {
        for idn in [
            "Agilent Technologies,B2902A,MY0001,3.4",
            "KEITHLEY INSTRUMENTS INC.,MODEL 2000,1,A01",
            "KEITHLEY INSTRUMENTS INC.,MODEL 2490,1,A01",
            "",
        ] {
            let err = detect_family(idn).unwrap_err();
            assert_eq!(err.kind, InstrumentErrorKind::Unsupported, "{idn}");
        }
    }

    #[test]
    fn parses_model_number() {
        assert_eq!(model_number("x,MODEL 2636A,y"), Some(2636));
        assert_eq!(model_number("no model here"), None);
    }
}
