use crate::error::ExportError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// GGUF quantization levels accepted by the quantizer.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum QuantizationLevel {
    #[default]
    Q4_K_M,
    Q5_K_M,
    Q8_0,
}

impl QuantizationLevel {
    pub const ALL: [Self; 3] = [Self::Q4_K_M, Self::Q5_K_M, Self::Q8_0];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Q4_K_M => "Q4_K_M",
            Self::Q5_K_M => "Q5_K_M",
            Self::Q8_0 => "Q8_0",
        }
    }
}

impl fmt::Display for QuantizationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuantizationLevel {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim();
        Self::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(token))
            .ok_or_else(|| ExportError::InvalidLevel(token.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_levels() {
        assert_eq!("Q4_K_M".parse::<QuantizationLevel>().unwrap(), QuantizationLevel::Q4_K_M);
        assert_eq!(" q8_0 ".parse::<QuantizationLevel>().unwrap(), QuantizationLevel::Q8_0);
        assert!(matches!("Q2_K".parse::<QuantizationLevel>(), Err(ExportError::InvalidLevel(_))));
        assert_eq!(QuantizationLevel::default().to_string(), "Q4_K_M");
    }
}
