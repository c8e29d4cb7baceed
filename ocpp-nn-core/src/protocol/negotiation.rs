//! Wire format negotiation
//!
//! The wire format of a connection is carried by its WebSocket subprotocol:
//! - `ocpp2.1`, `ocpp2.0.1`: plain-text JSON frames
//! - `ocpp2.1+hybrid`: JSON frames, binary payloads as base64 text
//! - `ocpp2.1+bin`: compact binary frames

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// OCPP 2.0.1 subprotocol name
pub const OCPP_201: &str = "ocpp2.0.1";

/// OCPP 2.1 subprotocol name
pub const OCPP_21: &str = "ocpp2.1";

const HYBRID_SUFFIX: &str = "+hybrid";
const BINARY_SUFFIX: &str = "+bin";

/// Encoding used for frames on a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WireFormat {
    PlainText,
    BinaryCompact,
    Hybrid,
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireFormat::PlainText => write!(f, "plain-text"),
            WireFormat::BinaryCompact => write!(f, "binary"),
            WireFormat::Hybrid => write!(f, "hybrid"),
        }
    }
}

impl FromStr for WireFormat {
    type Err = NegotiationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plain-text" | "text" | "json" => Ok(WireFormat::PlainText),
            "binary" | "bin" => Ok(WireFormat::BinaryCompact),
            "hybrid" => Ok(WireFormat::Hybrid),
            _ => Err(NegotiationError::UnknownFormat(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NegotiationError {
    #[error("not an OCPP subprotocol: {0}")]
    NotOcpp(String),

    #[error("unknown wire format: {0}")]
    UnknownFormat(String),
}

/// A negotiated (or offered) OCPP subprotocol
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subprotocol {
    version: String,
    format: WireFormat,
}

impl Subprotocol {
    pub fn new(version: impl Into<String>, format: WireFormat) -> Self {
        Self {
            version: version.into(),
            format,
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    /// Whether frames in `format` may be written on this subprotocol
    pub fn accepts(&self, format: WireFormat) -> bool {
        match self.format {
            WireFormat::PlainText => format == WireFormat::PlainText,
            WireFormat::Hybrid => matches!(format, WireFormat::PlainText | WireFormat::Hybrid),
            WireFormat::BinaryCompact => format == WireFormat::BinaryCompact,
        }
    }
}

impl Default for Subprotocol {
    fn default() -> Self {
        Self::new(OCPP_21, WireFormat::PlainText)
    }
}

impl fmt::Display for Subprotocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.format {
            WireFormat::PlainText => write!(f, "{}", self.version),
            WireFormat::Hybrid => write!(f, "{}{}", self.version, HYBRID_SUFFIX),
            WireFormat::BinaryCompact => write!(f, "{}{}", self.version, BINARY_SUFFIX),
        }
    }
}

impl FromStr for Subprotocol {
    type Err = NegotiationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (version, format) = if let Some(v) = s.strip_suffix(HYBRID_SUFFIX) {
            (v, WireFormat::Hybrid)
        } else if let Some(v) = s.strip_suffix(BINARY_SUFFIX) {
            (v, WireFormat::BinaryCompact)
        } else {
            (s, WireFormat::PlainText)
        };

        if !version.starts_with("ocpp") || version.len() == "ocpp".len() {
            return Err(NegotiationError::NotOcpp(s.to_string()));
        }

        Ok(Self::new(version, format))
    }
}

/// Pick the subprotocol for a new connection
///
/// `supported` is in server preference order; the first entry the client
/// also offered wins. Offers that do not parse are ignored.
pub fn negotiate(offered: &[&str], supported: &[Subprotocol]) -> Option<Subprotocol> {
    let offered: Vec<Subprotocol> = offered
        .iter()
        .filter_map(|name| name.trim().parse().ok())
        .collect();

    supported
        .iter()
        .find(|candidate| offered.contains(candidate))
        .cloned()
}

/// Parse a `Sec-WebSocket-Protocol` header value into its offers
pub fn parse_offer_header(header: &str) -> Vec<&str> {
    header
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_subprotocols() {
        let plain: Subprotocol = "ocpp2.0.1".parse().unwrap();
        assert_eq!(plain.version(), OCPP_201);
        assert_eq!(plain.format(), WireFormat::PlainText);

        let hybrid: Subprotocol = "ocpp2.1+hybrid".parse().unwrap();
        assert_eq!(hybrid.format(), WireFormat::Hybrid);

        let binary: Subprotocol = "ocpp2.1+bin".parse().unwrap();
        assert_eq!(binary.format(), WireFormat::BinaryCompact);
        assert_eq!(binary.to_string(), "ocpp2.1+bin");

        assert!("mqtt".parse::<Subprotocol>().is_err());
        assert!("ocpp+bin".parse::<Subprotocol>().is_err());
    }

    #[test]
    fn test_accepts() {
        let plain = Subprotocol::new(OCPP_21, WireFormat::PlainText);
        let hybrid = Subprotocol::new(OCPP_21, WireFormat::Hybrid);
        let binary = Subprotocol::new(OCPP_21, WireFormat::BinaryCompact);

        assert!(plain.accepts(WireFormat::PlainText));
        assert!(!plain.accepts(WireFormat::Hybrid));
        assert!(hybrid.accepts(WireFormat::PlainText));
        assert!(hybrid.accepts(WireFormat::Hybrid));
        assert!(!hybrid.accepts(WireFormat::BinaryCompact));
        assert!(binary.accepts(WireFormat::BinaryCompact));
        assert!(!binary.accepts(WireFormat::PlainText));
    }

    #[test]
    fn test_negotiate_server_preference() {
        let supported = vec![
            Subprotocol::new(OCPP_21, WireFormat::BinaryCompact),
            Subprotocol::new(OCPP_21, WireFormat::PlainText),
            Subprotocol::new(OCPP_201, WireFormat::PlainText),
        ];

        let offer = parse_offer_header("ocpp2.0.1, ocpp2.1, ocpp2.1+bin");
        let chosen = negotiate(&offer, &supported).unwrap();
        assert_eq!(chosen.format(), WireFormat::BinaryCompact);

        let chosen = negotiate(&["ocpp2.0.1", "junk"], &supported).unwrap();
        assert_eq!(chosen.version(), OCPP_201);

        assert!(negotiate(&["ocpp1.6"], &supported).is_none());
        assert!(negotiate(&[], &supported).is_none());
    }

    #[test]
    fn test_wire_format_from_str() {
        assert_eq!("hybrid".parse::<WireFormat>().unwrap(), WireFormat::Hybrid);
        assert_eq!("json".parse::<WireFormat>().unwrap(), WireFormat::PlainText);
        assert!("xml".parse::<WireFormat>().is_err());
    }
}
