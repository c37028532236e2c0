//! Handshake descriptor shared by the orchestrator and every plugin
//!
//! This is a compatibility fence, not authentication: it keeps the
//! orchestrator from driving an unrelated or incompatible executable.

use serde::{Deserialize, Serialize};

/// Protocol version spoken by this build
pub const PROTOCOL_VERSION: u32 = 1;

/// Descriptor compiled into both sides of the connection
pub const HANDSHAKE: HandshakeConfig = HandshakeConfig {
    protocol_version: PROTOCOL_VERSION,
    magic_cookie_key: "CFOPS_PLUGIN_MAGIC_COOKIE",
    magic_cookie_value: "f5d4ab8b5c0e46c1a2c3b7d6e9f80a12",
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeConfig {
    pub protocol_version: u32,
    pub magic_cookie_key: &'static str,
    pub magic_cookie_value: &'static str,
}

/// Handshake as offered on the wire by a caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeOffer {
    pub protocol_version: u32,
    pub magic_cookie_key: String,
    pub magic_cookie_value: String,
}

impl HandshakeConfig {
    /// Builds the offer a caller sends as its first frame
    pub fn offer(&self) -> HandshakeOffer {
        HandshakeOffer {
            protocol_version: self.protocol_version,
            magic_cookie_key: self.magic_cookie_key.to_string(),
            magic_cookie_value: self.magic_cookie_value.to_string(),
        }
    }

    /// Checks an incoming offer. Any difference is a hard rejection.
    pub fn validate(&self, offer: &HandshakeOffer) -> Result<(), String> {
        if offer.protocol_version != self.protocol_version {
            return Err(format!(
                "protocol version mismatch: plugin speaks {}, caller offered {}",
                self.protocol_version, offer.protocol_version
            ));
        }
        if offer.magic_cookie_key != self.magic_cookie_key {
            return Err(format!(
                "unexpected magic cookie key '{}'",
                offer.magic_cookie_key
            ));
        }
        if offer.magic_cookie_value != self.magic_cookie_value {
            return Err("magic cookie value does not match".to_string());
        }
        Ok(())
    }
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        HANDSHAKE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_offer_is_accepted() {
        assert!(HANDSHAKE.validate(&HANDSHAKE.offer()).is_ok());
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let mut offer = HANDSHAKE.offer();
        offer.protocol_version = PROTOCOL_VERSION + 1;

        let reason = HANDSHAKE.validate(&offer).unwrap_err();
        assert!(reason.contains("protocol version"));
    }

    #[test]
    fn cookie_mismatch_is_rejected() {
        let mut offer = HANDSHAKE.offer();
        offer.magic_cookie_value = "something-else".into();
        assert!(HANDSHAKE.validate(&offer).is_err());

        let mut offer = HANDSHAKE.offer();
        offer.magic_cookie_key = "OTHER_KEY".into();
        assert!(HANDSHAKE.validate(&offer).is_err());
    }

    #[test]
    fn cookie_value_is_not_echoed_in_rejection() {
        let mut offer = HANDSHAKE.offer();
        offer.magic_cookie_value = "leaked".into();

        let reason = HANDSHAKE.validate(&offer).unwrap_err();
        assert!(!reason.contains("leaked"));
    }
}
