//! Registry wire messages.
//!
//! One message per UDP datagram, bincode encoded. Every request carries a
//! random `request_id` that the reply echoes.

use bt_transport::PeerRef;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest datagram the registry sends or accepts
pub const MAX_DATAGRAM_SIZE: usize = 16 * 1024;

/// Registry RPC message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistryMessage {
    /// Record the sender as a provider of `key`
    AddProvider {
        /// Correlates the reply
        request_id: u64,
        /// Binary content ID
        key: Vec<u8>,
        /// Announcing peer and its addresses
        peer: PeerRef,
    },
    /// Acknowledges an `AddProvider`
    ProviderAck {
        /// Request being acknowledged
        request_id: u64,
        /// Seconds until the record expires unless refreshed
        ttl_secs: u64,
    },
    /// Ask for providers of `key`
    GetProviders {
        /// Correlates the reply
        request_id: u64,
        /// Binary content ID
        key: Vec<u8>,
        /// Maximum number of peers wanted
        max: u32,
    },
    /// Providers known for the requested key
    Providers {
        /// Request being answered
        request_id: u64,
        /// Known providers, most recently announced first
        peers: Vec<PeerRef>,
    },
}

impl RegistryMessage {
    /// Request ID carried by any message
    #[must_use]
    pub fn request_id(&self) -> u64 {
        match self {
            Self::AddProvider { request_id, .. }
            | Self::ProviderAck { request_id, .. }
            | Self::GetProviders { request_id, .. }
            | Self::Providers { request_id, .. } => *request_id,
        }
    }

    /// Serialize message to bytes
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails or the result does not fit in one datagram
    pub fn to_bytes(&self) -> Result<Vec<u8>, MessageError> {
        let bytes = bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| MessageError::Encode(e.to_string()))?;
        if bytes.len() > MAX_DATAGRAM_SIZE {
            return Err(MessageError::TooLarge(bytes.len()));
        }
        Ok(bytes)
    }

    /// Deserialize message from bytes
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are not a valid message
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MessageError> {
        if bytes.len() > MAX_DATAGRAM_SIZE {
            return Err(MessageError::TooLarge(bytes.len()));
        }
        let config = bincode::config::standard().with_limit::<MAX_DATAGRAM_SIZE>();
        let (message, _) = bincode::serde::decode_from_slice(bytes, config)
            .map_err(|e| MessageError::Decode(e.to_string()))?;
        Ok(message)
    }
}

/// Message encoding errors
#[derive(Debug, Error)]
pub enum MessageError {
    /// Serialization failed
    #[error("Encode failed: {0}")]
    Encode(String),

    /// Deserialization failed
    #[error("Decode failed: {0}")]
    Decode(String),

    /// Message exceeds the datagram limit
    #[error("Message of {0} bytes exceeds datagram limit")]
    TooLarge(usize),
}

#[cfg(test)]
mod tests {
    use super::*;
    use bt_transport::PeerId;

    #[test]
    fn test_add_provider_roundtrip() {
        let msg = RegistryMessage::AddProvider {
            request_id: 7,
            key: vec![1, 0x55, 0x12, 0x20],
            peer: PeerRef::new(PeerId::random(), vec!["10.0.0.1:4001".parse().unwrap()]),
        };
        let decoded = RegistryMessage::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.request_id(), 7);
    }

    #[test]
    fn test_decode_garbage() {
        assert!(RegistryMessage::from_bytes(&[0xff, 0xff, 0xff]).is_err());
        assert!(RegistryMessage::from_bytes(&[]).is_err());
    }

    #[test]
    fn test_oversized_providers_rejected() {
        let peers = (0..2000)
            .map(|_| PeerRef::new(PeerId::random(), Vec::new()))
            .collect();
        let msg = RegistryMessage::Providers {
            request_id: 1,
            peers,
        };
        assert!(matches!(msg.to_bytes(), Err(MessageError::TooLarge(_))));
    }

    proptest::proptest! {
        #[test]
        fn prop_decode_never_panics(bytes in proptest::collection::vec(proptest::num::u8::ANY, 0..512)) {
            let _ = RegistryMessage::from_bytes(&bytes);
        }
    }
}
