// src/address.rs
//! Address handling for the indexer.
//!
//! Locking scripts in this chain carry the destination address directly as
//! prefixed UTF-8 (`IDX1...` mainnet, `IDX0...` testnet). An output is
//! "indexable" when its script decodes to a well-formed address; everything
//! else (data carriers, burn outputs) is skipped by the indexer.

use crate::types::NetworkType;

const MIN_ADDRESS_LENGTH: usize = 12;
const MAX_ADDRESS_LENGTH: usize = 64;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("Invalid address length")]
    InvalidLength,
    #[error("Invalid address prefix (expected IDX)")]
    InvalidPrefix,
    #[error("Invalid network digit (expected 0 or 1)")]
    InvalidNetwork,
    #[error("Address contains non-alphanumeric characters")]
    InvalidCharacter,
}

/// Validate a bare address string.
pub fn validate_address(address: &str) -> Result<NetworkType, AddressError> {
    if address.len() < MIN_ADDRESS_LENGTH || address.len() > MAX_ADDRESS_LENGTH {
        return Err(AddressError::InvalidLength);
    }
    if !address.starts_with("IDX") {
        return Err(AddressError::InvalidPrefix);
    }
    let network = match address.as_bytes().get(3) {
        Some(b'0') => NetworkType::Testnet,
        Some(b'1') => NetworkType::Mainnet,
        _ => return Err(AddressError::InvalidNetwork),
    };
    if !address[4..].bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(AddressError::InvalidCharacter);
    }
    Ok(network)
}

/// Decode the destination address from a locking script, if any.
///
/// Returns `None` for non-indexable scripts; the indexer simply ignores
/// those outputs.
pub fn address_from_script(script: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(script).ok()?;
    validate_address(text).ok()?;
    Some(text.to_string())
}

/// Build the locking script for an address.
pub fn script_for_address(address: &str) -> Vec<u8> {
    address.as_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_addresses() {
        assert_eq!(
            validate_address("IDX1alice0000"),
            Ok(NetworkType::Mainnet)
        );
        assert_eq!(validate_address("IDX0bob000000"), Ok(NetworkType::Testnet));
    }

    #[test]
    fn test_invalid_addresses() {
        assert_eq!(validate_address("IDX1ab"), Err(AddressError::InvalidLength));
        assert_eq!(
            validate_address("TIME1alice000"),
            Err(AddressError::InvalidPrefix)
        );
        assert_eq!(
            validate_address("IDX2alice0000"),
            Err(AddressError::InvalidNetwork)
        );
        assert_eq!(
            validate_address("IDX1alice-..."),
            Err(AddressError::InvalidCharacter)
        );
    }

    #[test]
    fn test_script_round_trip() {
        let script = script_for_address("IDX1alice0000");
        assert_eq!(address_from_script(&script).as_deref(), Some("IDX1alice0000"));
    }

    #[test]
    fn test_non_indexable_scripts() {
        assert!(address_from_script(&[0xff, 0xfe, 0x00]).is_none());
        assert!(address_from_script(b"OP_RETURN data").is_none());
        assert!(address_from_script(b"").is_none());
    }
}
