//! Rendezvous tokens
//!
//! A token is 128 random bits, hex-encoded on the wire. It is minted by
//! the relay when a public request is parked and presented exactly once
//! by the agent's data connection as the first newline-terminated line.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Single-use identifier pairing a parked public connection with the
/// agent data connection that will serve it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(u128);

impl Token {
    /// Mint a fresh random token.
    pub fn mint() -> Self {
        Token(rand::random::<u128>())
    }

    /// Parse the wire form: exactly 32 hex characters.
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 32 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        u128::from_str_radix(s, 16).ok().map(Token)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl Serialize for Token {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Token {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Token::from_hex(&s).ok_or_else(|| D::Error::custom("token must be 32 hex characters"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_form_is_32_lowercase_hex() {
        let token = Token::mint();
        let wire = token.to_string();
        assert_eq!(wire.len(), 32);
        assert!(wire.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_eq!(wire, wire.to_lowercase());
    }

    #[test]
    fn test_from_hex_roundtrip() {
        let token = Token::mint();
        assert_eq!(Token::from_hex(&token.to_string()), Some(token));
    }

    #[test]
    fn test_from_hex_preserves_leading_zeros() {
        let wire = "000000000000000000000000000000ff";
        let token = Token::from_hex(wire).unwrap();
        assert_eq!(token.to_string(), wire);
    }

    #[test]
    fn test_from_hex_rejects_malformed() {
        assert!(Token::from_hex("").is_none());
        assert!(Token::from_hex("abc123").is_none());
        assert!(Token::from_hex("zz000000000000000000000000000000").is_none());
        assert!(Token::from_hex("+0000000000000000000000000000001").is_none());
        assert!(Token::from_hex("000000000000000000000000000000ff9").is_none());
    }

    #[test]
    fn test_mint_is_unique() {
        // Two mints colliding means the RNG is broken, not bad luck.
        assert_ne!(Token::mint(), Token::mint());
    }
}
