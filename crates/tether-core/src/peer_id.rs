//! Relay-assigned peer identifiers.
//!
//! A [`PeerId`] is 16 opaque bytes drawn from the operating system's CSPRNG
//! when the relay accepts a connection. Peers address each other only through
//! these identifiers. Two encodings exist: the raw 16 bytes carried in every
//! frame header, and a lower-case hex text form used for logs and the CLI.

use crate::PEER_ID_LEN;
use crate::error::IdError;
use std::fmt;
use std::str::FromStr;

/// 128-bit peer identifier issued by the relay
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId([u8; PEER_ID_LEN]);

impl PeerId {
    /// The all-zero identifier. Never issued by [`PeerId::generate`] in
    /// practice; used as the id field of frames where it carries no meaning.
    pub const ZERO: PeerId = PeerId([0u8; PEER_ID_LEN]);

    /// Generate a fresh random identifier from the OS random source.
    ///
    /// # Panics
    ///
    /// Panics if the operating system's random source fails. Identifiers
    /// must never be derived from a weaker source.
    ///
    /// # Examples
    ///
    /// ```
    /// use tether_core::PeerId;
    ///
    /// let a = PeerId::generate();
    /// let b = PeerId::generate();
    /// assert_ne!(a, b);
    /// ```
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; PEER_ID_LEN];
        getrandom::getrandom(&mut bytes).expect("CSPRNG failure");
        Self(bytes)
    }

    /// Create a PeerId from raw bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; PEER_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Decode a PeerId from a byte slice.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::InvalidLength`] unless `bytes` is exactly 16 bytes.
    ///
    /// # Examples
    ///
    /// ```
    /// use tether_core::PeerId;
    ///
    /// let id = PeerId::generate();
    /// assert_eq!(PeerId::from_slice(&id.to_bytes()).unwrap(), id);
    /// assert!(PeerId::from_slice(&[1, 2, 3]).is_err());
    /// ```
    pub fn from_slice(bytes: &[u8]) -> Result<Self, IdError> {
        let array: [u8; PEER_ID_LEN] =
            bytes.try_into().map_err(|_| IdError::InvalidLength {
                expected: PEER_ID_LEN,
                actual: bytes.len(),
            })?;
        Ok(Self(array))
    }

    /// Raw 16-byte encoding
    #[must_use]
    pub const fn to_bytes(&self) -> [u8; PEER_ID_LEN] {
        self.0
    }

    /// Borrow the raw bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; PEER_ID_LEN] {
        &self.0
    }

    /// Lower-case hex text form (32 characters)
    #[must_use]
    pub fn to_text(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse the hex text form produced by [`PeerId::to_text`].
    ///
    /// Upper-case digits are accepted.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::InvalidHex`] for non-hex input and
    /// [`IdError::InvalidLength`] when the decoded length is not 16 bytes.
    pub fn parse_text(text: &str) -> Result<Self, IdError> {
        let bytes = hex::decode(text.trim()).map_err(|e| IdError::InvalidHex(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// Whether this is [`PeerId::ZERO`]
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; PEER_ID_LEN]
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl FromStr for PeerId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_text(s)
    }
}

impl From<[u8; PEER_ID_LEN]> for PeerId {
    fn from(bytes: [u8; PEER_ID_LEN]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for PeerId {
    type Error = IdError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        Self::from_slice(bytes)
    }
}
