//! Validated secp256k1 curve points
//!
//! A [`CurvePoint`] can only be obtained through one of the validating
//! constructors, so holding one means the coordinates satisfy
//! `y² = x³ + 7 (mod p)` and the point is not the point at infinity.

use secp256k1::{Parity, PublicKey, Secp256k1, XOnlyPublicKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Size of a compressed point encoding (parity prefix + X)
pub const COMPRESSED_POINT_SIZE: usize = 33;

/// Size of an uncompressed point encoding (0x04 + X + Y)
pub const UNCOMPRESSED_POINT_SIZE: usize = 65;

/// Errors produced while constructing curve points
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PointError {
    #[error("Invalid point: {0}")]
    InvalidPoint(String),
    #[error("No curve point with X coordinate {0}")]
    InvalidX(String),
    #[error("Cannot lift X coordinate {0} onto the curve")]
    LiftFailed(String),
}

/// A point on secp256k1 other than the point at infinity
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CurvePoint(PublicKey);

impl CurvePoint {
    /// Build a point from affine coordinates (32-byte big-endian each)
    ///
    /// secp256k1 has cofactor 1, so every affine point the parser accepts lies
    /// in the prime-order subgroup and `point · N` is the point at infinity.
    pub fn from_coordinates(x: &[u8; 32], y: &[u8; 32]) -> Result<Self, PointError> {
        if x.iter().chain(y.iter()).all(|b| *b == 0) {
            return Err(PointError::InvalidPoint(
                "point at infinity".to_string(),
            ));
        }

        let mut encoded = [0u8; UNCOMPRESSED_POINT_SIZE];
        encoded[0] = 0x04;
        encoded[1..33].copy_from_slice(x);
        encoded[33..].copy_from_slice(y);

        PublicKey::from_slice(&encoded).map(Self).map_err(|_| {
            PointError::InvalidPoint(format!(
                "({}, {}) is not on the curve",
                hex::encode(x),
                hex::encode(y)
            ))
        })
    }

    /// Recover the point with the given X whose Y has the requested parity
    pub fn from_x(x: &[u8; 32], want_odd: bool) -> Result<Self, PointError> {
        let mut encoded = [0u8; COMPRESSED_POINT_SIZE];
        encoded[0] = if want_odd { 0x03 } else { 0x02 };
        encoded[1..].copy_from_slice(x);

        PublicKey::from_slice(&encoded)
            .map(Self)
            .map_err(|_| PointError::InvalidX(hex::encode(x)))
    }

    /// Lift an X-only coordinate to the full point with even Y (BIP340)
    ///
    /// Computes `c = x³ + 7`, `y = c^((p+1)/4)` and fails when `y² ≠ c`.
    pub fn lift_x(x: &[u8; 32]) -> Result<Self, PointError> {
        let x_only =
            XOnlyPublicKey::from_slice(x).map_err(|_| PointError::LiftFailed(hex::encode(x)))?;
        Ok(Self(x_only.public_key(Parity::Even)))
    }

    /// Parse a compressed (33-byte) or uncompressed (65-byte) encoding
    pub fn from_slice(bytes: &[u8]) -> Result<Self, PointError> {
        match bytes.len() {
            COMPRESSED_POINT_SIZE | UNCOMPRESSED_POINT_SIZE => PublicKey::from_slice(bytes)
                .map(Self)
                .map_err(|_| PointError::InvalidPoint(hex::encode(bytes))),
            n => Err(PointError::InvalidPoint(format!(
                "expected {} or {} bytes, got {}",
                COMPRESSED_POINT_SIZE, UNCOMPRESSED_POINT_SIZE, n
            ))),
        }
    }

    /// Parse a hex-encoded point
    pub fn from_hex(hex_str: &str) -> Result<Self, PointError> {
        let bytes = hex::decode(hex_str)
            .map_err(|_| PointError::InvalidPoint(format!("not hex: {}", hex_str)))?;
        Self::from_slice(&bytes)
    }

    /// Compressed encoding: 0x02 (even Y) or 0x03 (odd Y) followed by X
    pub fn to_compressed(&self) -> [u8; COMPRESSED_POINT_SIZE] {
        self.0.serialize()
    }

    /// Uncompressed encoding: 0x04 || X || Y
    pub fn to_uncompressed(&self) -> [u8; UNCOMPRESSED_POINT_SIZE] {
        self.0.serialize_uncompressed()
    }

    /// Compressed encoding as lowercase hex
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_compressed())
    }

    /// Big-endian X coordinate
    pub fn x(&self) -> [u8; 32] {
        let mut x = [0u8; 32];
        x.copy_from_slice(&self.to_uncompressed()[1..33]);
        x
    }

    /// Big-endian Y coordinate
    pub fn y(&self) -> [u8; 32] {
        let mut y = [0u8; 32];
        y.copy_from_slice(&self.to_uncompressed()[33..]);
        y
    }

    pub fn has_odd_y(&self) -> bool {
        self.to_compressed()[0] == 0x03
    }

    /// The X-only key used by Schnorr verification
    pub fn x_only(&self) -> XOnlyPublicKey {
        self.0.x_only_public_key().0
    }

    /// The point with the same X and the opposite Y
    pub fn negate(&self) -> Self {
        let secp = Secp256k1::verification_only();
        Self(self.0.negate(&secp))
    }

    pub(crate) fn as_public_key(&self) -> &PublicKey {
        &self.0
    }
}

impl From<PublicKey> for CurvePoint {
    fn from(key: PublicKey) -> Self {
        Self(key)
    }
}

impl fmt::Display for CurvePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for CurvePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CurvePoint({})", self.to_hex())
    }
}

impl Serialize for CurvePoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for CurvePoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        CurvePoint::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
