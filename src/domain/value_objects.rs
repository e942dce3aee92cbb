//! Value objects describing satellite products and datacube requests.
//!
//! NewType wrappers keep tile identifiers and processing levels from being
//! mixed up with arbitrary strings once they have been validated.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use clap::ValueEnum;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static TILE_IN_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"T\d{2}[A-Z]{3}").expect("tile pattern valid"));
static DATE_IN_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{8})T").expect("date pattern valid"));

// ============================================================================
// TileId - MGRS tile identifier
// ============================================================================

/// MGRS tile identifier such as `T27XVH`.
///
/// # Validation
/// - Exactly six characters
/// - Leading `T` followed by five ASCII letters or digits
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TileId(String);

impl TileId {
    const LENGTH: usize = 6;

    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.is_empty() {
            return Err(ValidationError::Empty("TileId"));
        }
        if !id.starts_with('T') {
            return Err(ValidationError::Invalid {
                field: "TileId",
                reason: "must start with 'T'",
            });
        }
        if id.len() != Self::LENGTH {
            return Err(ValidationError::Invalid {
                field: "TileId",
                reason: "must be 'T' plus five letters or digits",
            });
        }
        if let Some(character) = id.chars().skip(1).find(|c| !c.is_ascii_alphanumeric()) {
            return Err(ValidationError::InvalidCharacter {
                field: "TileId",
                character,
            });
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TileId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for TileId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TileId> for String {
    fn from(id: TileId) -> String {
        id.0
    }
}

impl AsRef<str> for TileId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// ProcessingLevel
// ============================================================================

/// Sentinel-2 processing level encoded in product file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum ProcessingLevel {
    #[value(name = "L2A")]
    L2A,
    #[value(name = "L1B")]
    L1B,
    #[value(name = "L1C")]
    L1C,
}

impl ProcessingLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingLevel::L2A => "L2A",
            ProcessingLevel::L1B => "L1B",
            ProcessingLevel::L1C => "L1C",
        }
    }
}

impl fmt::Display for ProcessingLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ProductName - tile and acquisition date carried by a file name
// ============================================================================

/// Tile and acquisition date extracted from a product file name, e.g.
/// `S2A_MSIL2A_20240105T103421_N0510_R108_T31UFT_20240105T122707.nc`.
///
/// The first `T\d{2}[A-Z]{3}` match is the tile and the first eight digits
/// followed by `T` are the acquisition date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductName {
    tile: TileId,
    acquired: NaiveDate,
}

impl ProductName {
    pub fn parse(file_name: &str) -> Result<Self, ValidationError> {
        let tile = TILE_IN_NAME
            .find(file_name)
            .ok_or(ValidationError::Invalid {
                field: "ProductName",
                reason: "no tile identifier in file name",
            })?;
        let tile = TileId::new(tile.as_str())?;

        let digits = DATE_IN_NAME
            .captures(file_name)
            .and_then(|captures| captures.get(1))
            .ok_or(ValidationError::Invalid {
                field: "ProductName",
                reason: "no acquisition date in file name",
            })?;
        let acquired = NaiveDate::parse_from_str(digits.as_str(), "%Y%m%d").map_err(|_| {
            ValidationError::Invalid {
                field: "ProductName",
                reason: "acquisition date is not a calendar date",
            }
        })?;

        Ok(Self { tile, acquired })
    }

    pub fn tile(&self) -> &TileId {
        &self.tile
    }

    pub fn acquired(&self) -> NaiveDate {
        self.acquired
    }

    pub fn year(&self) -> String {
        self.acquired.format("%Y").to_string()
    }
}

// ============================================================================
// ValidationError
// ============================================================================

/// Validation errors for domain value objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Field is empty but must not be.
    Empty(&'static str),

    /// Field contains invalid character.
    InvalidCharacter {
        field: &'static str,
        character: char,
    },

    /// Field value is invalid for specified reason.
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::Empty(field) => write!(f, "{} cannot be empty", field),
            ValidationError::InvalidCharacter { field, character } => {
                write!(f, "{} contains invalid character: '{}'", field, character)
            }
            ValidationError::Invalid { field, reason } => {
                write!(f, "{} is invalid: {}", field, reason)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

// ============================================================================
// Tests
// ============================================================================
