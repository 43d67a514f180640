//! Per-unit-type vitals schema.
//!
//! The Tank State vitals block has no in-band signalling for its optional
//! fields: whether a firing mask or the two extra bytes follow depends only on
//! the unit type. This registry holds that knowledge. It is populated once at
//! startup (usually from `units.toml`) and is read-only afterwards.

use crate::error::CodecError;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

pub const DEFAULT_WEAPON_BITS: u32 = 5;
pub const DEFAULT_HEALTH_BITS: u32 = 10;
pub const DEFAULT_ENERGY_BITS: u32 = 10;
pub const DEFAULT_FIRING_MASK_BITS: u32 = 13;
pub const DEFAULT_EXTRA_BITS: u32 = 8;

fn default_weapon_bits() -> u32 {
    DEFAULT_WEAPON_BITS
}
fn default_health_bits() -> u32 {
    DEFAULT_HEALTH_BITS
}
fn default_energy_bits() -> u32 {
    DEFAULT_ENERGY_BITS
}
fn default_firing_mask_bits() -> u32 {
    DEFAULT_FIRING_MASK_BITS
}
fn default_extra_bits() -> u32 {
    DEFAULT_EXTRA_BITS
}

/// Implicit schema of the vitals block for one unit type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitConfig {
    pub unit_type: u32,
    #[serde(default)]
    pub has_firing_mask: bool,
    #[serde(default)]
    pub has_extras: bool,
    #[serde(default = "default_weapon_bits")]
    pub weapon_bits: u32,
    #[serde(default = "default_health_bits")]
    pub health_bits: u32,
    #[serde(default = "default_energy_bits")]
    pub energy_bits: u32,
    #[serde(default = "default_firing_mask_bits")]
    pub firing_mask_bits: u32,
    /// Width of each of the two extra fields
    #[serde(default = "default_extra_bits")]
    pub extra_bits: u32,
}

impl UnitConfig {
    /// Creates a config using the standard vitals widths.
    pub fn new(unit_type: u32, has_firing_mask: bool, has_extras: bool) -> Self {
        Self {
            unit_type,
            has_firing_mask,
            has_extras,
            weapon_bits: DEFAULT_WEAPON_BITS,
            health_bits: DEFAULT_HEALTH_BITS,
            energy_bits: DEFAULT_ENERGY_BITS,
            firing_mask_bits: DEFAULT_FIRING_MASK_BITS,
            extra_bits: DEFAULT_EXTRA_BITS,
        }
    }

    /// Bits of the always-present vitals fields (weapon, health, energy).
    pub fn base_vitals_bits(&self) -> u32 {
        self.weapon_bits + self.health_bits + self.energy_bits
    }

    /// Bits of the fields gated by this config.
    pub fn gated_vitals_bits(&self) -> u32 {
        let mut bits = 0;
        if self.has_firing_mask {
            bits += self.firing_mask_bits;
        }
        if self.has_extras {
            bits += 2 * self.extra_bits;
        }
        bits
    }

    /// Bits of the whole vitals region before byte alignment, presence bit
    /// included.
    pub fn vitals_region_bits(&self, vitals_present: bool) -> u32 {
        if vitals_present {
            1 + self.base_vitals_bits() + self.gated_vitals_bits()
        } else {
            1
        }
    }

    fn validate(&self) -> Result<(), SchemaLoadError> {
        let widths = [
            ("weapon_bits", self.weapon_bits),
            ("health_bits", self.health_bits),
            ("energy_bits", self.energy_bits),
            ("firing_mask_bits", self.firing_mask_bits),
            ("extra_bits", self.extra_bits),
        ];
        for (field, bits) in widths {
            if !(1..=32).contains(&bits) {
                return Err(SchemaLoadError::InvalidWidth {
                    unit_type: self.unit_type,
                    field,
                    bits,
                });
            }
        }
        Ok(())
    }
}

/// Failure while building the registry at startup
#[derive(Debug, thiserror::Error)]
pub enum SchemaLoadError {
    #[error("Failed to read unit schema file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse unit schema file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Unit type {0} is configured more than once")]
    Duplicate(u32),

    #[error("Unit type {unit_type}: `{field}` = {bits} is outside 1..=32")]
    InvalidWidth {
        unit_type: u32,
        field: &'static str,
        bits: u32,
    },
}

#[derive(Debug, Deserialize)]
struct UnitFile {
    #[serde(default, rename = "unit")]
    units: Vec<UnitConfig>,
}

/// Lookup table from unit type to its vitals schema
#[derive(Debug, Clone, Default)]
pub struct UnitSchemaRegistry {
    units: HashMap<u32, UnitConfig>,
}

impl UnitSchemaRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry, rejecting duplicate unit types and bad widths.
    pub fn from_configs<I>(configs: I) -> Result<Self, SchemaLoadError>
    where
        I: IntoIterator<Item = UnitConfig>,
    {
        let mut registry = Self::new();
        for config in configs {
            registry.register(config)?;
        }
        Ok(registry)
    }

    /// Table used when no schema file is available: ground tank and scout,
    /// neither carrying a firing mask or extras.
    pub fn builtin() -> Self {
        let mut units = HashMap::new();
        for unit_type in [0, 1] {
            units.insert(unit_type, UnitConfig::new(unit_type, false, false));
        }
        Self { units }
    }

    /// Parses a registry from TOML `[[unit]]` tables.
    ///
    /// Widths left out of a table take the standard defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, SchemaLoadError> {
        let file: UnitFile = toml::from_str(source)?;
        Self::from_configs(file.units)
    }

    /// Reads and parses a unit schema file.
    ///
    /// A missing or unreadable file is an `Io` error; use
    /// [`UnitSchemaRegistry::load_or_builtin`] to fall back instead.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SchemaLoadError> {
        let source = std::fs::read_to_string(path.as_ref())?;
        let registry = Self::from_toml_str(&source)?;
        info!(
            "Loaded {} unit schemas from {}",
            registry.len(),
            path.as_ref().display()
        );
        Ok(registry)
    }

    /// Loads the schema file, falling back to the built-in table when the
    /// file does not exist. A file that exists but is invalid is an error.
    pub fn load_or_builtin(path: impl AsRef<Path>) -> Result<Self, SchemaLoadError> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(
                "{} not found, using built-in unit schemas",
                path.display()
            );
            return Ok(Self::builtin());
        }
        Self::load(path)
    }

    /// Adds a unit config to the table.
    ///
    /// Fails if the config has a bit width outside 1..=32 or its unit type is
    /// already registered. Existing entries are never replaced.
    pub fn register(&mut self, config: UnitConfig) -> Result<(), SchemaLoadError> {
        config.validate()?;
        if self.units.contains_key(&config.unit_type) {
            return Err(SchemaLoadError::Duplicate(config.unit_type));
        }
        self.units.insert(config.unit_type, config);
        Ok(())
    }

    /// Resolves the schema for a unit type. Never guesses a default.
    pub fn lookup(&self, unit_type: u32) -> Result<&UnitConfig, CodecError> {
        self.units
            .get(&unit_type)
            .ok_or(CodecError::UnknownUnitType(unit_type))
    }

    /// Iterates over every registered unit config, in no particular order
    pub fn configs(&self) -> impl Iterator<Item = &UnitConfig> {
        self.units.values()
    }

    /// Returns the number of registered unit types
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Returns true if no unit type is registered
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}
