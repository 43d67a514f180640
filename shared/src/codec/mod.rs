//! Opcode-indexed encode/decode table.
//!
//! Each frame starts with its opcode byte. The table maps that byte to the
//! routines that understand the rest of the frame. Routines are pure: they
//! touch only the frame buffer and the read-only unit schema registry, so
//! frames from different connections may be decoded in any order or in
//! parallel before their results are merged.

pub mod keep_alive;
pub mod tank_state;

use crate::error::CodecError;
use crate::unit_schema::UnitSchemaRegistry;
use crate::Packet;
use std::collections::HashMap;

/// How a decoder resolves a unit schema it needs before the unit type has
/// been read from the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaSource {
    /// Trust the unit type last known for this entity, verified against the
    /// frame's own unit type once it has been read.
    Hint(Option<u32>),
    /// Read the unit type from the frame's fixed tail first, then replay the
    /// schema-dependent region.
    Replay,
}

pub struct DecodeContext<'a> {
    pub schemas: &'a UnitSchemaRegistry,
    pub source: SchemaSource,
}

impl<'a> DecodeContext<'a> {
    pub fn hinted(schemas: &'a UnitSchemaRegistry, hint: Option<u32>) -> Self {
        Self {
            schemas,
            source: SchemaSource::Hint(hint),
        }
    }

    pub fn replay(schemas: &'a UnitSchemaRegistry) -> Self {
        Self {
            schemas,
            source: SchemaSource::Replay,
        }
    }
}

pub type DecodeFn = fn(&[u8], &DecodeContext<'_>) -> Result<Packet, CodecError>;
pub type EncodeFn = fn(&Packet, &UnitSchemaRegistry) -> Result<Vec<u8>, CodecError>;

/// Encode/decode routines for one opcode
#[derive(Clone, Copy)]
pub struct CodecEntry {
    pub opcode: u8,
    pub name: &'static str,
    pub decode: DecodeFn,
    pub encode: EncodeFn,
}

impl std::fmt::Debug for CodecEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecEntry")
            .field("opcode", &format_args!("0x{:02X}", self.opcode))
            .field("name", &self.name)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PacketCodec {
    entries: HashMap<u8, CodecEntry>,
}

impl PacketCodec {
    /// Table with every opcode this crate understands.
    pub fn new() -> Self {
        let mut codec = Self::empty();
        codec.register(tank_state::ENTRY);
        codec.register(keep_alive::ENTRY);
        codec
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Adds an entry. Returns false, leaving the table unchanged, if the
    /// opcode is already taken.
    pub fn register(&mut self, entry: CodecEntry) -> bool {
        if self.entries.contains_key(&entry.opcode) {
            return false;
        }
        self.entries.insert(entry.opcode, entry);
        true
    }

    pub fn entry(&self, opcode: u8) -> Option<&CodecEntry> {
        self.entries.get(&opcode)
    }

    pub fn decode(&self, frame: &[u8], ctx: &DecodeContext<'_>) -> Result<Packet, CodecError> {
        let opcode = *frame.first().ok_or(CodecError::EmptyFrame)?;
        let entry = self
            .entry(opcode)
            .ok_or(CodecError::UnknownOpcode(opcode))?;
        (entry.decode)(frame, ctx)
    }

    pub fn encode(
        &self,
        packet: &Packet,
        schemas: &UnitSchemaRegistry,
    ) -> Result<Vec<u8>, CodecError> {
        let opcode = packet.opcode();
        let entry = self
            .entry(opcode)
            .ok_or(CodecError::UnknownOpcode(opcode))?;
        (entry.encode)(packet, schemas)
    }
}
