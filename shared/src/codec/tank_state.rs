//! `0x18` Tank State.
//!
//! ```text
//! u8      opcode (0x18)
//! u32le   timestamp
//! 1 bit   vitals present
//!   bits  weapon_id, health_mult, energy_mult         (iff present)
//!   bits  firing_mask                                  (iff present && has_firing_mask)
//!   bits  extra_a, extra_b                             (iff present && has_extras)
//! pad     zero bits to the next byte boundary
//! u32le   unit_type
//! u32le   net_id
//! u8      flags
//! 3xf32le position
//! 3xf32le velocity
//! ```
//!
//! The unit type that decides the vitals layout sits after the vitals, so
//! decoding either trusts a hint (the entity's last known unit type) and
//! verifies it against the tail, or replays: the tail is always the last
//! [`TAIL_BYTES`] of the frame, so its unit type can be read first.

use super::{CodecEntry, DecodeContext, SchemaSource};
use crate::bit_cursor::{BitReader, BitWriter};
use crate::error::CodecError;
use crate::unit_schema::{UnitConfig, UnitSchemaRegistry};
use crate::{Packet, TankState, TankStatePacket, Vec3, Vitals, OPCODE_TANK_STATE};

/// unit_type + net_id + flags + position + velocity
pub const TAIL_BYTES: usize = 4 + 4 + 1 + 12 + 12;

/// opcode + timestamp
pub const HEADER_BYTES: usize = 1 + 4;

pub const ENTRY: CodecEntry = CodecEntry {
    opcode: OPCODE_TANK_STATE,
    name: "TankState",
    decode,
    encode,
};

/// Exact frame length for a unit config, with or without vitals.
pub fn frame_len(config: &UnitConfig, vitals_present: bool) -> usize {
    let region_bytes = (config.vitals_region_bits(vitals_present) as usize).div_ceil(8);
    HEADER_BYTES + region_bytes + TAIL_BYTES
}

/// Reads the net id from a Tank State frame's tail without decoding the rest.
/// Returns `None` for frames too short to carry a tail.
pub fn peek_net_id(frame: &[u8]) -> Option<u32> {
    if frame.first() != Some(&OPCODE_TANK_STATE) {
        return None;
    }
    let start = frame.len().checked_sub(TAIL_BYTES)? + 4;
    let bytes: [u8; 4] = frame.get(start..start + 4)?.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

fn decode(frame: &[u8], ctx: &DecodeContext<'_>) -> Result<Packet, CodecError> {
    decode_tank_state(frame, ctx.schemas, ctx.source).map(Packet::TankState)
}

fn encode(packet: &Packet, schemas: &UnitSchemaRegistry) -> Result<Vec<u8>, CodecError> {
    match packet {
        Packet::TankState(tank) => encode_tank_state(tank, schemas),
        other => Err(CodecError::OpcodeMismatch {
            expected: OPCODE_TANK_STATE,
            found: other.opcode(),
        }),
    }
}

pub fn decode_tank_state(
    frame: &[u8],
    schemas: &UnitSchemaRegistry,
    source: SchemaSource,
) -> Result<TankStatePacket, CodecError> {
    match source {
        SchemaSource::Hint(hint) => decode_hinted(frame, schemas, hint),
        SchemaSource::Replay => decode_replay(frame, schemas),
    }
}

struct Tail {
    unit_type: u32,
    net_id: u32,
    flags: u8,
    position: Vec3,
    velocity: Vec3,
}

impl Tail {
    fn into_packet(self, timestamp: u32, vitals: Option<Vitals>) -> TankStatePacket {
        TankStatePacket {
            timestamp,
            state: TankState {
                net_id: self.net_id,
                unit_type: self.unit_type,
                flags: self.flags,
                position: self.position,
                velocity: self.velocity,
                vitals,
            },
        }
    }
}

fn read_header(reader: &mut BitReader<'_>) -> Result<u32, CodecError> {
    let opcode = reader.read_u8()?;
    if opcode != OPCODE_TANK_STATE {
        return Err(CodecError::OpcodeMismatch {
            expected: OPCODE_TANK_STATE,
            found: opcode,
        });
    }
    reader.read_u32_le()
}

fn read_vitals(reader: &mut BitReader<'_>, config: &UnitConfig) -> Result<Vitals, CodecError> {
    let weapon_id = reader.read_bits(config.weapon_bits)?;
    let health_mult = reader.read_bits(config.health_bits)?;
    let energy_mult = reader.read_bits(config.energy_bits)?;

    let firing_mask = if config.has_firing_mask {
        Some(reader.read_bits(config.firing_mask_bits)?)
    } else {
        None
    };

    let (extra_a, extra_b) = if config.has_extras {
        let a = reader.read_bits(config.extra_bits)?;
        let b = reader.read_bits(config.extra_bits)?;
        (Some(a), Some(b))
    } else {
        (None, None)
    };

    Ok(Vitals {
        weapon_id,
        health_mult,
        energy_mult,
        firing_mask,
        extra_a,
        extra_b,
    })
}

fn read_vec3(reader: &mut BitReader<'_>) -> Result<Vec3, CodecError> {
    Ok(Vec3 {
        x: reader.read_f32_le()?,
        y: reader.read_f32_le()?,
        z: reader.read_f32_le()?,
    })
}

/// Reads the fixed tail and requires it to end the frame.
fn read_tail(reader: &mut BitReader<'_>) -> Result<Tail, CodecError> {
    let tail = Tail {
        unit_type: reader.read_u32_le()?,
        net_id: reader.read_u32_le()?,
        flags: reader.read_u8()?,
        position: read_vec3(reader)?,
        velocity: read_vec3(reader)?,
    };

    match reader.remaining_bytes() {
        0 => Ok(tail),
        count => Err(CodecError::TrailingBytes { count }),
    }
}

fn decode_hinted(
    frame: &[u8],
    schemas: &UnitSchemaRegistry,
    hint: Option<u32>,
) -> Result<TankStatePacket, CodecError> {
    let mut reader = BitReader::new(frame);
    let timestamp = read_header(&mut reader)?;

    if !reader.read_bool()? {
        // No vitals, so no schema is needed at all
        reader.align_to_byte();
        let tail = read_tail(&mut reader)?;
        return Ok(tail.into_packet(timestamp, None));
    }

    let hinted = hint.ok_or(CodecError::SchemaUnresolved)?;
    let config = schemas.lookup(hinted)?;
    let vitals = read_vitals(&mut reader, config)?;
    reader.align_to_byte();

    // A wrong schema shifts the tail, so check the unit type before blaming
    // the frame length.
    let unit_type = reader.clone().read_u32_le()?;
    if unit_type != hinted {
        return Err(CodecError::SchemaMismatch {
            hinted,
            actual: unit_type,
        });
    }

    let tail = read_tail(&mut reader)?;
    Ok(tail.into_packet(timestamp, Some(vitals)))
}

/// Finds a registered unit whose layout places its own unit type where this
/// frame has it, but which needs more bytes than the frame holds.
fn truncated_known_unit(
    frame: &[u8],
    schemas: &UnitSchemaRegistry,
    vitals_present: bool,
) -> Option<CodecError> {
    schemas
        .configs()
        .map(|config| (config, frame_len(config, vitals_present)))
        .filter(|(_, len)| *len > frame.len())
        .find(|(config, len)| {
            let start = len - TAIL_BYTES;
            frame.get(start..start + 4) == Some(&config.unit_type.to_le_bytes()[..])
        })
        .map(|(_, len)| CodecError::TruncatedStream {
            needed: len * 8,
            remaining: frame.len() * 8,
        })
}

fn decode_replay(
    frame: &[u8],
    schemas: &UnitSchemaRegistry,
) -> Result<TankStatePacket, CodecError> {
    let mut reader = BitReader::new(frame);
    let timestamp = read_header(&mut reader)?;
    let vitals_present = reader.read_bool()?;

    // Shorter than every known layout: whatever sits at the end is not a tail
    let shortest = schemas
        .configs()
        .map(|config| frame_len(config, vitals_present))
        .min();
    if let Some(shortest) = shortest.filter(|len| frame.len() < *len) {
        return Err(CodecError::TruncatedStream {
            needed: shortest * 8,
            remaining: frame.len() * 8,
        });
    }

    // A cut frame still reads 33 bytes as its tail, which then names a
    // nonexistent unit or leaves bytes over. Report those as truncation when
    // a longer known layout matches the frame.
    match replay_against_tail(frame, schemas, reader, timestamp, vitals_present) {
        Err(err @ (CodecError::UnknownUnitType(_) | CodecError::TrailingBytes { .. })) => {
            Err(truncated_known_unit(frame, schemas, vitals_present).unwrap_or(err))
        }
        result => result,
    }
}

fn replay_against_tail(
    frame: &[u8],
    schemas: &UnitSchemaRegistry,
    mut reader: BitReader<'_>,
    timestamp: u32,
    vitals_present: bool,
) -> Result<TankStatePacket, CodecError> {
    let checkpoint = reader.bit_offset();

    let tail_start = frame
        .len()
        .checked_sub(TAIL_BYTES)
        .filter(|start| *start * 8 >= checkpoint)
        .ok_or(CodecError::TruncatedStream {
            needed: checkpoint + TAIL_BYTES * 8,
            remaining: frame.len() * 8,
        })?;

    let mut tail_reader = BitReader::new(frame);
    tail_reader.seek(tail_start * 8)?;
    let tail = read_tail(&mut tail_reader)?;

    let vitals = if vitals_present {
        let config = schemas.lookup(tail.unit_type)?;
        reader.seek(checkpoint)?;
        Some(read_vitals(&mut reader, config)?)
    } else {
        None
    };
    reader.align_to_byte();

    let end = reader.bit_offset() / 8;
    if end > tail_start {
        return Err(CodecError::TruncatedStream {
            needed: end * 8 + TAIL_BYTES * 8,
            remaining: frame.len() * 8,
        });
    }
    if end < tail_start {
        return Err(CodecError::TrailingBytes {
            count: tail_start - end,
        });
    }

    Ok(tail.into_packet(timestamp, vitals))
}

fn write_vitals(
    writer: &mut BitWriter,
    vitals: &Vitals,
    config: &UnitConfig,
) -> Result<(), CodecError> {
    writer.write_field("weapon_id", config.weapon_bits, vitals.weapon_id)?;
    writer.write_field("health_mult", config.health_bits, vitals.health_mult)?;
    writer.write_field("energy_mult", config.energy_bits, vitals.energy_mult)?;

    // Fields the config does not carry are zero-width and never written
    if config.has_firing_mask {
        let mask = vitals
            .firing_mask
            .ok_or(CodecError::MissingVitalsField("firing_mask"))?;
        writer.write_field("firing_mask", config.firing_mask_bits, mask)?;
    }

    if config.has_extras {
        let a = vitals
            .extra_a
            .ok_or(CodecError::MissingVitalsField("extra_a"))?;
        let b = vitals
            .extra_b
            .ok_or(CodecError::MissingVitalsField("extra_b"))?;
        writer.write_field("extra_a", config.extra_bits, a)?;
        writer.write_field("extra_b", config.extra_bits, b)?;
    }

    Ok(())
}

fn write_vec3(writer: &mut BitWriter, v: Vec3) -> Result<(), CodecError> {
    writer.write_f32_le(v.x)?;
    writer.write_f32_le(v.y)?;
    writer.write_f32_le(v.z)
}

pub fn encode_tank_state(
    packet: &TankStatePacket,
    schemas: &UnitSchemaRegistry,
) -> Result<Vec<u8>, CodecError> {
    let state = &packet.state;
    let mut writer = BitWriter::with_capacity(HEADER_BYTES + 8 + TAIL_BYTES);

    writer.write_u8(OPCODE_TANK_STATE)?;
    writer.write_u32_le(packet.timestamp)?;

    match &state.vitals {
        Some(vitals) => {
            let config = schemas.lookup(state.unit_type)?;
            writer.write_bool(true)?;
            write_vitals(&mut writer, vitals, config)?;
        }
        None => writer.write_bool(false)?,
    }
    writer.align_to_byte();

    writer.write_u32_le(state.unit_type)?;
    writer.write_u32_le(state.net_id)?;
    writer.write_u8(state.flags)?;
    write_vec3(&mut writer, state.position)?;
    write_vec3(&mut writer, state.velocity)?;

    Ok(writer.into_bytes())
}
