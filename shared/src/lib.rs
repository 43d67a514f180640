//! Wire-level building blocks shared by the server and the test client:
//! bit cursors, unit schemas, the tank data model and the opcode codec table.

pub mod bit_cursor;
pub mod codec;
pub mod envelope;
pub mod error;
pub mod hexdump;
pub mod unit_schema;

pub use bit_cursor::{BitReader, BitWriter};
pub use codec::{DecodeContext, PacketCodec, SchemaSource};
pub use error::CodecError;
pub use unit_schema::{SchemaLoadError, UnitConfig, UnitSchemaRegistry};

pub const OPCODE_TANK_STATE: u8 = 0x18;
pub const OPCODE_KEEP_ALIVE: u8 = 0x40;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Optional weapon/health/energy block of a Tank State packet.
///
/// `firing_mask` is present iff the unit config has a firing mask, and
/// `extra_a`/`extra_b` iff it has extras. Presence is never signalled in the
/// packet itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Vitals {
    pub weapon_id: u32,
    pub health_mult: u32,
    pub energy_mult: u32,
    pub firing_mask: Option<u32>,
    pub extra_a: Option<u32>,
    pub extra_b: Option<u32>,
}

/// State of one networked tank, keyed by `net_id`.
///
/// A decoded packet always carries the non-vitals fields. `vitals` is `None`
/// when the packet's presence bit was clear.
#[derive(Debug, Clone, PartialEq)]
pub struct TankState {
    pub net_id: u32,
    pub unit_type: u32,
    pub flags: u8,
    pub position: Vec3,
    pub velocity: Vec3,
    pub vitals: Option<Vitals>,
}

impl TankState {
    pub fn new(net_id: u32, unit_type: u32) -> Self {
        Self {
            net_id,
            unit_type,
            flags: 0,
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            vitals: None,
        }
    }
}

/// Decoded `0x18` frame
#[derive(Debug, Clone, PartialEq)]
pub struct TankStatePacket {
    /// Sender's tick counter, opaque to this crate
    pub timestamp: u32,
    pub state: TankState,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    TankState(TankStatePacket),
    KeepAlive,
}

impl Packet {
    pub fn opcode(&self) -> u8 {
        match self {
            Packet::TankState(_) => OPCODE_TANK_STATE,
            Packet::KeepAlive => OPCODE_KEEP_ALIVE,
        }
    }
}
