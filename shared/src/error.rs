//! Errors produced while encoding or decoding a single frame.
//!
//! Every variant is scoped to exactly one frame. None of them are fatal to
//! the server: the offending frame is dropped and the shared state is left
//! untouched.

/// Failure while moving a frame between bytes and typed packets
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("Truncated stream: needed {needed} bits, {remaining} remaining")]
    TruncatedStream { needed: usize, remaining: usize },

    #[error("Value {value} of field `{field}` does not fit in {bits} bits")]
    ValueOutOfRange {
        field: &'static str,
        value: u32,
        bits: u32,
    },

    #[error("Invalid bit width {0}, expected 1..=32")]
    InvalidBitWidth(u32),

    #[error("Fixed-width field accessed at unaligned bit offset {bit_offset}")]
    Misaligned { bit_offset: usize },

    #[error("No schema registered for unit type {0}")]
    UnknownUnitType(u32),

    #[error("Vitals present but no unit type hint available")]
    SchemaUnresolved,

    #[error("Decoded against unit type {hinted} but frame carries unit type {actual}")]
    SchemaMismatch { hinted: u32, actual: u32 },

    #[error("Unknown opcode 0x{0:02X}")]
    UnknownOpcode(u8),

    #[error("Expected opcode 0x{expected:02X}, found 0x{found:02X}")]
    OpcodeMismatch { expected: u8, found: u8 },

    #[error("Empty frame")]
    EmptyFrame,

    #[error("{count} trailing bytes after end of packet")]
    TrailingBytes { count: usize },

    #[error("Vitals field `{0}` required by unit config is missing")]
    MissingVitalsField(&'static str),
}

impl CodecError {
    /// Whether the failure is the schema ordering hazard that a replay decode
    /// can resolve.
    pub fn needs_replay(&self) -> bool {
        matches!(
            self,
            CodecError::SchemaUnresolved | CodecError::SchemaMismatch { .. }
        )
    }
}
