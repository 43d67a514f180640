//! `0x40` Keep-Alive: a bare opcode byte, used only as a liveness signal.

use super::{CodecEntry, DecodeContext};
use crate::error::CodecError;
use crate::unit_schema::UnitSchemaRegistry;
use crate::{Packet, OPCODE_KEEP_ALIVE};

pub const ENTRY: CodecEntry = CodecEntry {
    opcode: OPCODE_KEEP_ALIVE,
    name: "KeepAlive",
    decode,
    encode,
};

fn decode(frame: &[u8], _ctx: &DecodeContext<'_>) -> Result<Packet, CodecError> {
    match frame {
        [] => Err(CodecError::EmptyFrame),
        [OPCODE_KEEP_ALIVE] => Ok(Packet::KeepAlive),
        [OPCODE_KEEP_ALIVE, rest @ ..] => Err(CodecError::TrailingBytes { count: rest.len() }),
        [found, ..] => Err(CodecError::OpcodeMismatch {
            expected: OPCODE_KEEP_ALIVE,
            found: *found,
        }),
    }
}

fn encode(packet: &Packet, _schemas: &UnitSchemaRegistry) -> Result<Vec<u8>, CodecError> {
    match packet {
        Packet::KeepAlive => Ok(vec![OPCODE_KEEP_ALIVE]),
        other => Err(CodecError::OpcodeMismatch {
            expected: OPCODE_KEEP_ALIVE,
            found: other.opcode(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keep_alive() {
        let schemas = UnitSchemaRegistry::new();
        let ctx = DecodeContext::hinted(&schemas, None);

        assert_eq!(decode(&[0x40], &ctx), Ok(Packet::KeepAlive));
        assert_eq!(
            decode(&[0x40, 0, 0], &ctx),
            Err(CodecError::TrailingBytes { count: 2 })
        );
        assert_eq!(encode(&Packet::KeepAlive, &schemas), Ok(vec![0x40]));
    }
}
