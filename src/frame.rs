use crate::error::Error;

/// WebSocket opcodes recognized by RFC 6455. Any other 4-bit value is a protocol error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    pub fn from_byte(byte: u8) -> Result<Self, Error> {
        match byte {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            _ => Err(Error::InvalidOpcode),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }

    pub fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }

    pub fn is_data(self) -> bool {
        matches!(self, OpCode::Text | OpCode::Binary)
    }
}

/// A fully decoded inbound frame, already unmasked. `masked` records whether the frame
/// arrived masked on the wire, which `Connection` needs to enforce the per-role masking
/// direction (I5) — the payload itself is never left masked once decoded.
#[derive(Debug, Clone)]
pub struct Frame {
    pub fin: bool,
    pub opcode: OpCode,
    pub payload: Vec<u8>,
    pub masked: bool,
}

impl Frame {
    pub fn new(fin: bool, opcode: OpCode, payload: Vec<u8>, masked: bool) -> Self {
        Self {
            fin,
            opcode,
            payload,
            masked,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_round_trips_through_byte() {
        for (byte, op) in [
            (0x0, OpCode::Continuation),
            (0x1, OpCode::Text),
            (0x2, OpCode::Binary),
            (0x8, OpCode::Close),
            (0x9, OpCode::Ping),
            (0xA, OpCode::Pong),
        ] {
            assert_eq!(OpCode::from_byte(byte).unwrap(), op);
            assert_eq!(op.as_u8(), byte);
        }
    }

    #[test]
    fn unrecognized_opcode_is_an_error() {
        assert!(OpCode::from_byte(0x3).is_err());
        assert!(OpCode::from_byte(0xB).is_err());
        assert!(OpCode::from_byte(0xF).is_err());
    }

    #[test]
    fn control_and_data_classes_are_disjoint() {
        assert!(OpCode::Close.is_control());
        assert!(OpCode::Ping.is_control());
        assert!(OpCode::Pong.is_control());
        assert!(!OpCode::Text.is_control());
        assert!(!OpCode::Binary.is_control());
        assert!(!OpCode::Continuation.is_control());

        assert!(OpCode::Text.is_data());
        assert!(OpCode::Binary.is_data());
        assert!(!OpCode::Continuation.is_data());
        assert!(!OpCode::Close.is_data());
    }
}
