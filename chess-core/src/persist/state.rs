//! Sections making up a persisted game.
//!
//! Each collaborator owns one section and encodes it with explicit field
//! widths. Sections are written and read back in a fixed order; see
//! [`PersistentGameState`].

use heapless::Vec;

use super::codec::{ByteReader, ByteWriter, CodecError};
use crate::clock::SpeedTier;

/// Longest game history kept in backup memory, in half-moves.
pub const MAX_HISTORY_MOVES: usize = 1_024;
/// Redo entries kept after taking moves back.
pub const MAX_REDO_MOVES: usize = 256;

/// One collaborator's slice of the persisted state.
pub trait StateSection: Sized {
    /// Upper bound of the encoded size in bytes.
    const MAX_LEN: usize;

    fn serialize_into(&self, writer: &mut ByteWriter<'_>) -> Result<(), CodecError>;

    fn restore_from(reader: &mut ByteReader<'_>) -> Result<Self, CodecError>;
}

fn write_tier(writer: &mut ByteWriter<'_>, tier: Option<SpeedTier>) -> Result<(), CodecError> {
    writer.write_u8(tier.map_or(0xFF, SpeedTier::code))
}

fn read_tier(reader: &mut ByteReader<'_>) -> Result<Option<SpeedTier>, CodecError> {
    match reader.read_u8()? {
        0xFF => Ok(None),
        code => SpeedTier::from_code(code)
            .map(Some)
            .ok_or(CodecError::InvalidValue),
    }
}

/// User hardware settings.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct HardwareConfig {
    /// Underclock ceiling chosen by the user.
    pub throttle: Option<SpeedTier>,
    /// Tier requested while the engine is thinking.
    pub thinking_tier: SpeedTier,
    pub sound: bool,
    pub backlight_always_on: bool,
    pub contrast: u8,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            throttle: None,
            thinking_tier: SpeedTier::Mhz168,
            sound: true,
            backlight_always_on: false,
            contrast: 8,
        }
    }
}

impl StateSection for HardwareConfig {
    const MAX_LEN: usize = 5;

    fn serialize_into(&self, writer: &mut ByteWriter<'_>) -> Result<(), CodecError> {
        write_tier(writer, self.throttle)?;
        write_tier(writer, Some(self.thinking_tier))?;
        writer.write_bool(self.sound)?;
        writer.write_bool(self.backlight_always_on)?;
        writer.write_u8(self.contrast)
    }

    fn restore_from(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            throttle: read_tier(reader)?,
            thinking_tier: read_tier(reader)?.ok_or(CodecError::InvalidValue)?,
            sound: reader.read_bool()?,
            backlight_always_on: reader.read_bool()?,
            contrast: reader.read_u8()?,
        })
    }
}

/// Session and game clocks.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct TimingState {
    pub session_ms: u32,
    pub white_ms: u32,
    pub black_ms: u32,
    pub increment_ms: u32,
    pub moves_to_go: u16,
}

impl StateSection for TimingState {
    const MAX_LEN: usize = 18;

    fn serialize_into(&self, writer: &mut ByteWriter<'_>) -> Result<(), CodecError> {
        writer.write_u32(self.session_ms)?;
        writer.write_u32(self.white_ms)?;
        writer.write_u32(self.black_ms)?;
        writer.write_u32(self.increment_ms)?;
        writer.write_u16(self.moves_to_go)
    }

    fn restore_from(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            session_ms: reader.read_u32()?,
            white_ms: reader.read_u32()?,
            black_ms: reader.read_u32()?,
            increment_ms: reader.read_u32()?,
            moves_to_go: reader.read_u16()?,
        })
    }
}

/// Move notation preferences.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct NotationState {
    pub figurine: bool,
    pub long_algebraic: bool,
    pub language: u8,
}

impl StateSection for NotationState {
    const MAX_LEN: usize = 3;

    fn serialize_into(&self, writer: &mut ByteWriter<'_>) -> Result<(), CodecError> {
        writer.write_bool(self.figurine)?;
        writer.write_bool(self.long_algebraic)?;
        writer.write_u8(self.language)
    }

    fn restore_from(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            figurine: reader.read_bool()?,
            long_algebraic: reader.read_bool()?,
            language: reader.read_u8()?,
        })
    }
}

/// Playing level and time control selected in the menu.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct MenuTiming {
    pub level: u8,
    pub time_control: u8,
    pub move_time_ms: u32,
}

impl StateSection for MenuTiming {
    const MAX_LEN: usize = 6;

    fn serialize_into(&self, writer: &mut ByteWriter<'_>) -> Result<(), CodecError> {
        writer.write_u8(self.level)?;
        writer.write_u8(self.time_control)?;
        writer.write_u32(self.move_time_ms)
    }

    fn restore_from(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            level: reader.read_u8()?,
            time_control: reader.read_u8()?,
            move_time_ms: reader.read_u32()?,
        })
    }
}

/// Played moves and the redo stack, as packed from/to square pairs.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MoveHistory {
    pub moves: Vec<u16, MAX_HISTORY_MOVES>,
    pub redo: Vec<u16, MAX_REDO_MOVES>,
}

impl StateSection for MoveHistory {
    const MAX_LEN: usize = 2 + 2 * MAX_HISTORY_MOVES + 2 + 2 * MAX_REDO_MOVES;

    fn serialize_into(&self, writer: &mut ByteWriter<'_>) -> Result<(), CodecError> {
        writer.write_u16_slice(&self.moves)?;
        writer.write_u16_slice(&self.redo)
    }

    fn restore_from(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let mut history = Self::default();
        reader.read_u16_vec(&mut history.moves)?;
        reader.read_u16_vec(&mut history.redo)?;
        Ok(history)
    }
}

pub const NO_EN_PASSANT: u8 = 0xFF;

/// Board and search snapshot so an interrupted game resumes as it was.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PositionSnapshot {
    /// Piece codes, a1 first.
    pub board: [u8; 64],
    pub white_to_move: bool,
    pub castling: u8,
    pub en_passant: u8,
    pub halfmove_clock: u8,
    pub fullmove_number: u16,
    pub last_eval: i16,
    pub last_depth: u8,
}

impl Default for PositionSnapshot {
    fn default() -> Self {
        Self {
            board: [0; 64],
            white_to_move: true,
            castling: 0x0F,
            en_passant: NO_EN_PASSANT,
            halfmove_clock: 0,
            fullmove_number: 1,
            last_eval: 0,
            last_depth: 0,
        }
    }
}

impl StateSection for PositionSnapshot {
    const MAX_LEN: usize = 64 + 1 + 1 + 1 + 1 + 2 + 2 + 1;

    fn serialize_into(&self, writer: &mut ByteWriter<'_>) -> Result<(), CodecError> {
        writer.write_bytes(&self.board)?;
        writer.write_bool(self.white_to_move)?;
        writer.write_u8(self.castling)?;
        writer.write_u8(self.en_passant)?;
        writer.write_u8(self.halfmove_clock)?;
        writer.write_u16(self.fullmove_number)?;
        writer.write_i16(self.last_eval)?;
        writer.write_u8(self.last_depth)
    }

    fn restore_from(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let mut board = [0u8; 64];
        board.copy_from_slice(reader.read_bytes(64)?);
        let white_to_move = reader.read_bool()?;
        let castling = reader.read_u8()?;
        let en_passant = reader.read_u8()?;
        if en_passant != NO_EN_PASSANT && en_passant >= 64 {
            return Err(CodecError::InvalidValue);
        }
        Ok(Self {
            board,
            white_to_move,
            castling,
            en_passant,
            halfmove_clock: reader.read_u8()?,
            fullmove_number: reader.read_u16()?,
            last_eval: reader.read_i16()?,
            last_depth: reader.read_u8()?,
        })
    }
}

/// Everything written to backup memory, in section order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PersistentGameState {
    pub hardware: HardwareConfig,
    pub timing: TimingState,
    pub notation: NotationState,
    pub menu: MenuTiming,
    pub history: MoveHistory,
    pub position: PositionSnapshot,
}

impl StateSection for PersistentGameState {
    const MAX_LEN: usize = HardwareConfig::MAX_LEN
        + TimingState::MAX_LEN
        + NotationState::MAX_LEN
        + MenuTiming::MAX_LEN
        + MoveHistory::MAX_LEN
        + PositionSnapshot::MAX_LEN;

    fn serialize_into(&self, writer: &mut ByteWriter<'_>) -> Result<(), CodecError> {
        self.hardware.serialize_into(writer)?;
        self.timing.serialize_into(writer)?;
        self.notation.serialize_into(writer)?;
        self.menu.serialize_into(writer)?;
        self.history.serialize_into(writer)?;
        self.position.serialize_into(writer)
    }

    fn restore_from(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            hardware: HardwareConfig::restore_from(reader)?,
            timing: TimingState::restore_from(reader)?,
            notation: NotationState::restore_from(reader)?,
            menu: MenuTiming::restore_from(reader)?,
            history: MoveHistory::restore_from(reader)?,
            position: PositionSnapshot::restore_from(reader)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hardware_config_rejects_unknown_tier() {
        let mut reader = ByteReader::new(&[0x42, 6, 1, 0, 8]);
        assert_eq!(
            HardwareConfig::restore_from(&mut reader),
            Err(CodecError::InvalidValue)
        );
    }

    #[test]
    fn snapshot_rejects_off_board_en_passant() {
        let mut bytes = [0u8; PositionSnapshot::MAX_LEN];
        bytes[64] = 1;
        bytes[66] = 70;
        let mut reader = ByteReader::new(&bytes);
        assert_eq!(
            PositionSnapshot::restore_from(&mut reader),
            Err(CodecError::InvalidValue)
        );
    }

    #[test]
    fn encoded_sections_fit_their_bound() {
        let mut state = PersistentGameState::default();
        for index in 0..MAX_HISTORY_MOVES {
            state.history.moves.push(u16::try_from(index).unwrap()).unwrap();
        }
        for index in 0..MAX_REDO_MOVES {
            state.history.redo.push(u16::try_from(index).unwrap()).unwrap();
        }
        let mut buf = [0u8; PersistentGameState::MAX_LEN];
        let mut writer = ByteWriter::new(&mut buf);
        state.serialize_into(&mut writer).unwrap();
        assert_eq!(writer.position(), PersistentGameState::MAX_LEN);
    }
}
