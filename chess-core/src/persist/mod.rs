//! CRC-protected game record in battery-backed memory.
//!
//! Record layout, little endian:
//!
//! | offset | size | field |
//! |--------|------|-------|
//! | 0 | 2 | magic `0xC8E5` |
//! | 2 | 1 | format version |
//! | 3 | 1 | save mode (0 auto, 1 manual) |
//! | 4 | 2 | payload length |
//! | 6 | n | payload (sections in order) |
//! | 6+n | 4 | CRC-32 over header and payload |
//!
//! The record is staged on the stack and copied into backup memory in one
//! pass with interrupts masked, so a power cut leaves either the old record or
//! a record whose checksum fails.

pub mod codec;
pub mod state;

use core::fmt;

use crate::clock::SpeedControl;
use crate::hal::BackupMemory;

pub use codec::{ByteReader, ByteWriter, CodecError};
pub use state::{
    HardwareConfig, MenuTiming, MoveHistory, NotationState, PersistentGameState,
    PositionSnapshot, StateSection, TimingState,
};

pub const RECORD_MAGIC: u16 = 0xC8E5;
pub const RECORD_VERSION: u8 = 1;
pub const HEADER_LEN: usize = 6;
pub const CRC_LEN: usize = 4;
/// Size of the battery-backed region.
pub const BACKUP_CAPACITY: usize = 4_096;
pub const MAX_PAYLOAD_LEN: usize = PersistentGameState::MAX_LEN;
pub const MAX_RECORD_LEN: usize = HEADER_LEN + MAX_PAYLOAD_LEN + CRC_LEN;

const _: () = assert!(MAX_RECORD_LEN <= BACKUP_CAPACITY);
const _: () = assert!(MAX_PAYLOAD_LEN <= u16::MAX as usize);

const SELF_TEST_PATTERNS: [u8; 2] = [0x55, 0xAA];
const SELF_TEST_CHUNK: usize = 64;

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SaveMode {
    /// Written after every move; suppressed once the user saved manually.
    Auto = 0,
    Manual = 1,
}

impl SaveMode {
    const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(SaveMode::Auto),
            1 => Some(SaveMode::Manual),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SaveError {
    /// An automatic save was requested after a manual save.
    AutosaveDisabled,
    Encode(CodecError),
}

impl fmt::Display for SaveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaveError::AutosaveDisabled => f.write_str("autosave disabled"),
            SaveError::Encode(err) => write!(f, "encode failed: {err}"),
        }
    }
}

impl From<CodecError> for SaveError {
    fn from(err: CodecError) -> Self {
        SaveError::Encode(err)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LoadError {
    /// Length out of range, checksum mismatch or foreign magic.
    NoRecord,
    /// Checksum valid but written by another firmware format.
    UnsupportedVersion(u8),
    /// Checksum valid but the sections do not decode.
    Malformed(CodecError),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::NoRecord => f.write_str("no saved game"),
            LoadError::UnsupportedVersion(version) => {
                write!(f, "unsupported record version {version}")
            }
            LoadError::Malformed(err) => write!(f, "malformed record: {err}"),
        }
    }
}

/// A decoded record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LoadedGame {
    pub mode: SaveMode,
    pub state: PersistentGameState,
}

/// Outcome of the boot-time restore.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BootRestore {
    Restored(LoadedGame),
    /// No valid record, but the memory itself works.
    NoSavedGame,
    /// The memory failed its pattern test.
    MemoryFault,
}

/// Owner of the single backup record slot.
pub struct PersistentStore<B> {
    memory: B,
    autosave_enabled: bool,
}

impl<B: BackupMemory> PersistentStore<B> {
    #[must_use]
    pub fn new(memory: B) -> Self {
        Self {
            memory,
            autosave_enabled: true,
        }
    }

    #[must_use]
    pub fn autosave_enabled(&self) -> bool {
        self.autosave_enabled
    }

    /// Re-enables autosave, typically when a new game starts.
    pub fn enable_autosave(&mut self) {
        self.autosave_enabled = true;
    }

    /// Writes `state` and returns the record length.
    ///
    /// The clock is held at the save tier while encoding and copying so the
    /// write window stays short. Nothing touches backup memory when the
    /// request is refused or encoding fails.
    pub fn save<S: SpeedControl>(
        &mut self,
        state: &PersistentGameState,
        mode: SaveMode,
        speed: &mut S,
    ) -> Result<usize, SaveError> {
        if mode == SaveMode::Auto && !self.autosave_enabled {
            return Err(SaveError::AutosaveDisabled);
        }

        let previous = speed.boost();
        let mut staging = [0u8; MAX_RECORD_LEN];
        let result = encode_record(state, mode, &mut staging);
        if let Ok(len) = result {
            let memory = &mut self.memory;
            critical_section::with(|_| memory.write(0, &staging[..len]));
        }
        if let Some(previous) = previous {
            speed.restore(previous);
        }

        let len = result?;
        if mode == SaveMode::Manual {
            self.autosave_enabled = false;
        }
        Ok(len)
    }

    /// Reads and validates the stored record.
    ///
    /// Restoring a manual save keeps autosave off so the manual save point
    /// survives until a new game starts.
    pub fn load(&mut self) -> Result<LoadedGame, LoadError> {
        let mut staging = [0u8; MAX_RECORD_LEN];
        self.memory.read(0, &mut staging[..HEADER_LEN]);
        let payload_len = usize::from(u16::from_le_bytes([staging[4], staging[5]]));
        if payload_len > MAX_PAYLOAD_LEN {
            return Err(LoadError::NoRecord);
        }

        let body_len = HEADER_LEN + payload_len;
        self.memory
            .read(HEADER_LEN, &mut staging[HEADER_LEN..body_len + CRC_LEN]);
        let stored_crc = u32::from_le_bytes([
            staging[body_len],
            staging[body_len + 1],
            staging[body_len + 2],
            staging[body_len + 3],
        ]);
        if crc32fast::hash(&staging[..body_len]) != stored_crc {
            return Err(LoadError::NoRecord);
        }

        if u16::from_le_bytes([staging[0], staging[1]]) != RECORD_MAGIC {
            return Err(LoadError::NoRecord);
        }
        if staging[2] != RECORD_VERSION {
            return Err(LoadError::UnsupportedVersion(staging[2]));
        }
        let mode = SaveMode::from_code(staging[3])
            .ok_or(LoadError::Malformed(CodecError::InvalidValue))?;

        let mut reader = ByteReader::new(&staging[HEADER_LEN..body_len]);
        let state = PersistentGameState::restore_from(&mut reader).map_err(LoadError::Malformed)?;
        reader.finish().map_err(LoadError::Malformed)?;

        self.autosave_enabled = mode == SaveMode::Auto;
        Ok(LoadedGame { mode, state })
    }

    /// Pattern test over the whole region; leaves it zeroed.
    pub fn self_test(&mut self) -> bool {
        let capacity = self.memory.capacity().min(BACKUP_CAPACITY);
        let mut ok = true;
        for pattern in SELF_TEST_PATTERNS {
            ok &= self.fill_and_verify(capacity, pattern);
        }
        self.fill(capacity, 0);
        ok
    }

    fn fill(&mut self, capacity: usize, value: u8) {
        let chunk = [value; SELF_TEST_CHUNK];
        let mut offset = 0;
        while offset < capacity {
            let len = SELF_TEST_CHUNK.min(capacity - offset);
            self.memory.write(offset, &chunk[..len]);
            offset += len;
        }
    }

    fn fill_and_verify(&mut self, capacity: usize, pattern: u8) -> bool {
        self.fill(capacity, pattern);
        let mut readback = [0u8; SELF_TEST_CHUNK];
        let mut offset = 0;
        while offset < capacity {
            let len = SELF_TEST_CHUNK.min(capacity - offset);
            self.memory.read(offset, &mut readback[..len]);
            if readback[..len].iter().any(|byte| *byte != pattern) {
                return false;
            }
            offset += len;
        }
        true
    }

    /// Boot path: restore the saved game, or tell an empty store from a
    /// broken one.
    pub fn restore_at_boot(&mut self) -> BootRestore {
        match self.load() {
            Ok(game) => BootRestore::Restored(game),
            Err(_) if self.self_test() => BootRestore::NoSavedGame,
            Err(_) => BootRestore::MemoryFault,
        }
    }

    /// Invalidates the stored record.
    pub fn erase(&mut self) {
        let header = [0u8; HEADER_LEN + CRC_LEN];
        let memory = &mut self.memory;
        critical_section::with(|_| memory.write(0, &header));
    }

    #[must_use]
    pub fn memory(&self) -> &B {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut B {
        &mut self.memory
    }
}

/// Serializes header, payload and checksum into `out`; returns the length.
pub fn encode_record(
    state: &PersistentGameState,
    mode: SaveMode,
    out: &mut [u8],
) -> Result<usize, CodecError> {
    let payload_len = {
        let payload = out.get_mut(HEADER_LEN..).ok_or(CodecError::BufferFull)?;
        let mut writer = ByteWriter::new(payload);
        state.serialize_into(&mut writer)?;
        writer.position()
    };

    let mut header = ByteWriter::new(out);
    header.write_u16(RECORD_MAGIC)?;
    header.write_u8(RECORD_VERSION)?;
    header.write_u8(mode as u8)?;
    header.write_u16(u16::try_from(payload_len).map_err(|_| CodecError::InvalidValue)?)?;

    let body_len = HEADER_LEN + payload_len;
    let crc = crc32fast::hash(&out[..body_len]);
    out.get_mut(body_len..body_len + CRC_LEN)
        .ok_or(CodecError::BufferFull)?
        .copy_from_slice(&crc.to_le_bytes());
    Ok(body_len + CRC_LEN)
}
