//! Preset (`.fxp`) and bank (`.fxb`) files.
//!
//! Both formats are big-endian. A file starts with the `CcnK` chunk magic
//! and the byte count of everything after that field, followed by a type
//! magic:
//!
//! | magic  | content                                   |
//! |--------|-------------------------------------------|
//! | `FxCk` | one program as parameter values           |
//! | `FPCh` | one program as an opaque plug-in chunk    |
//! | `FxBk` | every program, each an embedded `FxCk`    |
//! | `FBCh` | the whole bank as an opaque plug-in chunk |

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

use crate::error::HostError;
use crate::instance::{unique_id_string, ChunkKind, Vst2Plugin};

const CHUNK_MAGIC: [u8; 4] = *b"CcnK";
const PRESET_PARAMS_MAGIC: [u8; 4] = *b"FxCk";
const PRESET_CHUNK_MAGIC: [u8; 4] = *b"FPCh";
const BANK_PARAMS_MAGIC: [u8; 4] = *b"FxBk";
const BANK_CHUNK_MAGIC: [u8; 4] = *b"FBCh";

const PRESET_FORMAT_VERSION: i32 = 1;
const BANK_FORMAT_VERSION: i32 = 2;
const NAME_LEN: usize = 28;
const BANK_RESERVED_LEN: usize = 128;

#[derive(Debug, thiserror::Error)]
pub enum PresetError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("bad magic: expected {expected}, found {found:?}")]
    BadMagic { expected: &'static str, found: [u8; 4] },
    #[error("file truncated while reading {0}")]
    Truncated(&'static str),
    #[error("invalid {field}: {value}")]
    InvalidField { field: &'static str, value: i32 },
    #[error("file belongs to plugin {found}, expected {expected}")]
    PluginMismatch { expected: String, found: String },
    #[error("file was written by plugin version {found}, loaded plugin is version {expected}")]
    VersionMismatch { expected: i32, found: i32 },
    #[error("file stores {found} parameters, plugin has {expected}")]
    ParameterCountMismatch { expected: usize, found: usize },
    #[error("plugin does not accept opaque chunks")]
    ChunkUnsupported,
}

/// Identity fields common to presets and banks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresetFileInfo {
    pub unique_id: i32,
    pub plugin_version: i32,
    pub file_version: i32,
    /// Content is a plug-in chunk rather than parameter values.
    pub opaque: bool,
    pub is_bank: bool,
}

impl PresetFileInfo {
    /// Reads only the header of a preset or bank file.
    pub fn read_from(path: impl AsRef<Path>) -> Result<Self, PresetError> {
        let data = fs::read(path)?;
        let mut reader = ByteReader::new(&data);
        let magic = reader.read_chunk_header()?;
        let file_version = reader.read_i32("format version")?;
        let unique_id = reader.read_i32("plugin id")?;
        let plugin_version = reader.read_i32("plugin version")?;
        let (opaque, is_bank) = match magic {
            PRESET_PARAMS_MAGIC => (false, false),
            PRESET_CHUNK_MAGIC => (true, false),
            BANK_PARAMS_MAGIC => (false, true),
            BANK_CHUNK_MAGIC => (true, true),
            found => {
                return Err(PresetError::BadMagic {
                    expected: "FxCk, FPCh, FxBk or FBCh",
                    found,
                })
            }
        };
        Ok(Self {
            unique_id,
            plugin_version,
            file_version,
            opaque,
            is_bank,
        })
    }
}

/// Loading behavior for [`load_preset`] and [`load_bank`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PresetOptions {
    /// Accept files written by another version of the plug-in.
    pub ignore_plugin_version: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PresetData {
    Params(Vec<f32>),
    Chunk(Vec<u8>),
}

/// One program.
#[derive(Debug, Clone, PartialEq)]
pub struct Preset {
    pub name: String,
    pub unique_id: i32,
    pub plugin_version: i32,
    pub data: PresetData,
}

impl Preset {
    pub fn info(&self) -> PresetFileInfo {
        PresetFileInfo {
            unique_id: self.unique_id,
            plugin_version: self.plugin_version,
            file_version: PRESET_FORMAT_VERSION,
            opaque: matches!(self.data, PresetData::Chunk(_)),
            is_bank: false,
        }
    }

    pub fn read(mut reader: impl Read) -> Result<Self, PresetError> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Self::from_bytes(&data)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, PresetError> {
        Self::parse(&mut ByteReader::new(data))
    }

    fn parse(reader: &mut ByteReader<'_>) -> Result<Self, PresetError> {
        let magic = reader.read_chunk_header()?;
        if magic != PRESET_PARAMS_MAGIC && magic != PRESET_CHUNK_MAGIC {
            return Err(PresetError::BadMagic {
                expected: "FxCk or FPCh",
                found: magic,
            });
        }
        let _format_version = reader.read_i32("format version")?;
        let unique_id = reader.read_i32("plugin id")?;
        let plugin_version = reader.read_i32("plugin version")?;
        // Chunk presets still carry the plug-in's parameter count.
        let value_size = if magic == PRESET_PARAMS_MAGIC { 4 } else { 0 };
        let num_params = reader.read_count("parameter count", value_size)?;
        let name = reader.read_name()?;
        let data = if magic == PRESET_PARAMS_MAGIC {
            let mut params = Vec::with_capacity(num_params);
            for _ in 0..num_params {
                params.push(reader.read_f32()?);
            }
            PresetData::Params(params)
        } else {
            PresetData::Chunk(reader.read_sized_chunk()?)
        };
        Ok(Self {
            name,
            unique_id,
            plugin_version,
            data,
        })
    }

    pub fn write(&self, mut writer: impl Write) -> Result<(), PresetError> {
        writer.write_all(&self.to_bytes())?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let (magic, num_params) = match &self.data {
            PresetData::Params(params) => (PRESET_PARAMS_MAGIC, params.len()),
            PresetData::Chunk(_) => (PRESET_CHUNK_MAGIC, 0),
        };
        let mut out = ChunkWriter::begin(magic);
        out.i32(PRESET_FORMAT_VERSION);
        out.i32(self.unique_id);
        out.i32(self.plugin_version);
        out.i32(num_params as i32);
        out.name(&self.name);
        match &self.data {
            PresetData::Params(params) => params.iter().for_each(|&value| out.f32(value)),
            PresetData::Chunk(chunk) => out.sized_chunk(chunk),
        }
        out.finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BankData {
    Programs(Vec<Preset>),
    Chunk(Vec<u8>),
}

/// Every program of a plug-in.
#[derive(Debug, Clone, PartialEq)]
pub struct Bank {
    pub unique_id: i32,
    pub plugin_version: i32,
    pub num_programs: usize,
    pub current_program: i32,
    pub data: BankData,
}

impl Bank {
    pub fn info(&self) -> PresetFileInfo {
        PresetFileInfo {
            unique_id: self.unique_id,
            plugin_version: self.plugin_version,
            file_version: BANK_FORMAT_VERSION,
            opaque: matches!(self.data, BankData::Chunk(_)),
            is_bank: true,
        }
    }

    pub fn read(mut reader: impl Read) -> Result<Self, PresetError> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Self::from_bytes(&data)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, PresetError> {
        let mut reader = ByteReader::new(data);
        let magic = reader.read_chunk_header()?;
        if magic != BANK_PARAMS_MAGIC && magic != BANK_CHUNK_MAGIC {
            return Err(PresetError::BadMagic {
                expected: "FxBk or FBCh",
                found: magic,
            });
        }
        let format_version = reader.read_i32("format version")?;
        let unique_id = reader.read_i32("plugin id")?;
        let plugin_version = reader.read_i32("plugin version")?;
        let num_programs = reader.read_count("program count", 0)?;
        // Version 1 banks have no current program, all 128 bytes are reserved.
        let current_program = if format_version >= 2 {
            let current = reader.read_i32("current program")?;
            reader.skip(BANK_RESERVED_LEN - 4, "reserved bytes")?;
            current
        } else {
            reader.skip(BANK_RESERVED_LEN, "reserved bytes")?;
            0
        };
        let data = if magic == BANK_PARAMS_MAGIC {
            let mut programs = Vec::new();
            for _ in 0..num_programs {
                programs.push(Preset::parse(&mut reader)?);
            }
            BankData::Programs(programs)
        } else {
            BankData::Chunk(reader.read_sized_chunk()?)
        };
        Ok(Self {
            unique_id,
            plugin_version,
            num_programs,
            current_program,
            data,
        })
    }

    pub fn write(&self, mut writer: impl Write) -> Result<(), PresetError> {
        writer.write_all(&self.to_bytes())?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let (magic, num_programs) = match &self.data {
            BankData::Programs(programs) => (BANK_PARAMS_MAGIC, programs.len()),
            BankData::Chunk(_) => (BANK_CHUNK_MAGIC, self.num_programs),
        };
        let mut out = ChunkWriter::begin(magic);
        out.i32(BANK_FORMAT_VERSION);
        out.i32(self.unique_id);
        out.i32(self.plugin_version);
        out.i32(num_programs as i32);
        out.i32(self.current_program);
        out.zeros(BANK_RESERVED_LEN - 4);
        match &self.data {
            BankData::Programs(programs) => programs.iter().for_each(|program| out.bytes(&program.to_bytes())),
            BankData::Chunk(chunk) => out.sized_chunk(chunk),
        }
        out.finish()
    }
}

/// Captures the current program of `plugin`.
pub fn capture_preset(plugin: &Vst2Plugin) -> Result<Preset, HostError> {
    let data = if plugin.accepts_programs_as_chunks() {
        PresetData::Chunk(plugin.chunk(ChunkKind::Program)?)
    } else {
        PresetData::Params(current_params(plugin)?)
    };
    Ok(Preset {
        name: plugin.program_name(),
        unique_id: plugin.unique_id(),
        plugin_version: plugin.plugin_version(),
        data,
    })
}

/// Captures every program of `plugin`. For parameter banks each program is
/// selected in turn, and the current one is restored afterwards.
pub fn capture_bank(plugin: &Vst2Plugin) -> Result<Bank, HostError> {
    let current = plugin.program();
    let num_programs = plugin.num_programs();
    let data = if plugin.accepts_programs_as_chunks() {
        BankData::Chunk(plugin.chunk(ChunkKind::Bank)?)
    } else {
        let mut programs = Vec::with_capacity(num_programs);
        for index in 0..num_programs {
            plugin.set_program(index)?;
            programs.push(Preset {
                name: plugin.program_name(),
                unique_id: plugin.unique_id(),
                plugin_version: plugin.plugin_version(),
                data: PresetData::Params(current_params(plugin)?),
            });
        }
        if current < num_programs {
            plugin.set_program(current)?;
        }
        BankData::Programs(programs)
    };
    Ok(Bank {
        unique_id: plugin.unique_id(),
        plugin_version: plugin.plugin_version(),
        num_programs,
        current_program: current as i32,
        data,
    })
}

/// Applies `preset` to the current program of `plugin`.
pub fn apply_preset(plugin: &Vst2Plugin, preset: &Preset, options: PresetOptions) -> Result<(), HostError> {
    check_identity(plugin, preset.unique_id, preset.plugin_version, options)?;
    match &preset.data {
        PresetData::Chunk(chunk) => {
            if !plugin.accepts_programs_as_chunks() {
                return Err(PresetError::ChunkUnsupported.into());
            }
            plugin.set_chunk(ChunkKind::Program, chunk)?;
        }
        PresetData::Params(params) => apply_params(plugin, params)?,
    }
    plugin.set_program_name(&preset.name)
}

pub fn apply_bank(plugin: &Vst2Plugin, bank: &Bank, options: PresetOptions) -> Result<(), HostError> {
    check_identity(plugin, bank.unique_id, bank.plugin_version, options)?;
    match &bank.data {
        BankData::Chunk(chunk) => {
            if !plugin.accepts_programs_as_chunks() {
                return Err(PresetError::ChunkUnsupported.into());
            }
            plugin.set_chunk(ChunkKind::Bank, chunk)?;
        }
        BankData::Programs(programs) => {
            let count = programs.len().min(plugin.num_programs());
            for (index, program) in programs.iter().take(count).enumerate() {
                plugin.set_program(index)?;
                apply_preset(plugin, program, options)?;
            }
            let current = bank.current_program.max(0) as usize;
            if current < plugin.num_programs() {
                plugin.set_program(current)?;
            }
        }
    }
    Ok(())
}

pub fn save_preset(plugin: &Vst2Plugin, path: impl AsRef<Path>) -> Result<(), HostError> {
    let preset = capture_preset(plugin)?;
    write_file(path.as_ref(), &preset.to_bytes())?;
    tracing::debug!(path = %path.as_ref().display(), "preset saved");
    Ok(())
}

pub fn load_preset(plugin: &Vst2Plugin, path: impl AsRef<Path>, options: PresetOptions) -> Result<(), HostError> {
    let data = fs::read(path.as_ref()).map_err(PresetError::from)?;
    let preset = Preset::from_bytes(&data)?;
    apply_preset(plugin, &preset, options)?;
    tracing::debug!(path = %path.as_ref().display(), name = %preset.name, "preset loaded");
    Ok(())
}

pub fn save_bank(plugin: &Vst2Plugin, path: impl AsRef<Path>) -> Result<(), HostError> {
    let bank = capture_bank(plugin)?;
    write_file(path.as_ref(), &bank.to_bytes())?;
    tracing::debug!(path = %path.as_ref().display(), programs = bank.num_programs, "bank saved");
    Ok(())
}

pub fn load_bank(plugin: &Vst2Plugin, path: impl AsRef<Path>, options: PresetOptions) -> Result<(), HostError> {
    let data = fs::read(path.as_ref()).map_err(PresetError::from)?;
    let bank = Bank::from_bytes(&data)?;
    apply_bank(plugin, &bank, options)?;
    tracing::debug!(path = %path.as_ref().display(), programs = bank.num_programs, "bank loaded");
    Ok(())
}

/// Human readable dump of the current program.
pub fn write_preset_text(plugin: &Vst2Plugin, mut writer: impl Write) -> Result<(), HostError> {
    writeln!(writer, "plugin: {} ({})", plugin.effect_name(), plugin.unique_id_string())?;
    writeln!(writer, "version: {}", plugin.plugin_version())?;
    writeln!(writer, "program: {}", plugin.program_name())?;
    for index in 0..plugin.num_params() {
        let value = plugin.parameter(index)?;
        let name = plugin.parameter_name(index)?;
        let display = plugin.parameter_display(index)?;
        let label = plugin.parameter_label(index)?;
        writeln!(writer, "{index:>4}  {name:<24} {value:.6}  {display} {label}")?;
    }
    Ok(())
}

fn current_params(plugin: &Vst2Plugin) -> Result<Vec<f32>, HostError> {
    (0..plugin.num_params()).map(|index| plugin.parameter(index)).collect()
}

fn apply_params(plugin: &Vst2Plugin, params: &[f32]) -> Result<(), HostError> {
    if params.len() != plugin.num_params() {
        return Err(PresetError::ParameterCountMismatch {
            expected: plugin.num_params(),
            found: params.len(),
        }
        .into());
    }
    for (index, &value) in params.iter().enumerate() {
        plugin.set_parameter(index, value)?;
    }
    Ok(())
}

fn check_identity(plugin: &Vst2Plugin, unique_id: i32, plugin_version: i32, options: PresetOptions) -> Result<(), PresetError> {
    if unique_id != plugin.unique_id() {
        return Err(PresetError::PluginMismatch {
            expected: plugin.unique_id_string(),
            found: unique_id_string(unique_id),
        });
    }
    if !options.ignore_plugin_version && plugin_version != plugin.plugin_version() {
        return Err(PresetError::VersionMismatch {
            expected: plugin.plugin_version(),
            found: plugin_version,
        });
    }
    Ok(())
}

fn write_file(path: &Path, data: &[u8]) -> Result<(), PresetError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, data)?;
    Ok(())
}

impl From<io::Error> for HostError {
    fn from(err: io::Error) -> Self {
        HostError::Preset(PresetError::Io(err))
    }
}

struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, len: usize, what: &'static str) -> Result<&'a [u8], PresetError> {
        if len > self.remaining() {
            return Err(PresetError::Truncated(what));
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn skip(&mut self, len: usize, what: &'static str) -> Result<(), PresetError> {
        self.take(len, what).map(|_| ())
    }

    fn read_magic(&mut self, what: &'static str) -> Result<[u8; 4], PresetError> {
        let bytes = self.take(4, what)?;
        Ok([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    fn read_i32(&mut self, what: &'static str) -> Result<i32, PresetError> {
        self.read_magic(what).map(i32::from_be_bytes)
    }

    fn read_f32(&mut self) -> Result<f32, PresetError> {
        self.read_magic("parameter value").map(f32::from_be_bytes)
    }

    /// Reads a count and checks the file can hold `count * item_size` more
    /// bytes before anything is allocated for it.
    fn read_count(&mut self, field: &'static str, item_size: usize) -> Result<usize, PresetError> {
        let value = self.read_i32(field)?;
        if value < 0 {
            return Err(PresetError::InvalidField { field, value });
        }
        let count = value as usize;
        if count.saturating_mul(item_size) > self.remaining() {
            return Err(PresetError::Truncated(field));
        }
        Ok(count)
    }

    /// `CcnK` magic, byte size, then the type magic which is returned.
    fn read_chunk_header(&mut self) -> Result<[u8; 4], PresetError> {
        let magic = self.read_magic("chunk magic")?;
        if magic != CHUNK_MAGIC {
            return Err(PresetError::BadMagic {
                expected: "CcnK",
                found: magic,
            });
        }
        let _byte_size = self.read_i32("byte size")?;
        self.read_magic("type magic")
    }

    fn read_name(&mut self) -> Result<String, PresetError> {
        let bytes = self.take(NAME_LEN, "program name")?;
        let end = bytes.iter().position(|&byte| byte == 0).unwrap_or(bytes.len());
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    fn read_sized_chunk(&mut self) -> Result<Vec<u8>, PresetError> {
        let size = self.read_count("chunk size", 1)?;
        Ok(self.take(size, "chunk data")?.to_vec())
    }
}

struct ChunkWriter {
    out: Vec<u8>,
}

impl ChunkWriter {
    fn begin(magic: [u8; 4]) -> Self {
        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(&CHUNK_MAGIC);
        // Patched in `finish`.
        out.extend_from_slice(&0i32.to_be_bytes());
        out.extend_from_slice(&magic);
        Self { out }
    }

    fn i32(&mut self, value: i32) {
        self.out.extend_from_slice(&value.to_be_bytes());
    }

    fn f32(&mut self, value: f32) {
        self.out.extend_from_slice(&value.to_be_bytes());
    }

    fn bytes(&mut self, bytes: &[u8]) {
        self.out.extend_from_slice(bytes);
    }

    fn zeros(&mut self, len: usize) {
        self.out.resize(self.out.len() + len, 0);
    }

    /// Fixed 28 byte field, always NUL terminated.
    fn name(&mut self, name: &str) {
        let mut end = name.len().min(NAME_LEN - 1);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        let mut field = [0u8; NAME_LEN];
        field[..end].copy_from_slice(&name.as_bytes()[..end]);
        self.out.extend_from_slice(&field);
    }

    fn sized_chunk(&mut self, chunk: &[u8]) {
        self.i32(chunk.len() as i32);
        self.bytes(chunk);
    }

    fn finish(mut self) -> Vec<u8> {
        let byte_size = (self.out.len() - 8) as i32;
        self.out[4..8].copy_from_slice(&byte_size.to_be_bytes());
        self.out
    }
}

/// Feeds arbitrary bytes through both file parsers.
#[cfg(any(test, feature = "fuzzing"))]
pub fn fuzz_parse_preset(data: &[u8]) {
    if let Ok(preset) = Preset::from_bytes(data) {
        let _ = Preset::from_bytes(&preset.to_bytes());
    }
    if let Ok(bank) = Bank::from_bytes(data) {
        let _ = Bank::from_bytes(&bank.to_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params_preset() -> Preset {
        Preset {
            name: "Init".into(),
            unique_id: i32::from_be_bytes(*b"TsT1"),
            plugin_version: 3,
            data: PresetData::Params(vec![0.0, 0.25, 1.0]),
        }
    }

    #[test]
    fn preset_layout_matches_fxp() {
        let bytes = params_preset().to_bytes();
        assert_eq!(bytes.len(), 56 + 3 * 4);
        assert_eq!(&bytes[0..4], b"CcnK");
        assert_eq!(i32::from_be_bytes(bytes[4..8].try_into().unwrap()), bytes.len() as i32 - 8);
        assert_eq!(&bytes[8..12], b"FxCk");
        assert_eq!(&bytes[16..20], b"TsT1");
        assert_eq!(i32::from_be_bytes(bytes[24..28].try_into().unwrap()), 3);
        assert_eq!(&bytes[28..33], b"Init\0");
        assert_eq!(f32::from_be_bytes(bytes[60..64].try_into().unwrap()), 0.25);
    }

    #[test]
    fn preset_reads_back() {
        let preset = params_preset();
        assert_eq!(Preset::from_bytes(&preset.to_bytes()).unwrap(), preset);
    }

    #[test]
    fn chunk_bank_keeps_program_count_and_current_program() {
        let bank = Bank {
            unique_id: 7,
            plugin_version: 1,
            num_programs: 16,
            current_program: 5,
            data: BankData::Chunk(vec![1, 2, 3, 4, 5]),
        };
        let bytes = bank.to_bytes();
        assert_eq!(&bytes[8..12], b"FBCh");
        assert_eq!(bytes.len(), 156 + 4 + 5);
        let parsed = Bank::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, bank);
        assert!(parsed.info().opaque);
    }

    #[test]
    fn params_bank_embeds_presets() {
        let bank = Bank {
            unique_id: params_preset().unique_id,
            plugin_version: 3,
            num_programs: 2,
            current_program: 1,
            data: BankData::Programs(vec![params_preset(), params_preset()]),
        };
        let bytes = bank.to_bytes();
        assert_eq!(&bytes[156..160], b"CcnK");
        assert_eq!(Bank::from_bytes(&bytes).unwrap(), bank);
    }

    #[test]
    fn version_one_bank_has_no_current_program() {
        let mut bytes = Bank {
            unique_id: 7,
            plugin_version: 1,
            num_programs: 1,
            current_program: 9,
            data: BankData::Chunk(vec![0xAA]),
        }
        .to_bytes();
        bytes[12..16].copy_from_slice(&1i32.to_be_bytes());
        assert_eq!(Bank::from_bytes(&bytes).unwrap().current_program, 0);
    }

    #[test]
    fn long_names_are_cut_and_terminated() {
        let mut preset = params_preset();
        preset.name = "x".repeat(40);
        let parsed = Preset::from_bytes(&preset.to_bytes()).unwrap();
        assert_eq!(parsed.name.len(), NAME_LEN - 1);
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let mut bytes = params_preset().to_bytes();
        bytes[0] = b'X';
        assert!(matches!(Preset::from_bytes(&bytes), Err(PresetError::BadMagic { expected: "CcnK", .. })));
        assert!(matches!(
            Bank::from_bytes(&params_preset().to_bytes()),
            Err(PresetError::BadMagic { .. })
        ));
    }

    #[test]
    fn truncated_input_is_reported() {
        let bytes = params_preset().to_bytes();
        assert!(matches!(Preset::from_bytes(&bytes[..bytes.len() - 1]), Err(PresetError::Truncated(_))));
        assert!(matches!(Preset::from_bytes(&bytes[..10]), Err(PresetError::Truncated(_))));
    }

    #[test]
    fn oversized_counts_fail_before_allocating() {
        let mut bytes = params_preset().to_bytes();
        bytes[24..28].copy_from_slice(&i32::MAX.to_be_bytes());
        assert!(matches!(Preset::from_bytes(&bytes), Err(PresetError::Truncated("parameter count"))));
        bytes[24..28].copy_from_slice(&(-1i32).to_be_bytes());
        assert!(matches!(Preset::from_bytes(&bytes), Err(PresetError::InvalidField { value: -1, .. })));
    }

    #[test]
    fn header_info_is_read_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("init.fxp");
        params_preset().write(fs::File::create(&path).unwrap()).unwrap();
        let info = PresetFileInfo::read_from(&path).unwrap();
        assert_eq!(info, params_preset().info());
    }

    #[test]
    fn fuzz_entry_tolerates_garbage() {
        fuzz_parse_preset(&[]);
        fuzz_parse_preset(b"CcnK\0\0\0\x10FxBk");
        fuzz_parse_preset(&params_preset().to_bytes());
    }
}
