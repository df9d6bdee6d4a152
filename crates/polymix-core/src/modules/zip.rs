//! ZIP archive module.
//!
//! ZIP readers locate an archive through the end-of-central-directory
//! record near the file end, and from there through the central directory's
//! per-entry offsets. That indirection is what makes ZIP such a good
//! polyglot citizen: the local entries can sit anywhere as long as the
//! central directory is patched to point at them.
//!
//! The module emits one flexible chunk per archive entry (local header plus
//! payload, plus the 16-byte data descriptor when general-purpose flag
//! bit 3 is set) and the central directory plus EOCD as one tail chunk.
//! From `placing:chunk` it rewrites the central-directory offsets and the
//! EOCD's directory offset to the final positions.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use clap::{Arg, ArgAction, ArgMatches, Command};
use tracing::debug;

use crate::chunk::{Chunk, SharedBuf};
use crate::error::{Error, Result};
use crate::hooks::{HookBus, HookEvent, Topic};
use crate::module::Module;

pub const NAME: &str = "zip";

const LFH_SIG: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];
const CDFH_SIG: [u8; 4] = [0x50, 0x4B, 0x01, 0x02];
const EOCD_SIG: [u8; 4] = [0x50, 0x4B, 0x05, 0x06];

const LFH_LEN: usize = 30;
const CDFH_LEN: usize = 46;
const EOCD_LEN: usize = 22;

/// EOCD comments may run up to 64 KiB, so the backwards scan covers that
/// much plus the record itself.
const EOCD_SCAN_WINDOW: usize = 65536 + EOCD_LEN;

/// Flag bit 3: sizes live in a trailing data descriptor.
const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;
const DATA_DESCRIPTOR_LEN: usize = 16;

fn le_u16(data: &[u8], pos: usize) -> Result<u16> {
    let bytes = data
        .get(pos..pos + 2)
        .ok_or_else(|| Error::invalid_input("zip record truncated"))?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn le_u32(data: &[u8], pos: usize) -> Result<u32> {
    let bytes = data
        .get(pos..pos + 4)
        .ok_or_else(|| Error::invalid_input("zip record truncated"))?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// End-of-central-directory record.
#[derive(Debug, Clone, Copy)]
pub struct EndOfCentralDirectory {
    /// Absolute offset of the record in the source archive
    pub pos: usize,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
}

/// One archive entry: where its local header lives and which central
/// record describes it.
#[derive(Debug, Clone, Copy)]
pub struct LocalEntry {
    /// Absolute offset of the local file header
    pub lfh_pos: usize,
    /// Absolute offset of the central-directory record
    pub cdfh_pos: usize,
    /// Local header + payload (+ data descriptor), in bytes
    pub span: usize,
}

/// Scan the trailing window of `data` backwards for the EOCD record.
pub fn find_eocd(data: &[u8]) -> Result<EndOfCentralDirectory> {
    if data.len() < EOCD_LEN {
        return Err(Error::invalid_input("too small to be a zip archive"));
    }

    let window = data.len().min(EOCD_SCAN_WINDOW);
    let base = data.len() - window;
    for pos in (0..=window - EOCD_LEN).rev() {
        let at = base + pos;
        if data[at..at + 4] == EOCD_SIG {
            return Ok(EndOfCentralDirectory {
                pos: at,
                total_entries: le_u16(data, at + 10)?,
                cd_size: le_u32(data, at + 12)?,
                cd_offset: le_u32(data, at + 16)?,
            });
        }
    }
    Err(Error::invalid_input("EOCD signature not found"))
}

/// Walk the central directory and resolve every entry's local extent.
pub fn read_entries(data: &[u8], eocd: &EndOfCentralDirectory) -> Result<Vec<LocalEntry>> {
    let mut entries = Vec::with_capacity(eocd.total_entries as usize);
    let mut cdfh_pos = eocd.cd_offset as usize;

    for _ in 0..eocd.total_entries {
        if data.get(cdfh_pos..cdfh_pos + 4).map(|sig| sig == CDFH_SIG) != Some(true) {
            return Err(Error::invalid_input("CDFH signature not found"));
        }
        let flags = le_u16(data, cdfh_pos + 8)?;
        let compressed_size = le_u32(data, cdfh_pos + 20)? as usize;
        let cd_name_len = le_u16(data, cdfh_pos + 28)? as usize;
        let cd_extra_len = le_u16(data, cdfh_pos + 30)? as usize;
        let cd_comment_len = le_u16(data, cdfh_pos + 32)? as usize;
        let lfh_pos = le_u32(data, cdfh_pos + 42)? as usize;

        if data.get(lfh_pos..lfh_pos + 4).map(|sig| sig == LFH_SIG) != Some(true) {
            return Err(Error::invalid_input("LFH signature not found"));
        }
        let name_len = le_u16(data, lfh_pos + 26)? as usize;
        let extra_len = le_u16(data, lfh_pos + 28)? as usize;

        let descriptor = if flags & FLAG_DATA_DESCRIPTOR != 0 {
            DATA_DESCRIPTOR_LEN
        } else {
            0
        };
        let span = LFH_LEN + name_len + extra_len + compressed_size + descriptor;
        if lfh_pos + span > data.len() {
            return Err(Error::invalid_input("zip entry runs past end of archive"));
        }

        entries.push(LocalEntry {
            lfh_pos,
            cdfh_pos,
            span,
        });
        cdfh_pos += CDFH_LEN + cd_name_len + cd_extra_len + cd_comment_len;
    }

    Ok(entries)
}

#[derive(Default)]
struct ZipState {
    path: PathBuf,
    first_header: bool,
    buf: SharedBuf,
    entries: Vec<LocalEntry>,
    eocd_pos: usize,
    footer_tag: usize,
}

/// Relocates a ZIP archive's entries and re-points its central directory.
#[derive(Default)]
pub struct ZipModule {
    state: Rc<RefCell<ZipState>>,
}

impl Module for ZipModule {
    fn name(&self) -> &'static str {
        NAME
    }

    fn params(&self, cmd: Command) -> Command {
        cmd.arg(
            Arg::new("zip-file")
                .long("zip-file")
                .value_name("PATH")
                .help_heading("ZIP Options")
                .help("Source ZIP archive"),
        )
        .arg(
            Arg::new("zip-first-header")
                .long("zip-first-header")
                .action(ArgAction::SetTrue)
                .help_heading("ZIP Options")
                .help("Pin the first entry at position zero"),
        )
    }

    fn setup(&mut self, args: &ArgMatches, hooks: &Rc<HookBus>) -> Result<()> {
        let path = args
            .get_one::<String>("zip-file")
            .ok_or_else(|| Error::config("the --zip-file option is required"))?;

        {
            let mut state = self.state.borrow_mut();
            state.path = PathBuf::from(path);
            state.first_header = args.get_flag("zip-first-header");
        }

        let state = Rc::clone(&self.state);
        hooks.register(Topic::ChunkPlaced, move |event| {
            let HookEvent::ChunkPlaced { start, chunk, .. } = event else {
                return Ok(());
            };
            if chunk.module != Some(NAME) {
                return Ok(());
            }
            let Some(tag) = chunk.tag else {
                return Ok(());
            };

            let state = state.borrow();
            let offset = u32::try_from(*start).map_err(|_| {
                Error::invalid_input(format!("zip offset {start} exceeds 32 bits"))
            })?;

            if tag == state.footer_tag {
                // The tail chunk starts with the central directory; the EOCD
                // must point at it.
                state
                    .buf
                    .write_at(state.eocd_pos + 16, &offset.to_le_bytes());
            } else {
                state
                    .buf
                    .write_at(state.entries[tag].cdfh_pos + 42, &offset.to_le_bytes());
            }
            Ok(())
        });

        Ok(())
    }

    fn chunks(&mut self) -> Result<Vec<Chunk>> {
        let mut state = self.state.borrow_mut();
        let data = std::fs::read(&state.path)?;
        let file_size = data.len();

        let eocd = find_eocd(&data)?;
        if eocd.cd_offset as usize > eocd.pos {
            return Err(Error::invalid_input(
                "central directory offset runs past the EOCD",
            ));
        }
        let entries = read_entries(&data, &eocd)?;
        debug!("{} entries, central directory at {}", entries.len(), eocd.cd_offset);

        let buf = SharedBuf::new(data);
        let mut chunks: Vec<Chunk> = Vec::with_capacity(entries.len() + 1);

        for (tag, entry) in entries.iter().enumerate() {
            let chunk = if state.first_header && tag == 0 {
                Chunk::fixed(0, entry.span, entry.lfh_pos, buf.clone())
            } else {
                Chunk::flexible(Some(0), None, entry.span, entry.lfh_pos, buf.clone())
            };
            chunks.push(chunk.with_module(NAME).with_tag(tag));
        }

        // Central directory + EOCD travel as one block anchored at file end.
        let footer_size = file_size - eocd.cd_offset as usize;
        let footer_tag = entries.len();
        chunks.push(
            Chunk::fixed(
                -(footer_size as i64),
                footer_size,
                eocd.cd_offset as usize,
                buf.clone(),
            )
            .with_module(NAME)
            .with_tag(footer_tag),
        );

        state.buf = buf;
        state.entries = entries;
        state.eocd_pos = eocd.pos;
        state.footer_tag = footer_tag;
        Ok(chunks)
    }
}
