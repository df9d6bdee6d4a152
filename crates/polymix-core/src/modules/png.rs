//! PNG image module.
//!
//! PNG tolerates unknown ancillary chunks, so foreign content can hide
//! inside one. The module keeps the signature and IHDR pinned at the start,
//! opens a private `fRAc` chunk right after IHDR, and moves the rest of the
//! source image (everything after IHDR, IEND included) to the tail of the
//! output. Whatever the other modules place in between becomes the `fRAc`
//! payload; once placement is final the chunk's length and CRC are patched
//! so PNG readers walk straight over it.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use clap::{Arg, ArgMatches, Command};
use tracing::debug;

use crate::chunk::{Chunk, SharedBuf};
use crate::error::{Error, Result};
use crate::hooks::{HookBus, HookEvent, Topic};
use crate::module::Module;

pub const NAME: &str = "png";

const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
/// Ancillary, safe-to-copy chunk type used to swallow foreign bytes.
const FAKE_TYPE: [u8; 4] = *b"fRAc";
/// Length field + type field.
const CHUNK_HEADER_LEN: usize = 8;
/// Header plus trailing CRC.
const CHUNK_OVERHEAD: usize = 12;

const CRC_TAG: usize = 0;

/// One chunk of the source image: absolute position and declared length.
#[derive(Debug, Clone, Copy)]
pub struct RawChunk {
    pub pos: usize,
    pub len: u32,
    pub kind: [u8; 4],
}

impl RawChunk {
    /// Full extent in the file: header, payload and CRC.
    pub fn span(&self) -> usize {
        CHUNK_OVERHEAD + self.len as usize
    }
}

/// Walk the chunk sequence after the signature, validating bounds.
pub fn walk_chunks(data: &[u8]) -> Result<Vec<RawChunk>> {
    let mut chunks = Vec::new();
    let mut pos = SIGNATURE.len();

    while pos < data.len() {
        let header = data
            .get(pos..pos + CHUNK_HEADER_LEN)
            .ok_or_else(|| Error::invalid_input("PNG chunk header truncated"))?;
        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let kind = [header[4], header[5], header[6], header[7]];

        let chunk = RawChunk { pos, len, kind };
        if pos + chunk.span() > data.len() {
            return Err(Error::invalid_input("PNG chunk runs past end of file"));
        }
        pos += chunk.span();
        chunks.push(chunk);
    }

    Ok(chunks)
}

#[derive(Default)]
struct PngState {
    path: PathBuf,
    fake: SharedBuf,
    crc: SharedBuf,
    fake_pos: i64,
    crc_start: i64,
}

/// Hides the rest of the output inside a private PNG chunk.
#[derive(Default)]
pub struct PngModule {
    state: Rc<RefCell<PngState>>,
}

impl Module for PngModule {
    fn name(&self) -> &'static str {
        NAME
    }

    fn params(&self, cmd: Command) -> Command {
        cmd.arg(
            Arg::new("png-file")
                .long("png-file")
                .value_name("PATH")
                .help_heading("PNG Options")
                .help("Source PNG image"),
        )
    }

    fn setup(&mut self, args: &ArgMatches, hooks: &Rc<HookBus>) -> Result<()> {
        let path = args
            .get_one::<String>("png-file")
            .ok_or_else(|| Error::config("the --png-file option is required"))?;
        self.state.borrow_mut().path = PathBuf::from(path);

        let state = Rc::clone(&self.state);
        hooks.register(Topic::ChunkPlaced, move |event| {
            let HookEvent::ChunkPlaced { start, chunk, .. } = event else {
                return Ok(());
            };
            if chunk.module == Some(NAME) && chunk.tag == Some(CRC_TAG) {
                state.borrow_mut().crc_start = *start;
            }
            Ok(())
        });

        let state = Rc::clone(&self.state);
        hooks.register(Topic::PlacementComplete, move |event| {
            let HookEvent::PlacementComplete { layout } = event else {
                return Ok(());
            };
            let state = state.borrow();

            // The fake chunk spans [fake_pos, crc_start + 4): 8 bytes of
            // header, then payload, then the CRC chunk itself.
            let payload_len = state.crc_start - state.fake_pos - CHUNK_HEADER_LEN as i64;
            let payload_len = u32::try_from(payload_len).map_err(|_| {
                Error::invalid_input("PNG carrier chunk payload exceeds 4 GiB")
            })?;
            state.fake.write_at(0, &payload_len.to_be_bytes());

            // CRC covers type + payload, not the length field.
            let covered = layout.read(state.fake_pos + 4, state.crc_start);
            let crc = crc32fast::hash(&covered);
            state.crc.write_at(0, &crc.to_be_bytes());
            debug!("carrier chunk: {payload_len} payload bytes, crc {crc:08x}");
            Ok(())
        });

        Ok(())
    }

    fn chunks(&mut self) -> Result<Vec<Chunk>> {
        let mut state = self.state.borrow_mut();
        let data = std::fs::read(&state.path)?;

        if data.get(..SIGNATURE.len()) != Some(&SIGNATURE[..]) {
            return Err(Error::invalid_input("not a PNG file (bad signature)"));
        }
        let raw = walk_chunks(&data)?;
        let Some(ihdr) = raw.first().filter(|chunk| chunk.kind == *b"IHDR") else {
            return Err(Error::invalid_input("PNG does not start with IHDR"));
        };
        if raw.last().map(|chunk| chunk.kind) != Some(*b"IEND") {
            return Err(Error::invalid_input("PNG does not end with IEND"));
        }
        debug!("{} chunks after IHDR move to the tail", raw.len() - 1);

        let ihdr_end = (SIGNATURE.len() + ihdr.span()) as i64;
        let buf = SharedBuf::new(data);

        let mut fake = vec![0u8; CHUNK_HEADER_LEN];
        fake[4..8].copy_from_slice(&FAKE_TYPE);
        state.fake = SharedBuf::new(fake);
        state.crc = SharedBuf::zeroed(4);
        state.fake_pos = ihdr_end;

        let mut chunks = vec![
            Chunk::fixed(0, SIGNATURE.len(), 0, buf.clone()).with_module(NAME),
            Chunk::fixed(SIGNATURE.len() as i64, ihdr.span(), SIGNATURE.len(), buf.clone())
                .with_module(NAME),
            Chunk::fixed(ihdr_end, CHUNK_HEADER_LEN, 0, state.fake.clone()).with_module(NAME),
        ];

        // The carrier's CRC plus every post-IHDR source chunk stack up at
        // the end of the output, in source order, IEND last.
        let tail: Vec<RawChunk> = raw[1..].to_vec();
        let tail_total = 4 + tail.iter().map(RawChunk::span).sum::<usize>();

        let mut position = -(tail_total as i64);
        chunks.push(
            Chunk::fixed(position, 4, 0, state.crc.clone())
                .with_module(NAME)
                .with_tag(CRC_TAG),
        );
        position += 4;
        for raw_chunk in tail {
            chunks.push(
                Chunk::fixed(position, raw_chunk.span(), raw_chunk.pos, buf.clone())
                    .with_module(NAME),
            );
            position += raw_chunk.span() as i64;
        }

        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_chunk(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(kind);
        out.extend_from_slice(payload);
        let mut covered = kind.to_vec();
        covered.extend_from_slice(payload);
        out.extend_from_slice(&crc32fast::hash(&covered).to_be_bytes());
        out
    }

    fn build_png() -> Vec<u8> {
        let mut out = SIGNATURE.to_vec();
        out.extend(png_chunk(b"IHDR", &[0u8; 13]));
        out.extend(png_chunk(b"IDAT", b"data"));
        out.extend(png_chunk(b"IEND", &[]));
        out
    }

    fn module_with(data: &[u8]) -> (PngModule, Rc<HookBus>, tempfile::NamedTempFile) {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(data).unwrap();
        file.flush().unwrap();

        let mut module = PngModule::default();
        let cmd = module.params(Command::new("test"));
        let matches = cmd
            .try_get_matches_from(["test", "--png-file", file.path().to_str().unwrap()])
            .unwrap();
        let hooks = Rc::new(HookBus::new());
        module.setup(&matches, &hooks).unwrap();
        (module, hooks, file)
    }

    #[test]
    fn walker_reads_chunk_sequence() {
        let png = build_png();
        let raw = walk_chunks(&png).unwrap();
        let kinds: Vec<[u8; 4]> = raw.iter().map(|chunk| chunk.kind).collect();
        assert_eq!(kinds, vec![*b"IHDR", *b"IDAT", *b"IEND"]);
        assert_eq!(raw[0].pos, 8);
        assert_eq!(raw[0].span(), 25);
    }

    #[test]
    fn walker_rejects_truncated_chunks() {
        let mut png = build_png();
        png.truncate(png.len() - 3);
        assert!(walk_chunks(&png).is_err());
    }

    #[test]
    fn bad_signature_is_invalid_input() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"GIF89a not a png").unwrap();
        file.flush().unwrap();

        let mut module = PngModule::default();
        let cmd = module.params(Command::new("test"));
        let matches = cmd
            .try_get_matches_from(["test", "--png-file", file.path().to_str().unwrap()])
            .unwrap();
        let hooks = Rc::new(HookBus::new());
        module.setup(&matches, &hooks).unwrap();
        assert!(matches!(
            module.chunks().unwrap_err(),
            Error::InvalidInput(_)
        ));
    }

    #[test]
    fn source_layout_splits_into_head_and_tail() {
        let png = build_png();
        let (mut module, _hooks, _file) = module_with(&png);
        let chunks = module.chunks().unwrap();

        // sig, IHDR, fake header, then CRC + IDAT + IEND as tail.
        assert_eq!(chunks.len(), 6);
        assert_eq!(chunks[2].size, 8);
        let tail_total = 4 + 16 + 12;
        let positions: Vec<i64> = chunks[3..]
            .iter()
            .map(|chunk| match chunk.placement {
                crate::chunk::Placement::Fixed { position } => position,
                crate::chunk::Placement::Flexible { .. } => unreachable!(),
            })
            .collect();
        assert_eq!(
            positions,
            vec![-tail_total, -tail_total + 4, -tail_total + 20]
        );
    }

    #[test]
    fn complete_hook_patches_length_and_crc() {
        use crate::layout::Layout;

        let png = build_png();
        let (mut module, hooks, _file) = module_with(&png);
        let chunks = module.chunks().unwrap();

        let mut layout = Layout::new();
        for chunk in chunks {
            let crate::chunk::Placement::Fixed { position } = chunk.placement else {
                unreachable!()
            };
            layout.place(position, Rc::new(chunk)).unwrap();
        }
        for (position, chunk) in layout.normalize_tail() {
            layout.place(position, Rc::clone(&chunk)).unwrap();
            hooks
                .trigger(&HookEvent::ChunkPlaced {
                    start: position,
                    end: position + chunk.size as i64,
                    chunk: &chunk,
                })
                .unwrap();
        }
        hooks
            .trigger(&HookEvent::PlacementComplete { layout: &layout })
            .unwrap();

        // Nothing sits between the carrier header and its CRC here, so the
        // carrier payload is empty and the CRC covers the type alone.
        let state = module.state.borrow();
        assert_eq!(state.fake_pos, 33);
        assert_eq!(state.crc_start, 41);
        assert_eq!(&state.fake.borrow()[0..4], &0u32.to_be_bytes());
        let expected = crc32fast::hash(b"fRAc");
        assert_eq!(&state.crc.borrow()[..], &expected.to_be_bytes());
    }
}
