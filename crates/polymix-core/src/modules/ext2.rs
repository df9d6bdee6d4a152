//! Ext2 bad-blocks module.
//!
//! An ext2 image built with `mkfs.ext2 -l <badblocks>` never touches the
//! listed blocks, so those holes are free for co-resident formats. This
//! module contributes the live regions of the image as fixed chunks: the
//! span from the superblock at 1024 up to the first bad block, the spans
//! between bad blocks, and the tail span to end of image. The first KiB
//! (boot record, unused by ext2) stays free as well.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use clap::{Arg, ArgMatches, Command};
use tracing::debug;

use crate::chunk::{Chunk, SharedBuf};
use crate::error::{Error, Result};
use crate::hooks::HookBus;
use crate::module::Module;

pub const NAME: &str = "ext2";

/// Superblock offset; everything below it is free for other formats.
const SUPERBLOCK_POS: u64 = 1024;

#[derive(Default)]
struct Ext2State {
    path: PathBuf,
    badblocks_path: PathBuf,
    block_size: u64,
}

/// Contributes an ext2 image around its bad-block holes.
#[derive(Default)]
pub struct Ext2Module {
    state: Rc<RefCell<Ext2State>>,
}

/// Parse a `badblocks(8)`-style list: one decimal block number per line.
fn parse_badblocks(text: &str) -> Result<Vec<u64>> {
    let mut blocks = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let block = line.parse::<u64>().map_err(|_| {
            Error::invalid_input(format!("bad-blocks list: invalid entry '{line}'"))
        })?;
        blocks.push(block);
    }
    Ok(blocks)
}

/// Live spans of the image, `[start, end)`, given the bad-block holes.
fn live_spans(file_size: u64, block_size: u64, blocks: &[u64]) -> Result<Vec<(u64, u64)>> {
    let mut spans = Vec::new();
    let mut start = SUPERBLOCK_POS;

    for &block in blocks {
        let hole_start = block * block_size;
        let hole_end = hole_start + block_size;
        if hole_end > file_size {
            return Err(Error::invalid_input(format!(
                "bad block {block} lies beyond the {file_size}-byte image"
            )));
        }
        if hole_start > start {
            spans.push((start, hole_start));
        }
        start = start.max(hole_end);
    }

    if file_size > start {
        spans.push((start, file_size));
    }
    Ok(spans)
}

impl Module for Ext2Module {
    fn name(&self) -> &'static str {
        NAME
    }

    fn params(&self, cmd: Command) -> Command {
        cmd.arg(
            Arg::new("ext2-file")
                .long("ext2-file")
                .value_name("PATH")
                .help_heading("Ext2 Options")
                .help("Source ext2 image"),
        )
        .arg(
            Arg::new("ext2-badblocks-file")
                .long("ext2-badblocks-file")
                .value_name("PATH")
                .help_heading("Ext2 Options")
                .help("Bad-blocks list the image was built with"),
        )
        .arg(
            Arg::new("ext2-blocksize")
                .long("ext2-blocksize")
                .value_name("BYTES")
                .help_heading("Ext2 Options")
                .help("Filesystem block size"),
        )
    }

    fn setup(&mut self, args: &ArgMatches, _hooks: &Rc<HookBus>) -> Result<()> {
        let path = args
            .get_one::<String>("ext2-file")
            .ok_or_else(|| Error::config("the --ext2-file option is required"))?;
        let badblocks = args
            .get_one::<String>("ext2-badblocks-file")
            .ok_or_else(|| Error::config("the --ext2-badblocks-file option is required"))?;
        let block_size = args
            .get_one::<String>("ext2-blocksize")
            .ok_or_else(|| Error::config("the --ext2-blocksize option is required"))?
            .parse::<u64>()
            .map_err(|_| Error::config("--ext2-blocksize must be a positive integer"))?;
        if block_size == 0 {
            return Err(Error::config("--ext2-blocksize must be a positive integer"));
        }

        let mut state = self.state.borrow_mut();
        state.path = PathBuf::from(path);
        state.badblocks_path = PathBuf::from(badblocks);
        state.block_size = block_size;
        Ok(())
    }

    fn chunks(&mut self) -> Result<Vec<Chunk>> {
        let state = self.state.borrow();
        let image = std::fs::read(&state.path)?;
        let file_size = image.len() as u64;
        let buf = SharedBuf::new(image);

        let text = std::fs::read_to_string(&state.badblocks_path)?;
        let blocks = parse_badblocks(&text)?;
        let spans = live_spans(file_size, state.block_size, &blocks)?;
        debug!("{} live spans around {} bad blocks", spans.len(), blocks.len());

        Ok(spans
            .into_iter()
            .map(|(start, end)| {
                Chunk::fixed(
                    start as i64,
                    (end - start) as usize,
                    start as usize,
                    buf.clone(),
                )
                .with_module(NAME)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spans_skip_holes_and_reserved_boot_block() {
        let spans = live_spans(32_768, 1024, &[10, 20]).unwrap();
        assert_eq!(
            spans,
            vec![(1024, 10_240), (11_264, 20_480), (21_504, 32_768)]
        );
    }

    #[test]
    fn adjacent_bad_blocks_merge_holes() {
        let spans = live_spans(16_384, 1024, &[4, 5]).unwrap();
        assert_eq!(spans, vec![(1024, 4096), (6144, 16_384)]);
    }

    #[test]
    fn bad_block_beyond_image_is_rejected() {
        let err = live_spans(4096, 1024, &[10]).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn badblocks_list_parses_and_rejects_garbage() {
        assert_eq!(parse_badblocks("10\n\n20\n").unwrap(), vec![10, 20]);
        assert!(parse_badblocks("10\nnope\n").is_err());
    }
}
