//! End-to-end build driver.
//!
//! Collects chunks from the selected modules in CLI order, places fixed
//! chunks before flexible ones, resolves tail chunks, fires the hook topics
//! at the contract points, and writes the output file. Gaps between placed
//! payloads are filled with uniformly-random bytes so that unclaimed space
//! is indistinguishable from encrypted content.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::rc::Rc;

use rand::RngCore;
use tracing::info;

use crate::chunk::{Chunk, Placement};
use crate::error::Result;
use crate::hooks::{HookBus, HookEvent};
use crate::layout::Layout;
use crate::module::ModuleRegistry;

/// Build the output file from the selected modules.
///
/// `selected` names modules of `registry` in CLI order; every name must
/// already have had `setup` called on it. Any error aborts the build; the
/// output file may be partially written if the failure happens during
/// emission.
pub fn compose(
    registry: &mut ModuleRegistry,
    selected: &[String],
    hooks: &Rc<HookBus>,
    output: &Path,
) -> Result<()> {
    let mut all: Vec<Rc<Chunk>> = Vec::new();
    for name in selected {
        let module = registry.get_mut(name)?;
        let chunks = module.chunks()?;
        info!("module {name} contributes {} chunks", chunks.len());
        all.extend(chunks.into_iter().map(Rc::new));
    }

    let (fixed, flexible): (Vec<_>, Vec<_>) =
        all.into_iter().partition(|chunk| chunk.is_fixed());

    let mut layout = Layout::new();

    for chunk in fixed {
        let Placement::Fixed { position } = chunk.placement else {
            continue;
        };
        place_and_notify(&mut layout, hooks, position, chunk)?;
    }

    for chunk in flexible {
        let position = layout.find_position(&chunk)?;
        place_and_notify(&mut layout, hooks, position, chunk)?;
    }

    for (position, chunk) in layout.normalize_tail() {
        place_and_notify(&mut layout, hooks, position, chunk)?;
    }

    hooks.trigger(&HookEvent::PlacementComplete { layout: &layout })?;

    write_output(&mut layout, output)?;

    hooks.trigger(&HookEvent::WritingFinished { path: output })?;
    Ok(())
}

/// Place one chunk and fire `placing:chunk` for non-negative coordinates.
///
/// Tail chunks go through here twice; only the re-anchored placement is
/// announced.
fn place_and_notify(
    layout: &mut Layout,
    hooks: &Rc<HookBus>,
    start: i64,
    chunk: Rc<Chunk>,
) -> Result<()> {
    let end = start + chunk.size as i64;
    layout.place(start, Rc::clone(&chunk))?;
    if start >= 0 {
        hooks.trigger(&HookEvent::ChunkPlaced {
            start,
            end,
            chunk: &chunk,
        })?;
    }
    Ok(())
}

fn write_output(layout: &mut Layout, output: &Path) -> Result<()> {
    layout.freeze();

    let file = File::create(output)?;
    let mut writer = BufWriter::new(file);
    let mut rng = rand::rng();
    let mut cursor: i64 = 0;

    for block in layout.data_blocks() {
        fill_random(&mut writer, &mut rng, block.start - cursor)?;
        writer.write_all(&block.data.borrow()[block.span.clone()])?;
        cursor = block.start + block.span.len() as i64;
    }

    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|err| std::io::Error::other(err.to_string()))?;
    file.sync_all()?;
    drop(file);

    info!("wrote {} bytes to {}", cursor, output.display());
    Ok(())
}

/// Pad with uniformly-random bytes; format validators expecting encrypted
/// noise (TrueCrypt containers) must not see structured filler.
fn fill_random(
    writer: &mut impl Write,
    rng: &mut impl RngCore,
    mut remaining: i64,
) -> Result<()> {
    let mut buf = [0u8; 8192];
    while remaining > 0 {
        let take = remaining.min(buf.len() as i64) as usize;
        rng.fill_bytes(&mut buf[..take]);
        writer.write_all(&buf[..take])?;
        remaining -= take as i64;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::SharedBuf;
    use crate::error::Error;
    use crate::hooks::Topic;
    use crate::module::Module;
    use clap::{ArgMatches, Command};
    use std::cell::RefCell;

    /// Test module yielding a canned chunk list, logging hook traffic.
    struct Scripted {
        chunks: Vec<Chunk>,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl Scripted {
        fn new(chunks: Vec<Chunk>, log: Rc<RefCell<Vec<String>>>) -> Self {
            Self { chunks, log }
        }
    }

    impl Module for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn params(&self, cmd: Command) -> Command {
            cmd
        }

        fn setup(&mut self, _args: &ArgMatches, hooks: &Rc<HookBus>) -> Result<()> {
            let log = Rc::clone(&self.log);
            hooks.register(Topic::ChunkPlaced, move |event| {
                if let HookEvent::ChunkPlaced { start, end, .. } = event {
                    log.borrow_mut().push(format!("chunk {start}..{end}"));
                }
                Ok(())
            });
            let log = Rc::clone(&self.log);
            hooks.register(Topic::PlacementComplete, move |_| {
                log.borrow_mut().push("complete".to_string());
                Ok(())
            });
            let log = Rc::clone(&self.log);
            hooks.register(Topic::WritingFinished, move |_| {
                log.borrow_mut().push("finish".to_string());
                Ok(())
            });
            Ok(())
        }

        fn chunks(&mut self) -> Result<Vec<Chunk>> {
            Ok(std::mem::take(&mut self.chunks))
        }
    }

    fn run_scripted(chunks: Vec<Chunk>) -> (Vec<String>, Vec<u8>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut registry = ModuleRegistry::new();
        registry.register(Box::new(Scripted::new(chunks, Rc::clone(&log))));

        let hooks = Rc::new(HookBus::new());
        let matches = Command::new("test").get_matches_from(["test"]);
        registry
            .get_mut("scripted")
            .unwrap()
            .setup(&matches, &hooks)
            .unwrap();

        let dir = std::env::temp_dir().join(format!("polymix_test_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("out_{:p}", &log));
        compose(&mut registry, &["scripted".to_string()], &hooks, &path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::remove_file(&path).ok();
        let events = log.borrow().clone();
        (events, bytes)
    }

    #[test]
    fn hook_order_is_place_complete_finish() {
        let chunks = vec![
            Chunk::fixed(0, 4, 0, SharedBuf::from_slice(b"HEAD")),
            Chunk::fixed(-4, 4, 0, SharedBuf::from_slice(b"TAIL")),
            Chunk::flexible(Some(0), None, 4, 0, SharedBuf::from_slice(b"BODY")),
        ];
        let (events, bytes) = run_scripted(chunks);

        // Fixed non-negative first, flexible second, tail after normalisation.
        assert_eq!(
            events,
            vec![
                "chunk 0..4".to_string(),
                "chunk 4..8".to_string(),
                "chunk 8..12".to_string(),
                "complete".to_string(),
                "finish".to_string(),
            ]
        );
        assert_eq!(&bytes[0..4], b"HEAD");
        assert_eq!(&bytes[4..8], b"BODY");
        assert_eq!(&bytes[8..12], b"TAIL");
        assert_eq!(bytes.len(), 12);
    }

    #[test]
    fn gaps_are_filled_and_sized() {
        let chunks = vec![
            Chunk::fixed(0, 4, 0, SharedBuf::from_slice(b"AAAA")),
            Chunk::fixed(100, 4, 0, SharedBuf::from_slice(b"BBBB")),
        ];
        let (_, bytes) = run_scripted(chunks);
        assert_eq!(bytes.len(), 104);
        assert_eq!(&bytes[0..4], b"AAAA");
        assert_eq!(&bytes[100..104], b"BBBB");
    }

    #[test]
    fn complete_hook_mutations_reach_the_output() {
        // A module patches an earlier chunk's buffer from placing:complete
        // with a digest of the final view; the written file reflects it.
        use sha2::{Digest, Sha256};

        let digest_buf = SharedBuf::zeroed(32);
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut registry = ModuleRegistry::new();
        registry.register(Box::new(Scripted::new(
            vec![
                Chunk::fixed(0, 32, 0, digest_buf.clone()),
                Chunk::fixed(32, 32, 0, SharedBuf::new(vec![0x5A; 32])),
            ],
            Rc::clone(&log),
        )));

        let hooks = Rc::new(HookBus::new());
        let matches = Command::new("test").get_matches_from(["test"]);
        registry
            .get_mut("scripted")
            .unwrap()
            .setup(&matches, &hooks)
            .unwrap();

        let patched = digest_buf.clone();
        hooks.register(Topic::PlacementComplete, move |event| {
            if let HookEvent::PlacementComplete { layout } = event {
                let view = layout.read(32, 64);
                let digest = Sha256::digest(&view);
                patched.write_at(0, &digest);
            }
            Ok(())
        });

        let dir = std::env::temp_dir().join(format!("polymix_test_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("digest_out");
        compose(&mut registry, &["scripted".to_string()], &hooks, &path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let expected = Sha256::digest([0x5A; 32]);
        assert_eq!(&bytes[0..32], expected.as_slice());
    }

    #[test]
    fn overlap_aborts_the_build() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut registry = ModuleRegistry::new();
        registry.register(Box::new(Scripted::new(
            vec![
                Chunk::fixed(0, 10, 0, SharedBuf::zeroed(10)),
                Chunk::fixed(5, 10, 0, SharedBuf::zeroed(10)),
            ],
            log,
        )));

        let hooks = Rc::new(HookBus::new());
        let path = std::env::temp_dir().join("polymix_overlap_out");
        let err = compose(
            &mut registry,
            &["scripted".to_string()],
            &hooks,
            &path,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Overlap { .. }));
    }
}
