//! Random chunk generator.
//!
//! Stress module: emits a shuffled mix of fixed and flexible chunks with
//! random sizes and positions. Useful for exercising the placement engine
//! against layouts nobody would write by hand.

use clap::{ArgMatches, Command};
use rand::Rng;
use rand::seq::SliceRandom;
use std::rc::Rc;

use crate::chunk::{Chunk, SharedBuf};
use crate::error::Result;
use crate::hooks::HookBus;
use crate::module::Module;

pub const NAME: &str = "random";

/// Emits 16-64 randomly shaped chunks drawn from one filler buffer.
#[derive(Default)]
pub struct RandomModule;

impl Module for RandomModule {
    fn name(&self) -> &'static str {
        NAME
    }

    fn params(&self, cmd: Command) -> Command {
        cmd
    }

    fn setup(&mut self, _args: &ArgMatches, _hooks: &Rc<HookBus>) -> Result<()> {
        Ok(())
    }

    fn chunks(&mut self) -> Result<Vec<Chunk>> {
        let mut rng = rand::rng();
        let data = SharedBuf::new(vec![b'R'; 1024 * 1024]);
        let count = rng.random_range(16..=64);
        let mut chunks = Vec::with_capacity(count);
        let mut last_pos: i64 = 512;

        for _ in 0..count {
            let pos = last_pos + rng.random_range(1..=512);
            let size = rng.random_range(1..=512usize);

            let chunk = if rng.random_bool(0.5) {
                Chunk::fixed(pos, size, 0, data.clone())
            } else {
                // Window always wide enough for the chunk itself; a window
                // narrower than the payload would abort the whole build.
                let hi = pos + size as i64 + rng.random_range(0..=512);
                Chunk::flexible(Some(pos), Some(hi), size, 0, data.clone())
            };

            last_pos = pos + size as i64;
            chunks.push(chunk.with_module(NAME));
        }

        chunks.shuffle(&mut rng);
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Placement;

    #[test]
    fn chunks_are_well_formed() {
        let mut module = RandomModule;
        let chunks = module.chunks().unwrap();
        assert!((16..=64).contains(&chunks.len()));

        for chunk in &chunks {
            assert!(chunk.payload_in_bounds());
            assert!(chunk.size >= 1 && chunk.size <= 512);
            if let Placement::Flexible { lo, hi } = chunk.placement {
                let (lo, hi) = (lo.unwrap(), hi.unwrap());
                assert!(hi - lo >= chunk.size as i64);
            }
        }
    }
}
