//! Shell script wrapper module.
//!
//! Reserves the first 64 bytes of the output for a bootstrap header and
//! lets the script body float. Once placement is final, the header becomes
//! `#!/bin/bash` plus a `tail -c+N $0|bash` trampoline pointing at wherever
//! the body landed, so running the polyglot executes the wrapped script.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use clap::{Arg, ArgMatches, Command};

use crate::chunk::{Chunk, SharedBuf};
use crate::error::{Error, Result};
use crate::hooks::{HookBus, HookEvent, Topic};
use crate::module::Module;

pub const NAME: &str = "shell";

const HEADER_SIZE: usize = 64;
const SCRIPT_TAG: usize = 0;

#[derive(Default)]
struct ShellState {
    path: PathBuf,
    header: SharedBuf,
    script_start: i64,
}

/// Wraps a shell script so the output file runs it when piped to bash.
#[derive(Default)]
pub struct ShellModule {
    state: Rc<RefCell<ShellState>>,
}

impl Module for ShellModule {
    fn name(&self) -> &'static str {
        NAME
    }

    fn params(&self, cmd: Command) -> Command {
        cmd.arg(
            Arg::new("shell-file")
                .long("shell-file")
                .value_name("PATH")
                .help_heading("Shell Options")
                .help("Shell script to embed"),
        )
    }

    fn setup(&mut self, args: &ArgMatches, hooks: &Rc<HookBus>) -> Result<()> {
        let path = args
            .get_one::<String>("shell-file")
            .ok_or_else(|| Error::config("the --shell-file option is required"))?;

        {
            let mut state = self.state.borrow_mut();
            state.path = PathBuf::from(path);
            state.header = SharedBuf::zeroed(HEADER_SIZE);
        }

        let state = Rc::clone(&self.state);
        hooks.register(Topic::ChunkPlaced, move |event| {
            let HookEvent::ChunkPlaced { start, chunk, .. } = event else {
                return Ok(());
            };
            if chunk.module == Some(NAME) && chunk.tag == Some(SCRIPT_TAG) {
                state.borrow_mut().script_start = *start;
            }
            Ok(())
        });

        let state = Rc::clone(&self.state);
        hooks.register(Topic::PlacementComplete, move |_| {
            let state = state.borrow();
            let header = format!(
                "#!/bin/bash\ntail -c+{} $0|bash\nexit\n",
                state.script_start + 1
            );
            if header.len() > HEADER_SIZE {
                return Err(Error::invalid_input(format!(
                    "shell header needs {} bytes, only {HEADER_SIZE} reserved",
                    header.len()
                )));
            }
            state.header.write_at(0, header.as_bytes());
            Ok(())
        });

        Ok(())
    }

    fn chunks(&mut self) -> Result<Vec<Chunk>> {
        let state = self.state.borrow();
        let mut script = std::fs::read(&state.path)?;
        script.extend_from_slice(b"\nexit\n");
        let size = script.len();

        Ok(vec![
            Chunk::fixed(0, HEADER_SIZE, 0, state.header.clone()).with_module(NAME),
            Chunk::flexible(Some(0), None, size, 0, SharedBuf::new(script))
                .with_module(NAME)
                .with_tag(SCRIPT_TAG),
        ])
    }
}
