//! VeraCrypt container module.
//!
//! Same carving as TrueCrypt but with VeraCrypt's layout: primary header
//! area [0, 64 KiB), data from 128 KiB, and a backup header area occupying
//! the last 128 KiB. The backup header travels as a tail chunk so it stays
//! glued to the end of whatever the output grows into.
//!
//! Re-salting is not done in-process. With `--veracrypt-new-salt`, the
//! module waits for `writing:finish`, restores the original salt in the
//! written file, hands the displaced 64 bytes to the reference `veracrypt`
//! binary via `--extsalt`, and lets that tool re-derive the keys.

use std::cell::RefCell;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::rc::Rc;

use clap::{Arg, ArgAction, ArgMatches, Command};
use tracing::info;

use crate::chunk::{Chunk, SharedBuf};
use crate::error::{Error, Result};
use crate::hooks::{HookBus, HookEvent, Topic};
use crate::module::Module;

pub const NAME: &str = "veracrypt";

const SALT_LEN: usize = 64;
const HEADER_LEN: usize = 448;
/// Primary header area: header plus reserved space
const HEADER_AREA: usize = 64 * 1024;
/// Data region offset; the backup header mirrors this from the end.
const DATA_AREA: usize = 128 * 1024;

#[derive(Default)]
struct VeracryptState {
    path: PathBuf,
    new_salt: bool,
    password: String,
    tool: String,
    buf: SharedBuf,
    old_salt: Vec<u8>,
}

/// Relocates a VeraCrypt container; re-salting delegates to the reference
/// tool.
#[derive(Default)]
pub struct VeracryptModule {
    state: Rc<RefCell<VeracryptState>>,
}

impl Module for VeracryptModule {
    fn name(&self) -> &'static str {
        NAME
    }

    fn params(&self, cmd: Command) -> Command {
        cmd.arg(
            Arg::new("veracrypt-file")
                .long("veracrypt-file")
                .value_name("PATH")
                .help_heading("VeraCrypt Options")
                .help("Source VeraCrypt container"),
        )
        .arg(
            Arg::new("veracrypt-new-salt")
                .long("veracrypt-new-salt")
                .action(ArgAction::SetTrue)
                .help_heading("VeraCrypt Options")
                .help("Re-derive keys against the bytes placed at [0, 64)"),
        )
        .arg(
            Arg::new("veracrypt-password")
                .long("veracrypt-password")
                .value_name("PASSWORD")
                .help_heading("VeraCrypt Options")
                .help("Password of the container"),
        )
        .arg(
            Arg::new("veracrypt-tool")
                .long("veracrypt-tool")
                .value_name("PATH")
                .default_value("veracrypt")
                .help_heading("VeraCrypt Options")
                .help("Reference veracrypt binary used for re-salting"),
        )
    }

    fn setup(&mut self, args: &ArgMatches, hooks: &Rc<HookBus>) -> Result<()> {
        let path = args
            .get_one::<String>("veracrypt-file")
            .ok_or_else(|| Error::config("the --veracrypt-file option is required"))?;
        let new_salt = args.get_flag("veracrypt-new-salt");
        let password = args.get_one::<String>("veracrypt-password");

        if new_salt && password.is_none() {
            return Err(Error::config(
                "a password is required to re-encrypt the keys with a new salt",
            ));
        }

        {
            let mut state = self.state.borrow_mut();
            state.path = PathBuf::from(path);
            state.new_salt = new_salt;
            state.password = password.cloned().unwrap_or_default();
            state.tool = args
                .get_one::<String>("veracrypt-tool")
                .cloned()
                .unwrap_or_else(|| "veracrypt".to_string());
        }

        if new_salt {
            let state = Rc::clone(&self.state);
            hooks.register(Topic::WritingFinished, move |event| {
                let HookEvent::WritingFinished { path } = event else {
                    return Ok(());
                };
                let state = state.borrow();

                // Swap the original salt back in; the displaced bytes go to
                // the tool as the external salt to re-derive against.
                let mut file = std::fs::OpenOptions::new()
                    .read(true)
                    .write(true)
                    .open(path)?;
                let mut new_salt = [0u8; SALT_LEN];
                file.read_exact(&mut new_salt)?;
                file.seek(SeekFrom::Start(0))?;
                file.write_all(&state.old_salt)?;
                file.sync_all()?;
                drop(file);

                let mut salt_file = tempfile::NamedTempFile::new()?;
                salt_file.write_all(&new_salt)?;
                salt_file.flush()?;

                info!("re-salting {} via {}", path.display(), state.tool);
                let status = std::process::Command::new(&state.tool)
                    .arg("--text")
                    .arg("-v")
                    .arg("--change")
                    .arg(path)
                    .arg(format!("--password={}", state.password))
                    .arg(format!("--new-password={}", state.password))
                    .arg(format!("--extsalt={}", salt_file.path().display()))
                    .arg("--keyfiles=")
                    .arg("--new-keyfiles=")
                    .arg("--pim=0")
                    .arg("--new-pim=0")
                    .arg("--random-source=/dev/urandom")
                    .status()?;
                if !status.success() {
                    return Err(Error::invalid_input(format!(
                        "{} exited with {status}",
                        state.tool
                    )));
                }
                Ok(())
            });
        }

        Ok(())
    }

    fn chunks(&mut self) -> Result<Vec<Chunk>> {
        let mut state = self.state.borrow_mut();
        let data = std::fs::read(&state.path)?;
        let image_size = data.len();

        if image_size <= 2 * DATA_AREA {
            return Err(Error::invalid_input(format!(
                "VeraCrypt container is only {image_size} bytes; need more than {}",
                2 * DATA_AREA
            )));
        }

        state.old_salt = data[..SALT_LEN].to_vec();
        let buf = SharedBuf::new(data);

        let header_chunk = if state.new_salt {
            Chunk::fixed(SALT_LEN as i64, HEADER_LEN, SALT_LEN, buf.clone())
        } else {
            Chunk::fixed(0, SALT_LEN + HEADER_LEN, 0, buf.clone())
        };

        let chunks = vec![
            header_chunk.with_module(NAME),
            Chunk::fixed(512, HEADER_AREA - 512, 512, buf.clone()).with_module(NAME),
            Chunk::fixed(
                DATA_AREA as i64,
                image_size - 2 * DATA_AREA,
                DATA_AREA,
                buf.clone(),
            )
            .with_module(NAME),
            // Backup header area, glued to the end of the output.
            Chunk::fixed(
                -(DATA_AREA as i64),
                HEADER_AREA,
                image_size - DATA_AREA,
                buf.clone(),
            )
            .with_module(NAME),
        ];

        state.buf = buf;
        Ok(chunks)
    }
}
