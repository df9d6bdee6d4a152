//! PDF module stub.
//!
//! Placeholder kept from the early layout experiments; selecting it from
//! the CLI reports it as unimplemented. Its canned chunk pattern remains a
//! handy fixture for exercising mixed fixed/flexible placement.

use std::rc::Rc;

use clap::{Arg, ArgMatches, Command};

use crate::chunk::{Chunk, SharedBuf};
use crate::error::{Error, Result};
use crate::hooks::HookBus;
use crate::module::Module;

pub const NAME: &str = "pdf";

#[derive(Default)]
pub struct PdfModule;

impl Module for PdfModule {
    fn name(&self) -> &'static str {
        NAME
    }

    fn params(&self, cmd: Command) -> Command {
        cmd.arg(
            Arg::new("pdf-file")
                .long("pdf-file")
                .value_name("PATH")
                .help_heading("PDF Options")
                .help("Source PDF file"),
        )
    }

    fn setup(&mut self, _args: &ArgMatches, _hooks: &Rc<HookBus>) -> Result<()> {
        Err(Error::invalid_input("the pdf module is not implemented yet"))
    }

    fn chunks(&mut self) -> Result<Vec<Chunk>> {
        let data = SharedBuf::new(vec![b'P'; 3000]);
        Ok(vec![
            Chunk::fixed(100, 100, 10, data.clone()).with_module(NAME),
            Chunk::fixed(1000, 100, 100, data.clone()).with_module(NAME),
            Chunk::flexible(Some(1000), Some(1900), 100, 120, data.clone()).with_module(NAME),
            Chunk::flexible(Some(1000), Some(1900), 300, 120, data.clone()).with_module(NAME),
            Chunk::flexible(Some(1800), Some(2200), 200, 120, data.clone()).with_module(NAME),
            Chunk::fixed(2300, 100, 200, data).with_module(NAME),
        ])
    }
}
