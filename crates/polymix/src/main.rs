//! polymix CLI (`pmx`)
//!
//! Thin wrapper over polymix-core. Parsing runs in two passes: the global
//! flags first (tolerating anything module-specific), then a strict reparse
//! once the selected modules have contributed their own flags.

use std::path::Path;
use std::rc::Rc;

use anyhow::anyhow;
use clap::error::ErrorKind;
use clap::{Arg, ArgAction, Command};

use polymix_core::modules::builtin_registry;
use polymix_core::{HookBus, compose, logging};

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn base_command() -> Command {
    Command::new("pmx")
        .about("Compose one file that several container formats parse at once")
        .arg(
            Arg::new("modules")
                .short('m')
                .long("modules")
                .num_args(1..)
                .value_name("MODULE")
                .help("Modules to combine, in placement order"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("PATH")
                .help("Output file"),
        )
        .arg(
            Arg::new("list-modules")
                .short('l')
                .long("list-modules")
                .action(ArgAction::SetTrue)
                .help("List registered modules and exit"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .default_value("warn")
                .help("Log filter (RUST_LOG overrides)"),
        )
}

/// First line of a clap error, without the `error: ` prefix.
fn one_line(err: &clap::Error) -> String {
    let text = err.to_string();
    let line = text.lines().next().unwrap_or_default();
    line.strip_prefix("error: ").unwrap_or(line).to_string()
}

fn run() -> anyhow::Result<()> {
    let mut registry = builtin_registry();

    // Pass one: global flags only; module flags are unknown here and
    // ignored.
    let first = base_command()
        .disable_help_flag(true)
        .ignore_errors(true)
        .try_get_matches()
        .ok();

    if let Some(first) = &first {
        if first.get_flag("list-modules") {
            for name in registry.names() {
                println!("{name}");
            }
            return Ok(());
        }
    }

    let selected: Vec<String> = first
        .as_ref()
        .and_then(|matches| matches.get_many::<String>("modules"))
        .map(|values| values.cloned().collect())
        .unwrap_or_default();

    // Pass two: full command, selected modules included, parsed strictly.
    let mut cmd = base_command();
    for (index, name) in selected.iter().enumerate() {
        if selected[..index].contains(name) {
            return Err(anyhow!("module '{name}' selected more than once"));
        }
        cmd = registry.get(name)?.params(cmd);
    }
    let matches = match cmd.try_get_matches() {
        Ok(matches) => matches,
        Err(err)
            if matches!(
                err.kind(),
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
            ) =>
        {
            err.exit()
        }
        Err(err) => return Err(anyhow!(one_line(&err))),
    };

    let level = matches
        .get_one::<String>("log-level")
        .cloned()
        .unwrap_or_else(|| "warn".to_string());
    logging::init(&level)?;

    if selected.is_empty() {
        return Err(anyhow!("the --modules option is required"));
    }
    let output = matches
        .get_one::<String>("output")
        .ok_or_else(|| anyhow!("the --output option is required"))?;

    let hooks = Rc::new(HookBus::new());
    for name in &selected {
        registry.get_mut(name)?.setup(&matches, &hooks)?;
    }

    compose::compose(&mut registry, &selected, &hooks, Path::new(output))?;
    Ok(())
}
