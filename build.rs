//! Renders the `salt-provisioner` man pages into `OUT_DIR`.
//!
//! One page covers the top-level command and one page per subcommand
//! (`salt-provisioner-apply.1`, `salt-provisioner-command.1`).

use std::env;
use std::error::Error;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::{Command, CommandFactory};
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

fn render(command: Command, title: &str, out_dir: &Path) -> Result<(), Box<dyn Error>> {
    let mut buffer = Vec::new();
    Man::new(command).title(title).render(&mut buffer)?;
    fs::write(out_dir.join(format!("{title}.1")), buffer)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let mut stdout = io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let out_dir = env::var_os("OUT_DIR")
        .map(PathBuf::from)
        .ok_or("OUT_DIR was not set")?;

    let root = cli::Cli::command();
    for sub in root.get_subcommands() {
        let title = format!("{}-{}", root.get_name(), sub.get_name());
        render(sub.clone(), &title, &out_dir)?;
    }
    let title = root.get_name().to_owned();
    render(root, &title, &out_dir)
}
