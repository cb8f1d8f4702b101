//! Man page generator for boardflash
//!
//! Writes `boardflash.1` plus one `boardflash-<command>.1` page per
//! subcommand.
//!
//! Usage: cargo run --bin gen-manpage -- [output-dir]

use clap::CommandFactory;
use std::fs;
use std::path::{Path, PathBuf};

#[allow(dead_code)]
#[path = "../cli.rs"]
mod cli;

fn render(cmd: clap::Command, path: &Path) -> std::io::Result<()> {
    let mut buffer = Vec::new();
    clap_mangen::Man::new(cmd).render(&mut buffer)?;
    fs::write(path, buffer)?;
    println!("  {}", path.display());
    Ok(())
}

fn main() -> std::io::Result<()> {
    let output_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("man"));
    fs::create_dir_all(&output_dir)?;

    let cmd = cli::Cli::command();
    println!("Man pages generated:");

    for sub in cmd.get_subcommands() {
        let path = output_dir.join(format!("boardflash-{}.1", sub.get_name()));
        render(sub.clone(), &path)?;
    }

    let main_page = output_dir.join("boardflash.1");
    render(cmd, &main_page)?;

    println!("\nTo view the man page:");
    println!("  man -l {}", main_page.display());

    Ok(())
}
