use clap::Parser;
use log::warn;
use simplefat::disk::{BlockDisk, Disk, MAX_BLOCKS};
use simplefat::fs::{FatFileSystem, FileSystem};
use simplefat::shell::Shell;
use std::error::Error;
use std::io;
use std::path::PathBuf;

/// Interactive shell over a FAT-formatted disk image.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Disk image to open, created if it does not exist
    #[arg(default_value = "diskfile.bin")]
    image: PathBuf,

    /// Number of blocks in the volume
    #[arg(long, default_value_t = MAX_BLOCKS)]
    blocks: usize,

    /// Format the volume before starting the shell
    #[arg(long)]
    format: bool,
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let disk = BlockDisk::open(&args.image, args.blocks)?;
    let mut fs = FatFileSystem::mount(disk)?;

    if args.format {
        fs.format()?;
    } else if !fs.is_formatted() {
        warn!(
            "{} holds no filesystem, formatting it",
            args.image.display()
        );
        fs.format()?;
    }

    let mut shell = Shell::new(fs);
    let stdin = io::stdin();
    shell.run(stdin.lock(), io::stdout())?;

    shell.into_inner().unmount()?;
    Ok(())
}

fn main() {
    env_logger::init();

    if let Err(e) = run(Args::parse()) {
        eprintln!("simplefat: {}", e);
        std::process::exit(1);
    }
}
