use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::error;

use udfkit::disc::{read_disc, ReadOptions};
use udfkit::error::exit_code;
use udfkit::fix::{check, FixOptions, Prompt, RepairPolicy};
use udfkit::io::FileIo;
use udfkit::label::{
    compute_windows_serial_number, extract_label, set_logical_volume_identifier, volume_set_uuid,
};

#[derive(Parser, Debug)]
#[command(version, about = "Inspect, check and repair UDF filesystems", long_about = None)]
struct Args {
    /// The block device or image file to open
    device: PathBuf,

    /// Logical block size; detected from the medium when omitted
    #[arg(long)]
    blocksize: Option<u32>,

    /// Session start block for multisession media
    #[arg(long)]
    startblock: Option<u32>,

    /// Last recorded block, overriding what the device reports
    #[arg(long)]
    lastblock: Option<u32>,

    /// Block to search for the Virtual Allocation Table
    #[arg(long)]
    vatblock: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print volume information
    Info,
    /// Check the filesystem and optionally repair it
    Check {
        /// repair without asking
        #[arg(long)]
        autofix: bool,
        /// ask before each repair
        #[arg(long)]
        interactive: bool,
        /// dry run: report the repairs, write nothing
        #[arg(long)]
        no_write: bool,
        /// repair even write-once or read-only media
        #[arg(long)]
        force: bool,
    },
    /// Print or set the volume label
    Label {
        /// new label; prints the current one when omitted
        new_label: Option<String>,
    },
}

struct StdinPrompt;

impl Prompt for StdinPrompt {
    fn confirm(&mut self, message: &str) -> bool {
        print!("{} [Y/n] ", message);
        let _ = io::stdout().flush();
        let mut line = String::new();
        if io::stdin().read_line(&mut line).is_err() {
            return false;
        }
        matches!(line.trim(), "" | "y" | "Y" | "yes")
    }
}

fn run(args: &Args) -> i32 {
    let writable = matches!(
        args.command,
        Command::Check { .. } | Command::Label { new_label: Some(_) }
    );
    let mut io = match FileIo::open(&args.device, writable) {
        Ok(io) => io,
        Err(e) => {
            error!("cannot open {}: {}", args.device.display(), e);
            return exit_code::OPERATIONAL_ERROR;
        }
    };

    let opts = ReadOptions {
        block_size: args.blocksize,
        start_block: args.startblock,
        last_block: args.lastblock,
        vat_block: args.vatblock,
        cancel: None,
    };

    let mut disc = match read_disc(&mut io, &opts) {
        Ok(disc) => disc,
        Err(udfkit::UdfError::Cancelled) => return exit_code::CANCELLED,
        Err(e) => {
            error!("{}", e);
            return exit_code::OPERATIONAL_ERROR;
        }
    };

    match &args.command {
        Command::Info => {
            println!("label={}", extract_label(&disc));
            println!("blocksize={}", disc.block_size);
            println!("blocks={}", disc.blocks);
            println!("udfrev={:x}.{:02x}", disc.udf_rev >> 8, disc.udf_rev & 0xFF);
            println!(
                "udfwriterev={:x}.{:02x}",
                disc.udf_write_rev >> 8,
                disc.udf_write_rev & 0xFF
            );
            println!("numfiles={}", disc.num_files);
            println!("numdirs={}", disc.num_dirs);
            println!("freespace={}", disc.free_space_blocks);
            println!("totalspace={}", disc.total_space_blocks);
            if let Some(uuid) = volume_set_uuid(&disc) {
                println!("uuid={}", uuid);
            }
            if let Some(serial) = compute_windows_serial_number(&disc) {
                println!("winserialnum=0x{:08x}", serial);
            }
            if let Some(lvid) = &disc.lvid {
                println!(
                    "integrity={}",
                    if lvid.is_open() { "opened" } else { "closed" }
                );
            }
            exit_code::OK
        }
        Command::Check {
            autofix,
            interactive,
            no_write,
            force,
        } => {
            let mut prompt = StdinPrompt;
            let mut fix_opts = FixOptions {
                policy: if *interactive {
                    RepairPolicy::Interactive
                } else if *autofix {
                    RepairPolicy::AutoFix
                } else {
                    RepairPolicy::ReportOnly
                },
                no_write: *no_write,
                force: *force,
                prompt: Some(&mut prompt),
                ..Default::default()
            };
            match check(&mut disc, &mut io, &mut fix_opts) {
                Ok(report) => {
                    println!(
                        "{} files, {} directories, {} errors found, {} fixed",
                        report.num_files,
                        report.num_dirs,
                        report.errors_found,
                        report.errors_fixed
                    );
                    report.exit_code
                }
                Err(udfkit::UdfError::Cancelled) => exit_code::CANCELLED,
                Err(e) => {
                    error!("{}", e);
                    exit_code::ERRORS_UNCORRECTED
                }
            }
        }
        Command::Label { new_label } => match new_label {
            None => {
                println!("{}", extract_label(&disc));
                exit_code::OK
            }
            Some(label) => {
                let fix_opts = FixOptions {
                    policy: RepairPolicy::AutoFix,
                    ..Default::default()
                };
                match set_logical_volume_identifier(&mut disc, &mut io, &fix_opts, label) {
                    Ok(()) => exit_code::OK,
                    Err(e) => {
                        error!("{}", e);
                        exit_code::OPERATIONAL_ERROR
                    }
                }
            }
        },
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    ExitCode::from(run(&args) as u8)
}
