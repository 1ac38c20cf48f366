mod cli;
mod config;
mod progress;
mod report;
mod serial;

use anyhow::{Context, Result};
use clap::Parser;
use flashscope_lib::backup;
use flashscope_lib::progress::{ProgressHelper, ProgressOperation, ProgressStatus};
use flashscope_lib::serial::{SerialOptions, SerialTransport};
use flashscope_lib::utils::Utils;
use flashscope_lib::{FlashRegion, FlashTransport, ImageTransport, export, inspect};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::process;

use crate::cli::{Cli, Commands, Settings, Target, merge_config, resolve_command};
use crate::config::FlashScopeConfig;
use crate::progress::create_progress_callback;

fn main() {
    // Initialize tracing, set log level from environment variable
    // Log level can be controlled by setting the RUST_LOG environment variable, e.g.:
    // RUST_LOG=debug, RUST_LOG=flashscope_lib=trace, RUST_LOG=info
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("off"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .init();

    if let Err(e) = run(Cli::parse()) {
        eprintln!("Error: {:?}", e);
        process::exit(1);
    }
}

fn run(args: Cli) -> Result<()> {
    let config = match &args.config {
        Some(path) => {
            let config = FlashScopeConfig::from_file(path)?;
            config.validate().context("Invalid config file")?;
            Some(config)
        }
        None => None,
    };

    let command = resolve_command(&args, config.as_ref())?;
    let settings = merge_config(&args, config.as_ref())?;
    let progress = ProgressHelper::new(create_progress_callback(settings.quiet), 0);
    tracing::debug!("target {:?}, block size 0x{:X}", settings.target, settings.block_size);

    match &settings.target {
        Target::Image(path) => {
            let mut transport = ImageTransport::open(path)
                .with_context(|| format!("Failed to open flash image {}", path.display()))?;
            if let Some(chip) = &settings.chip {
                transport = transport.with_chip(chip.description());
            }
            execute(&command, &mut transport, &settings, &progress)?;
            transport
                .save()
                .with_context(|| format!("Failed to save flash image {}", path.display()))
        }
        Target::Serial { port, baud } => {
            let port = serial::normalize_port_name(port);
            serial::check_port_available(&port)?;
            let mut transport = SerialTransport::open(&SerialOptions {
                port_name: port.clone(),
                baud: *baud,
                chip: settings.chip.clone(),
                flash_size: settings.flash_size,
            })
            .with_context(|| format!("Failed to open serial port {}", port))?;
            execute(&command, &mut transport, &settings, &progress)
        }
    }
}

fn execute<T: FlashTransport>(
    command: &Commands,
    transport: &mut T,
    settings: &Settings,
    progress: &ProgressHelper,
) -> Result<()> {
    let block_size = settings.block_size;
    let mut stdout = io::stdout().lock();

    match command {
        Commands::Partitions(params) => {
            let table = inspect::read_partition_table(transport, block_size, progress)
                .context("Failed to read partition table")?;
            report::print_partitions(&table, &mut stdout)?;
            if let Some(path) = &params.csv {
                export::write_partitions_csv(&table, create_file(path)?)?;
            }
        }
        Commands::Nvs(params) => {
            let table = inspect::read_partition_table(transport, block_size, progress)
                .context("Failed to read partition table")?;
            let (partition, entries) = inspect::read_nvs(transport, &table, block_size, progress)
                .context("Failed to read NVS")?;
            report::print_nvs(&partition, &entries, &mut stdout)?;
            if let Some(path) = &params.csv {
                export::write_nvs_csv(&entries, create_file(path)?)?;
            }
        }
        Commands::Files(params) => {
            let table = inspect::read_partition_table(transport, block_size, progress)
                .context("Failed to read partition table")?;
            let (partition, files) =
                inspect::scan_filesystem(transport, &table, block_size, progress)
                    .context("Failed to scan filesystem")?;
            report::print_files(&partition, &files, &mut stdout)?;
            if let Some(path) = &params.csv {
                export::write_files_csv(&files, create_file(path)?)?;
            }
        }
        Commands::ReadFlash(params) => {
            let region = Utils::parse_region(&params.region)
                .with_context(|| format!("Invalid region {}", params.region))?;
            let data = inspect::read_region(transport, region, block_size, progress)
                .context("Failed to read flash")?;
            std::fs::write(&params.output, &data)
                .with_context(|| format!("Failed to write {}", params.output.display()))?;
        }
        Commands::Backup(params) => {
            let flash_size = backup::resolve_flash_size(&*transport, settings.flash_size)?;
            let region = match &params.region {
                Some(s) => {
                    Utils::parse_region(s).with_context(|| format!("Invalid region {}", s))?
                }
                None => FlashRegion::new(0, flash_size)?,
            };
            let (data, metadata) =
                backup::backup(transport, region, flash_size, block_size, progress)
                    .context("Failed to back up flash")?;
            let stem = params.stem.clone().unwrap_or_else(backup::default_stem);
            let files = backup::write_backup(&params.dir, &stem, &data, &metadata)?;
            writeln!(
                stdout,
                "Saved {} and {}",
                files.image.display(),
                files.metadata.display()
            )?;
        }
        Commands::Restore(params) => {
            let image = std::fs::read(&params.file)
                .with_context(|| format!("Failed to read {}", params.file.display()))?;
            backup::restore(transport, &image, settings.flash_size, block_size, progress)
                .context("Failed to restore flash")?;
        }
        Commands::EraseFlash => {
            let spinner = progress.create_spinner(ProgressOperation::EraseAll);
            match transport.erase_all() {
                Ok(()) => spinner.finish(ProgressStatus::Success),
                Err(e) => {
                    spinner.finish(ProgressStatus::Failed);
                    return Err(e).context("Failed to erase flash");
                }
            }
        }
    }
    Ok(())
}

fn create_file(path: &Path) -> Result<BufWriter<File>> {
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    Ok(BufWriter::new(file))
}
