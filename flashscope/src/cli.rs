use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use flashscope_lib::Chip;
use flashscope_lib::utils::Utils;
use std::path::PathBuf;

use crate::config::{FlashScopeConfig, region_string};

#[derive(Parser, Debug)]
#[command(author, version, about = "flashscope CLI", long_about = None)]
pub struct Cli {
    /// JSON configuration file path
    #[arg(long = "config", short = 'f')]
    pub config: Option<String>,

    /// Serial port of a device that can be reset into its ROM bootloader
    #[arg(short = 'p', long = "port")]
    pub port: Option<String>,

    /// Baud rate after the handshake at 115200 (default: 115200)
    #[arg(short = 'b', long = "baud")]
    pub baud: Option<u32>,

    /// Use a raw flash dump instead of a device
    #[arg(short = 'i', long = "image", conflicts_with = "port")]
    pub image: Option<String>,

    /// Bytes per transfer, e.g. 0x1000 or 4k (default: 0x1000)
    #[arg(long = "block-size")]
    pub block_size: Option<String>,

    /// Expected chip type; a serial device reports its own
    #[arg(long = "chip", value_enum)]
    pub chip: Option<Chip>,

    /// Flash size, e.g. 4M or 0x400000 (default: image size or the flash JEDEC ID)
    #[arg(long = "flash-size")]
    pub flash_size: Option<String>,

    /// Suppress progress bar output (default: false)
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Print the partition table at 0x8000
    #[command(name = "partitions")]
    Partitions(ExportArgs),

    /// Decode the NVS partition
    #[command(name = "nvs")]
    Nvs(ExportArgs),

    /// Scan the SPIFFS/FAT partition for file names
    #[command(name = "files")]
    Files(ExportArgs),

    /// Read a flash region into a file
    #[command(name = "read_flash")]
    ReadFlash(ReadFlash),

    /// Save the whole flash (or a region) with a JSON sidecar
    #[command(name = "backup")]
    Backup(Backup),

    /// Erase the entire flash and write a backup image from address 0
    #[command(name = "restore")]
    Restore(Restore),

    /// Erase the entire flash
    #[command(name = "erase_flash")]
    EraseFlash,
}

#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportArgs {
    /// Also write the rows to a CSV file
    #[arg(long = "csv")]
    pub csv: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct ReadFlash {
    /// Region to read (format: <address:size>)
    #[arg(required = true)]
    pub region: String,

    /// Output file
    #[arg(required = true)]
    pub output: PathBuf,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct Backup {
    /// Directory receiving <stem>.bin and <stem>.json
    #[arg(long = "dir", default_value = ".")]
    pub dir: PathBuf,

    /// File name stem (default: esp_backup_<date>)
    #[arg(long = "stem")]
    pub stem: Option<String>,

    /// Back up only this region (format: <address:size>)
    #[arg(long = "region")]
    pub region: Option<String>,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct Restore {
    /// Raw backup image
    #[arg(required = true)]
    pub file: PathBuf,
}

/// Where flash bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Image(PathBuf),
    Serial { port: String, baud: u32 },
}

/// CLI arguments merged over the configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub target: Target,
    pub chip: Option<Chip>,
    pub block_size: u32,
    pub flash_size: Option<u32>,
    pub quiet: bool,
}

/// Merge CLI arguments with configuration file, CLI args take precedence
pub fn merge_config(args: &Cli, config: Option<&FlashScopeConfig>) -> Result<Settings> {
    let defaults = FlashScopeConfig::with_defaults();
    let base_config = config.unwrap_or(&defaults);

    let chip = match &args.chip {
        Some(c) => Some(c.clone()),
        None => base_config.parse_chip()?,
    };

    let block_size = match &args.block_size {
        Some(s) => Utils::str_to_u32(s).with_context(|| format!("Invalid block size {}", s))?,
        None => base_config.parse_block_size()?,
    };
    if block_size == 0 {
        bail!("Block size must be non-zero");
    }

    let flash_size = match &args.flash_size {
        Some(s) => Some(Utils::str_to_u32(s).with_context(|| format!("Invalid flash size {}", s))?),
        None => base_config.parse_flash_size()?,
    };

    // A port on the command line beats an image named in the config file.
    let image = match (&args.image, &args.port) {
        (Some(image), _) => Some(image.clone()),
        (None, Some(_)) => None,
        (None, None) => base_config.image.clone(),
    };
    let target = match image {
        Some(path) => Target::Image(PathBuf::from(path)),
        None => {
            let port = args
                .port
                .clone()
                .unwrap_or_else(|| base_config.port.clone());
            if port.is_empty() {
                bail!("Either --port or --image must be specified, on the command line or in the config file");
            }
            Target::Serial {
                port,
                baud: args.baud.unwrap_or(base_config.baud),
            }
        }
    };

    Ok(Settings {
        target,
        chip,
        block_size,
        flash_size,
        quiet: args.quiet || base_config.quiet,
    })
}

/// Pick the command from the CLI, falling back to the one in the config file.
pub fn resolve_command(args: &Cli, config: Option<&FlashScopeConfig>) -> Result<Commands> {
    if let Some(cmd) = &args.command {
        return Ok(cmd.clone());
    }
    let Some(cfg) = config else {
        bail!("No command specified. Use a subcommand or provide a config file with a command.");
    };

    let export = |section: &crate::config::ExportCommandConfig| ExportArgs {
        csv: section.csv.as_ref().map(PathBuf::from),
    };

    if let Some(ref section) = cfg.partitions {
        Ok(Commands::Partitions(export(section)))
    } else if let Some(ref section) = cfg.nvs {
        Ok(Commands::Nvs(export(section)))
    } else if let Some(ref section) = cfg.files {
        Ok(Commands::Files(export(section)))
    } else if let Some(ref read_flash) = cfg.read_flash {
        Ok(Commands::ReadFlash(ReadFlash {
            region: region_string(&read_flash.address, &read_flash.size)?,
            output: PathBuf::from(&read_flash.path),
        }))
    } else if let Some(ref backup) = cfg.backup {
        let region = match (&backup.address, &backup.size) {
            (Some(address), Some(size)) => Some(region_string(address, size)?),
            _ => None,
        };
        Ok(Commands::Backup(Backup {
            dir: PathBuf::from(&backup.dir),
            stem: backup.stem.clone(),
            region,
        }))
    } else if let Some(ref restore) = cfg.restore {
        Ok(Commands::Restore(Restore {
            file: PathBuf::from(&restore.path),
        }))
    } else if cfg.erase_flash.is_some() {
        Ok(Commands::EraseFlash)
    } else {
        bail!("No command specified. Use a subcommand or provide a config file with a command.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("flashscope").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn image_target_with_defaults() {
        let args = parse(&["-i", "dump.bin", "partitions"]);
        let settings = merge_config(&args, None).unwrap();
        assert_eq!(settings.target, Target::Image(PathBuf::from("dump.bin")));
        assert_eq!(settings.block_size, 0x1000);
        assert_eq!(settings.flash_size, None);
        assert_eq!(
            resolve_command(&args, None).unwrap(),
            Commands::Partitions(ExportArgs::default())
        );
    }

    #[test]
    fn cli_values_override_config() {
        let config: FlashScopeConfig = serde_json::from_str(
            r#"{ "port": "/dev/ttyUSB0", "baud": 921600, "block_size": "0x800", "nvs": { "csv": "nvs.csv" } }"#,
        )
        .unwrap();
        let args = parse(&["-b", "460800", "--block-size", "4k", "--flash-size", "8M"]);
        let settings = merge_config(&args, Some(&config)).unwrap();
        assert_eq!(
            settings.target,
            Target::Serial {
                port: "/dev/ttyUSB0".to_string(),
                baud: 460800
            }
        );
        assert_eq!(settings.block_size, 0x1000);
        assert_eq!(settings.flash_size, Some(0x80_0000));
        assert_eq!(
            resolve_command(&args, Some(&config)).unwrap(),
            Commands::Nvs(ExportArgs {
                csv: Some(PathBuf::from("nvs.csv"))
            })
        );
    }

    #[test]
    fn missing_target_and_command_are_errors() {
        let args = parse(&["files"]);
        assert!(merge_config(&args, None).is_err());

        let args = parse(&["-i", "dump.bin"]);
        assert!(resolve_command(&args, None).is_err());
    }

    #[test]
    fn zero_block_size_is_rejected() {
        let args = parse(&["-i", "dump.bin", "--block-size", "0", "nvs"]);
        assert!(merge_config(&args, None).is_err());
    }

    #[test]
    fn config_backup_becomes_a_region() {
        let config: FlashScopeConfig = serde_json::from_str(
            r#"{ "image": "dump.bin", "backup": { "dir": "out", "address": "0x9000", "size": "0x6000" } }"#,
        )
        .unwrap();
        let args = parse(&[]);
        assert_eq!(
            resolve_command(&args, Some(&config)).unwrap(),
            Commands::Backup(Backup {
                dir: PathBuf::from("out"),
                stem: None,
                region: Some("0x9000:0x6000".to_string()),
            })
        );
    }
}
