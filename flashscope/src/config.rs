use anyhow::{Context, Result, bail};
use clap::ValueEnum;
use flashscope_lib::Chip;
use flashscope_lib::utils::Utils;
use serde::{Deserialize, Serialize};

/// 应用程序的默认配置值
pub struct Defaults;

impl Defaults {
    pub const BAUD: u32 = 115200;
    pub const BLOCK_SIZE: u32 = flashscope_lib::DEFAULT_BLOCK_SIZE;
    pub const BACKUP_DIR: &'static str = ".";
}

/// 十六进制字符串，例如 "0x9000"
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HexString(pub String);

impl HexString {
    pub fn to_u32(&self) -> Result<u32> {
        let Some(hex_part) = self.0.strip_prefix("0x") else {
            bail!("Invalid hex string format: {}", self.0);
        };
        u32::from_str_radix(hex_part, 16)
            .with_context(|| format!("Failed to parse hex string '{}'", self.0))
    }
}

/// 表格导出配置（partitions / nvs / files）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportCommandConfig {
    pub csv: Option<String>,
}

/// 读取 Flash 命令配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadFlashCommandConfig {
    pub path: String,
    pub address: HexString,
    pub size: HexString,
}

/// 备份命令配置，未给出 address/size 时备份整片 Flash
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupCommandConfig {
    #[serde(default = "default_backup_dir")]
    pub dir: String,
    pub stem: Option<String>,
    pub address: Option<HexString>,
    pub size: Option<HexString>,
}

/// 恢复命令配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreCommandConfig {
    pub path: String,
}

/// 擦除 Flash 命令配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EraseFlashCommandConfig {}

/// JSON 配置文件的根结构
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlashScopeConfig {
    #[serde(default)]
    pub port: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
    /// Flash 镜像文件，代替真实设备
    pub image: Option<String>,
    pub chip: Option<String>,
    pub block_size: Option<HexString>,
    pub flash_size: Option<HexString>,
    #[serde(default)]
    pub quiet: bool,

    // 命令 - 最多存在其中一个
    pub partitions: Option<ExportCommandConfig>,
    pub nvs: Option<ExportCommandConfig>,
    pub files: Option<ExportCommandConfig>,
    pub read_flash: Option<ReadFlashCommandConfig>,
    pub backup: Option<BackupCommandConfig>,
    pub restore: Option<RestoreCommandConfig>,
    pub erase_flash: Option<EraseFlashCommandConfig>,
}

fn default_baud() -> u32 {
    Defaults::BAUD
}
fn default_backup_dir() -> String {
    Defaults::BACKUP_DIR.to_string()
}

impl FlashScopeConfig {
    /// 从 JSON 文件加载配置
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path))?;
        let config: FlashScopeConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path))?;
        Ok(config)
    }

    /// 创建一个具有所有默认值的配置
    pub fn with_defaults() -> Self {
        Self {
            port: String::new(),
            baud: Defaults::BAUD,
            image: None,
            chip: None,
            block_size: None,
            flash_size: None,
            quiet: false,
            partitions: None,
            nvs: None,
            files: None,
            read_flash: None,
            backup: None,
            restore: None,
            erase_flash: None,
        }
    }

    pub fn parse_chip(&self) -> Result<Option<Chip>> {
        self.chip
            .as_deref()
            .map(|name| {
                Chip::from_str(name, true).map_err(|e| anyhow::anyhow!("Invalid chip type: {}", e))
            })
            .transpose()
    }

    pub fn parse_block_size(&self) -> Result<u32> {
        match &self.block_size {
            Some(hex) => hex.to_u32(),
            None => Ok(Defaults::BLOCK_SIZE),
        }
    }

    pub fn parse_flash_size(&self) -> Result<Option<u32>> {
        self.flash_size.as_ref().map(HexString::to_u32).transpose()
    }

    fn command_count(&self) -> usize {
        [
            self.partitions.is_some(),
            self.nvs.is_some(),
            self.files.is_some(),
            self.read_flash.is_some(),
            self.backup.is_some(),
            self.restore.is_some(),
            self.erase_flash.is_some(),
        ]
        .iter()
        .filter(|&&x| x)
        .count()
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        if self.command_count() > 1 {
            bail!(
                "Configuration may contain at most one command (partitions, nvs, files, read_flash, backup, restore or erase_flash)"
            );
        }

        self.parse_chip()?;
        if self.parse_block_size()? == 0 {
            bail!("block_size must be non-zero");
        }
        self.parse_flash_size()?;

        if let Some(ref read_flash) = self.read_flash {
            read_flash
                .address
                .to_u32()
                .with_context(|| format!("Invalid address for read_flash '{}'", read_flash.path))?;
            read_flash
                .size
                .to_u32()
                .with_context(|| format!("Invalid size for read_flash '{}'", read_flash.path))?;
        }

        if let Some(ref backup) = self.backup {
            match (&backup.address, &backup.size) {
                (Some(address), Some(size)) => {
                    address.to_u32().context("Invalid backup address")?;
                    size.to_u32().context("Invalid backup size")?;
                }
                (None, None) => {}
                _ => bail!("backup needs both address and size for a partial backup"),
            }
        }

        Ok(())
    }
}

/// 把配置中的数值转换为 CLI 相同的字符串形式
pub fn region_string(address: &HexString, size: &HexString) -> Result<String> {
    let region = format!("{}:{}", address.0, size.0);
    Utils::parse_region(&region).with_context(|| format!("Invalid region {}", region))?;
    Ok(region)
}
