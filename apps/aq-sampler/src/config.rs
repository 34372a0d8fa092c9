use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

fn default_period_s() -> f64 {
    5.0
}

fn default_max_retries() -> u32 {
    3
}

fn default_output() -> PathBuf {
    PathBuf::from("samples.jsonl")
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct I2cSensorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Address strap pin pulled high instead of low.
    #[serde(default)]
    pub address_pin_high: bool,
}

impl Default for I2cSensorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address_pin_high: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialSensorConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Serial device path, e.g. /dev/ttyUSB0. Requires the `serial`
    /// feature; ignored under the mock backend.
    pub port: Option<String>,
}

impl Default for SerialSensorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerConfig {
    #[serde(default = "default_period_s")]
    pub period_s: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_output")]
    pub output: PathBuf,
    #[serde(default)]
    pub bmp280: I2cSensorConfig,
    #[serde(default)]
    pub ccs811: I2cSensorConfig,
    #[serde(default)]
    pub hdc1080: I2cSensorConfig,
    #[serde(default)]
    pub s8: SerialSensorConfig,
    #[serde(default)]
    pub pms7003: SerialSensorConfig,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            period_s: default_period_s(),
            max_retries: default_max_retries(),
            output: default_output(),
            bmp280: I2cSensorConfig::default(),
            ccs811: I2cSensorConfig::default(),
            hdc1080: I2cSensorConfig::default(),
            s8: SerialSensorConfig::default(),
            pms7003: SerialSensorConfig::default(),
        }
    }
}

pub fn load_config(path: impl AsRef<Path>) -> anyhow::Result<SamplerConfig> {
    let path = path.as_ref();
    let raw =
        fs::read_to_string(path).with_context(|| format!("reading config: {}", path.display()))?;
    let config: SamplerConfig =
        serde_yaml::from_str(&raw).with_context(|| format!("parsing config: {}", path.display()))?;
    Ok(config)
}
