//! campus-config - 配置加载库
//!
//! 三个 YAML 文件按顺序合并：通用配置 → 服务配置 → 密钥文件。
//! 后加载的文件按字段覆盖先加载的值，`CAMPUS_` 前缀的环境变量最后覆盖。

mod extract;
mod sections;
mod secrets;
pub mod serde_secret;

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

pub use extract::*;
pub use sections::*;
pub use secrets::*;

/// 环境变量覆盖前缀，`CAMPUS_COMMON__ENVIRONMENT=stag` 覆盖 `common.environment`
pub const ENV_PREFIX: &str = "CAMPUS_";

/// sops 在加密文件中写入的元数据键
const SOPS_METADATA_KEY: &str = "sops";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decrypt {path}: {message}")]
    Decrypt { path: String, message: String },

    #[error("Failed to load config: {0}")]
    Load(#[from] figment::Error),
}

/// 三个配置文件路径
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub common: PathBuf,
    pub service: PathBuf,
    pub secrets: PathBuf,
}

impl ConfigPaths {
    pub fn new(
        common: impl Into<PathBuf>,
        service: impl Into<PathBuf>,
        secrets: impl Into<PathBuf>,
    ) -> Self {
        Self {
            common: common.into(),
            service: service.into(),
            secrets: secrets.into(),
        }
    }
}

/// 加载并合并三个配置文件
pub fn load_config<C: DeserializeOwned>(
    paths: &ConfigPaths,
    decryptor: &dyn SecretsDecryptor,
) -> Result<C, ConfigError> {
    let common = read_file(&paths.common)?;
    let service = read_file(&paths.service)?;
    let secrets = read_secrets(&paths.secrets, decryptor)?;

    let config = Figment::new()
        .merge(Yaml::string(&common))
        .merge(Yaml::string(&service))
        .merge(Yaml::string(&secrets))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()?;

    debug!(
        common = %paths.common.display(),
        service = %paths.service.display(),
        secrets = %paths.secrets.display(),
        "Config loaded"
    );

    Ok(config)
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })
}

/// 读取密钥文件，带 sops 元数据时交给解密器处理
fn read_secrets(path: &Path, decryptor: &dyn SecretsDecryptor) -> Result<String, ConfigError> {
    let raw = read_file(path)?;
    if Figment::from(Yaml::string(&raw)).contains(SOPS_METADATA_KEY) {
        debug!(path = %path.display(), "Decrypting secrets file");
        return decryptor.decrypt(path);
    }
    Ok(raw)
}
