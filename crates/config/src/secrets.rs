//! 加密配置文件解密

use std::path::Path;
use std::process::Command;

use crate::ConfigError;

/// 加密密钥文件解密器
pub trait SecretsDecryptor: Send + Sync {
    /// 返回解密后的 YAML 文本
    fn decrypt(&self, path: &Path) -> Result<String, ConfigError>;
}

/// 调用 `sops` 命令行解密
#[derive(Debug, Clone)]
pub struct SopsCli {
    binary: String,
}

impl SopsCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for SopsCli {
    fn default() -> Self {
        Self::new("sops")
    }
}

impl SecretsDecryptor for SopsCli {
    fn decrypt(&self, path: &Path) -> Result<String, ConfigError> {
        let output = Command::new(&self.binary)
            .arg("--decrypt")
            .arg("--output-type")
            .arg("yaml")
            .arg(path)
            .output()
            .map_err(|e| ConfigError::Decrypt {
                path: path.display().to_string(),
                message: format!("failed to run {}: {}", self.binary, e),
            })?;

        if !output.status.success() {
            return Err(ConfigError::Decrypt {
                path: path.display().to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        String::from_utf8(output.stdout).map_err(|e| ConfigError::Decrypt {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }
}
