//! `Secret<String>` 的序列化辅助
//!
//! 段提取需要把配置序列化为中间值，凭据字段在这里显式展开。

use secrecy::{ExposeSecret, Secret};
use serde::Serializer;

pub fn expose<S: Serializer>(secret: &Secret<String>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

pub fn empty() -> Secret<String> {
    Secret::new(String::new())
}
