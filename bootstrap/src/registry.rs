//! 服务注册表与服务间地址解析
//!
//! 所有已知服务的 gRPC / HTTP 监听端口，以及各服务已迁移到共享
//! backend 命名空间的环境列表。修改端口或迁移标记会影响所有调用方。

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use campus_config::CommonConfig;
use campus_errors::{AppError, AppResult};

/// 服务间调用协议
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Grpc,
    Http,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Grpc => f.write_str("GRPC"),
            Protocol::Http => f.write_str("HTTP"),
        }
    }
}

/// 单个服务的监听配置
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenerConfig {
    /// 形如 `:5050`
    pub grpc: Option<String>,
    pub http: Option<String>,
    pub migrated_environments: Vec<String>,
}

impl ListenerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grpc(mut self, port: impl Into<String>) -> Self {
        self.grpc = Some(port.into());
        self
    }

    pub fn http(mut self, port: impl Into<String>) -> Self {
        self.http = Some(port.into());
        self
    }

    pub fn migrated(mut self, environments: &[&str]) -> Self {
        self.migrated_environments = environments.iter().map(|e| e.to_string()).collect();
        self
    }

    pub fn port(&self, protocol: Protocol) -> Option<&str> {
        match protocol {
            Protocol::Grpc => self.grpc.as_deref(),
            Protocol::Http => self.http.as_deref(),
        }
    }

    pub fn is_migrated(&self, environment: &str) -> bool {
        self.migrated_environments.iter().any(|e| e == environment)
    }
}

/// 服务注册表
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    services: HashMap<String, ListenerConfig>,
}

static BUILTIN: LazyLock<ServiceRegistry> = LazyLock::new(|| {
    let all = &["local", "stag", "uat", "prod"];
    let pre_prod = &["local", "stag", "uat"];

    ServiceRegistry::new()
        .with("auth", ListenerConfig::new().grpc(":5950").http(":5980").migrated(all))
        .with("bob", ListenerConfig::new().grpc(":5050").http(":5080"))
        .with("calendar", ListenerConfig::new().grpc(":7050").http(":7080").migrated(pre_prod))
        .with("conversationmgmt", ListenerConfig::new().grpc(":7150").http(":7180").migrated(all))
        .with("discount", ListenerConfig::new().grpc(":6850").http(":6880"))
        .with("draft", ListenerConfig::new().grpc(":6050").http(":6080"))
        .with("enigma", ListenerConfig::new().http(":5380"))
        .with("entryexitmgmt", ListenerConfig::new().grpc(":6750").http(":6780"))
        .with("eureka", ListenerConfig::new().grpc(":5550").http(":5580"))
        .with("fatima", ListenerConfig::new().grpc(":5450").http(":5480"))
        .with("heartbeat", ListenerConfig::new().grpc(":7650").http(":7680").migrated(all))
        .with("hephaestus", ListenerConfig::new().http(":7280"))
        .with("invoicemgmt", ListenerConfig::new().grpc(":6650").http(":6680"))
        .with("jerry", ListenerConfig::new().http(":7380").migrated(all))
        .with("lessonmgmt", ListenerConfig::new().grpc(":6550").http(":6580").migrated(pre_prod))
        .with("mastermgmt", ListenerConfig::new().grpc(":6450").http(":6480"))
        .with("notificationmgmt", ListenerConfig::new().grpc(":6950").http(":6980"))
        .with("payment", ListenerConfig::new().grpc(":6250").http(":6280"))
        .with("shamir", ListenerConfig::new().grpc(":5650").http(":5680"))
        .with("spike", ListenerConfig::new().grpc(":7450").http(":7480").migrated(all))
        .with("timesheet", ListenerConfig::new().grpc(":6350").http(":6380"))
        .with("tom", ListenerConfig::new().grpc(":5150").http(":5180"))
        .with("usermgmt", ListenerConfig::new().grpc(":6150").http(":6180"))
        .with("virtualclassroom", ListenerConfig::new().grpc(":7550").http(":7580").migrated(pre_prod))
        .with("yasuo", ListenerConfig::new().grpc(":5250").http(":5280"))
        .with("zeus", ListenerConfig::new().grpc(":5750").http(":5780"))
});

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 编译期内置的服务表
    pub fn builtin() -> Self {
        BUILTIN.clone()
    }

    pub fn with(mut self, name: impl Into<String>, listener: ListenerConfig) -> Self {
        self.services.insert(name.into(), listener);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ListenerConfig> {
        self.services.get(name)
    }

    /// 服务的端口，服务未注册或未暴露该协议时返回错误
    pub fn port(&self, name: &str, protocol: Protocol) -> AppResult<&str> {
        self.get(name)
            .ok_or_else(|| AppError::not_found(format!("service {} is not registered", name)))?
            .port(protocol)
            .ok_or_else(|| {
                AppError::not_found(format!("service {} does not expose {}", name, protocol))
            })
    }
}

/// 本地集群中已迁移服务所在的命名空间
const LOCAL_MIGRATED_NAMESPACE: &str = "local-manabie-backend";
/// 本地集群中未迁移服务所在的命名空间
const LOCAL_NAMESPACE: &str = "backend";

/// 解析调用方访问 `callee` 的地址
///
/// 调用方与被调用方迁移状态一致时使用同命名空间内的短地址，
/// 否则（或 `force`）使用集群内完整域名。自调用始终使用短地址。
pub fn resolve_address(
    registry: &ServiceRegistry,
    caller: &CommonConfig,
    callee: &str,
    protocol: Protocol,
    force: bool,
) -> AppResult<String> {
    let caller_listener = registry
        .get(&caller.name)
        .ok_or_else(|| AppError::not_found(format!("service {} is not registered", caller.name)))?;
    let callee_listener = registry
        .get(callee)
        .ok_or_else(|| AppError::not_found(format!("service {} is not registered", callee)))?;
    let port = callee_listener.port(protocol).ok_or_else(|| {
        AppError::not_found(format!("service {} does not expose {}", callee, protocol))
    })?;

    if caller.name == callee {
        return Ok(format!("{}{}", callee, port));
    }

    let caller_migrated = caller_listener.is_migrated(&caller.environment);
    let callee_migrated = callee_listener.is_migrated(&caller.environment);
    if !force && caller_migrated == callee_migrated {
        return Ok(format!("{}{}", callee, port));
    }

    let namespace = if caller.is_local() {
        if callee_migrated {
            LOCAL_MIGRATED_NAMESPACE.to_string()
        } else {
            LOCAL_NAMESPACE.to_string()
        }
    } else {
        let suffix = if callee_migrated { "backend" } else { "services" };
        format!("{}-{}-{}", caller.actual_env(), caller.organization, suffix)
    };

    Ok(format!("{}.{}.svc.cluster.local{}", callee, namespace, port))
}
