//! 命令注册
//!
//! 每个服务注册为 `gserver <service>` 子命令，每个任务注册为
//! `gjob <job>` 子命令。所有子命令都要求三个配置文件路径。

use std::collections::HashMap;
use std::ffi::OsString;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use campus_config::ConfigPaths;
use campus_errors::{AppError, AppResult};
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::bootstrapper::{BootstrapOptions, Bootstrapper, JobFn, job_fn};
use crate::resources::Resources;
use crate::servicer::{ServiceConfig, ServiceDescriptor};

pub const COMMON_CONFIG_PATH_FLAG: &str = "commonConfigPath";
pub const CONFIG_PATH_FLAG: &str = "configPath";
pub const SECRETS_PATH_FLAG: &str = "secretsPath";

/// 任务参数值
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlagValue {
    String(String),
    Bool(bool),
    Int(i64),
    Bytes(Vec<u8>),
}

/// 解析后的任务参数
#[derive(Debug, Clone, Default)]
pub struct JobArgs {
    values: HashMap<String, FlagValue>,
}

impl JobArgs {
    pub fn with_string(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), FlagValue::String(value.into()));
        self
    }

    pub fn with_bool(mut self, name: impl Into<String>, value: bool) -> Self {
        self.values.insert(name.into(), FlagValue::Bool(value));
        self
    }

    pub fn with_int(mut self, name: impl Into<String>, value: i64) -> Self {
        self.values.insert(name.into(), FlagValue::Int(value));
        self
    }

    pub fn with_bytes(mut self, name: impl Into<String>, value: Vec<u8>) -> Self {
        self.values.insert(name.into(), FlagValue::Bytes(value));
        self
    }

    pub fn get(&self, name: &str) -> Option<&FlagValue> {
        self.values.get(name)
    }

    pub fn string(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(FlagValue::String(v)) => Some(v),
            _ => None,
        }
    }

    /// 未声明的布尔参数视为 false
    pub fn bool(&self, name: &str) -> bool {
        matches!(self.values.get(name), Some(FlagValue::Bool(true)))
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        match self.values.get(name) {
            Some(FlagValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn bytes(&self, name: &str) -> Option<&[u8]> {
        match self.values.get(name) {
            Some(FlagValue::Bytes(v)) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlagKind {
    String,
    Bool,
    Int,
    BytesBase64,
}

#[derive(Debug, Clone)]
struct FlagSpec {
    name: String,
    kind: FlagKind,
    default: String,
    help: String,
}

/// 任务声明的额外命令行参数
#[derive(Debug, Clone, Default)]
pub struct JobFlags {
    flags: Vec<FlagSpec>,
}

impl JobFlags {
    pub fn new() -> Self {
        Self::default()
    }

    fn declare(mut self, name: &str, kind: FlagKind, default: String, help: &str) -> Self {
        self.flags.push(FlagSpec {
            name: name.to_string(),
            kind,
            default,
            help: help.to_string(),
        });
        self
    }

    pub fn string_var(self, name: &str, default: &str, help: &str) -> Self {
        self.declare(name, FlagKind::String, default.to_string(), help)
    }

    pub fn bool_var(self, name: &str, default: bool, help: &str) -> Self {
        self.declare(name, FlagKind::Bool, default.to_string(), help)
    }

    pub fn int_var(self, name: &str, default: i64, help: &str) -> Self {
        self.declare(name, FlagKind::Int, default.to_string(), help)
    }

    /// base64 编码的字节参数
    pub fn bytes_base64_var(self, name: &str, default: &[u8], help: &str) -> Self {
        self.declare(name, FlagKind::BytesBase64, STANDARD.encode(default), help)
    }

    fn apply(&self, mut command: Command) -> Command {
        for flag in &self.flags {
            let arg = Arg::new(flag.name.clone())
                .long(flag.name.clone())
                .help(flag.help.clone())
                .default_value(flag.default.clone());
            let arg = match flag.kind {
                FlagKind::String | FlagKind::BytesBase64 => arg.action(ArgAction::Set),
                FlagKind::Bool => arg
                    .action(ArgAction::Set)
                    .num_args(0..=1)
                    .require_equals(true)
                    .default_missing_value("true")
                    .value_parser(value_parser!(bool)),
                FlagKind::Int => arg.action(ArgAction::Set).value_parser(value_parser!(i64)),
            };
            command = command.arg(arg);
        }
        command
    }

    fn parse(&self, matches: &ArgMatches) -> AppResult<JobArgs> {
        let mut args = JobArgs::default();
        for flag in &self.flags {
            let name = flag.name.as_str();
            let missing = || AppError::validation(format!("missing value for --{}", name));
            let value = match flag.kind {
                FlagKind::String => {
                    FlagValue::String(matches.get_one::<String>(name).ok_or_else(missing)?.clone())
                }
                FlagKind::Bool => FlagValue::Bool(*matches.get_one::<bool>(name).ok_or_else(missing)?),
                FlagKind::Int => FlagValue::Int(*matches.get_one::<i64>(name).ok_or_else(missing)?),
                FlagKind::BytesBase64 => {
                    let encoded = matches.get_one::<String>(name).ok_or_else(missing)?;
                    let decoded = STANDARD.decode(encoded).map_err(|e| {
                        AppError::validation(format!("--{} is not valid base64: {}", name, e))
                    })?;
                    FlagValue::Bytes(decoded)
                }
            };
            args.values.insert(flag.name.clone(), value);
        }
        Ok(args)
    }
}

fn existing_file(value: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(value);
    if path.is_file() {
        Ok(path)
    } else {
        Err(format!("file does not exist: {}", value))
    }
}

fn with_config_paths(command: Command) -> Command {
    [
        (COMMON_CONFIG_PATH_FLAG, "path to the common config file"),
        (CONFIG_PATH_FLAG, "path to the service config file"),
        (SECRETS_PATH_FLAG, "path to the secrets file"),
    ]
    .into_iter()
    .fold(command, |command, (name, help)| {
        command.arg(
            Arg::new(name)
                .long(name)
                .help(help)
                .required(true)
                .value_parser(existing_file),
        )
    })
}

fn config_paths(matches: &ArgMatches) -> AppResult<ConfigPaths> {
    let path = |name: &str| {
        matches
            .get_one::<PathBuf>(name)
            .cloned()
            .ok_or_else(|| AppError::validation(format!("missing --{}", name)))
    };
    Ok(ConfigPaths::new(
        path(COMMON_CONFIG_PATH_FLAG)?,
        path(CONFIG_PATH_FLAG)?,
        path(SECRETS_PATH_FLAG)?,
    ))
}

#[async_trait]
trait Runnable: Send + Sync {
    fn name(&self) -> &str;
    fn command(&self) -> Command;
    async fn run(&self, matches: &ArgMatches) -> AppResult<()>;
}

struct ServiceCommand<C: ServiceConfig> {
    descriptor: ServiceDescriptor<C>,
    options: BootstrapOptions,
}

#[async_trait]
impl<C: ServiceConfig> Runnable for ServiceCommand<C> {
    fn name(&self) -> &str {
        self.descriptor.name()
    }

    fn command(&self) -> Command {
        with_config_paths(
            Command::new(self.descriptor.name().to_string())
                .about(format!("run the {} service", self.descriptor.name())),
        )
    }

    async fn run(&self, matches: &ArgMatches) -> AppResult<()> {
        let paths = config_paths(matches)?;
        Bootstrapper::<C>::new(self.options.clone())
            .run(&self.descriptor, &paths)
            .await
    }
}

struct JobCommand<C> {
    name: String,
    job: JobFn<C>,
    flags: JobFlags,
    options: BootstrapOptions,
}

#[async_trait]
impl<C: ServiceConfig> Runnable for JobCommand<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn command(&self) -> Command {
        let command = Command::new(self.name.clone()).about(format!("run the {} job", self.name));
        self.flags.apply(with_config_paths(command))
    }

    async fn run(&self, matches: &ArgMatches) -> AppResult<()> {
        let paths = config_paths(matches)?;
        let args = self.flags.parse(matches)?;
        Bootstrapper::<C>::new(self.options.clone())
            .run_job(&self.name, &self.job, &paths, args)
            .await
    }
}

/// 服务与任务注册表
#[derive(Default)]
pub struct CommandRegistry {
    options: BootstrapOptions,
    services: Vec<Box<dyn Runnable>>,
    jobs: Vec<Box<dyn Runnable>>,
}

fn insert(entries: &mut Vec<Box<dyn Runnable>>, kind: &str, entry: Box<dyn Runnable>) {
    if let Some(existing) = entries.iter_mut().find(|e| e.name() == entry.name()) {
        warn!(name = %entry.name(), kind, "Replacing registered command");
        *existing = entry;
    } else {
        entries.push(entry);
    }
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: BootstrapOptions) -> Self {
        Self {
            options,
            ..Default::default()
        }
    }

    pub fn register_service<C: ServiceConfig>(&mut self, descriptor: ServiceDescriptor<C>) -> &mut Self {
        let command = ServiceCommand {
            descriptor,
            options: self.options.clone(),
        };
        insert(&mut self.services, "service", Box::new(command));
        self
    }

    pub fn register_job<C, F, Fut>(&mut self, name: &str, job: F) -> &mut Self
    where
        C: ServiceConfig,
        F: Fn(CancellationToken, C, Arc<Resources>, JobArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<()>> + Send + 'static,
    {
        self.register_job_with_flags(name, JobFlags::default(), job)
    }

    pub fn register_job_with_flags<C, F, Fut>(&mut self, name: &str, flags: JobFlags, job: F) -> &mut Self
    where
        C: ServiceConfig,
        F: Fn(CancellationToken, C, Arc<Resources>, JobArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<()>> + Send + 'static,
    {
        let command = JobCommand {
            name: name.to_string(),
            job: job_fn(job),
            flags,
            options: self.options.clone(),
        };
        insert(&mut self.jobs, "job", Box::new(command));
        self
    }

    pub fn server_command(&self) -> Command {
        Command::new("gserver")
            .about("run a registered service")
            .subcommand_required(true)
            .arg_required_else_help(true)
            .subcommands(self.services.iter().map(|s| s.command()))
    }

    pub fn job_command(&self) -> Command {
        Command::new("gjob")
            .about("run a registered job")
            .subcommand_required(true)
            .arg_required_else_help(true)
            .subcommands(self.jobs.iter().map(|j| j.command()))
    }

    pub async fn dispatch_server(&self, matches: &ArgMatches) -> AppResult<()> {
        dispatch(&self.services, matches).await
    }

    pub async fn dispatch_job(&self, matches: &ArgMatches) -> AppResult<()> {
        dispatch(&self.jobs, matches).await
    }

    /// 解析参数并运行服务，参数错误返回 `AppError::Validation`
    pub async fn run_server_from<I, T>(&self, args: I) -> AppResult<()>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = self
            .server_command()
            .try_get_matches_from(args)
            .map_err(|e| AppError::validation(e.to_string()))?;
        self.dispatch_server(&matches).await
    }

    /// 解析参数并运行任务，参数错误返回 `AppError::Validation`
    pub async fn run_job_from<I, T>(&self, args: I) -> AppResult<()>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = self
            .job_command()
            .try_get_matches_from(args)
            .map_err(|e| AppError::validation(e.to_string()))?;
        self.dispatch_job(&matches).await
    }
}

async fn dispatch(entries: &[Box<dyn Runnable>], matches: &ArgMatches) -> AppResult<()> {
    let (name, sub_matches) = matches
        .subcommand()
        .ok_or_else(|| AppError::validation("no subcommand given"))?;
    let entry = entries
        .iter()
        .find(|e| e.name() == name)
        .ok_or_else(|| AppError::not_found(format!("command {} is not registered", name)))?;
    entry.run(sub_matches).await
}
