//! 服务入口：`gserver <service> --commonConfigPath .. --configPath .. --secretsPath ..`

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let registry = campus_gserver::registry();
    let matches = registry.server_command().get_matches();
    registry.dispatch_server(&matches).await?;
    Ok(())
}
