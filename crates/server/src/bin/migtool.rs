/// Easy VM Cloud - 数据迁移工具
///
/// 将旧版 mactl / mactl2 记录就地改写为当前的记录格式

use clap::Parser;
use server::{
    config::{Config, StoreBackend},
    db::establish_connection,
    migration::run_migration,
};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "migtool")]
#[command(about = "迁移旧版宿主机与虚拟机记录")]
struct Args {
    /// 只打印迁移计划，不写回存储
    #[arg(long)]
    dry_run: bool,

    /// 存储后端 (memory / redis)
    #[arg(long, env = "STORE_BACKEND", default_value = "redis")]
    backend: StoreBackend,

    /// Redis 连接地址
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut cfg = Config::from_env()?;
    cfg.store_backend = args.backend;
    cfg.redis_url = args.redis_url.or(cfg.redis_url);

    if cfg.store_backend == StoreBackend::Memory {
        warn!("内存存储中没有旧版记录，迁移不会产生任何变化");
    }

    let store = establish_connection(&cfg).await?;
    info!("开始迁移 (dry_run = {})", args.dry_run);

    let report = run_migration(store.as_ref(), args.dry_run).await?;
    info!(
        "扫描 {} 条, 迁移 {} 条, 新建卷 {} 个, 失败 {} 条",
        report.scanned,
        report.migrated.len(),
        report.volumes_created.len(),
        report.failed.len()
    );
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.failed.is_empty() {
        anyhow::bail!("{} 条记录迁移失败", report.failed.len());
    }
    Ok(())
}
