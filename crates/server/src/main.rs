/// Easy VM Cloud - Server
///
/// 后端服务器主程序，提供 REST API 服务

use axum::{extract::State, routing::get, Router};
use server::{
    api,
    app_state::AppState,
    bootstrap,
    config::{self, BootstrapInventory},
    db::establish_connection,
    metrics::Metrics,
};
use std::net::SocketAddr;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载环境变量
    dotenvy::dotenv().ok();

    // 初始化日志
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    tracing_subscriber::EnvFilter::new(
                        std::env::var("LOG_LEVEL").unwrap_or_else(|_| "debug".to_string()),
                    )
                }),
        )
        .init();

    info!("🚀 启动 Easy VM Cloud Server...");

    // 加载配置
    let cfg = config::Config::from_env()?;
    info!("✅ 配置加载成功");

    // 建立存储连接
    let store = establish_connection(&cfg).await?;
    info!("✅ 存储连接成功: {:?}", cfg.store_backend);

    let metrics = Metrics::new()?;
    let app_state = AppState::new(store, cfg.core.clone(), metrics);

    // 导入启动清单
    if let Some(path) = cfg.bootstrap_file.as_deref() {
        let inventory = BootstrapInventory::load(path)?;
        bootstrap::apply_inventory(&app_state, inventory).await?;
        info!("✅ 启动清单导入完成: {}", path);
    }

    // 设置CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // 构建应用路由
    let app = Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .nest("/api", api::api_routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    // 启动服务器
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.server_port));
    info!("🎯 服务器监听在 http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn root_handler() -> &'static str {
    "Easy VM Cloud Server API v1"
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics().render()
}
