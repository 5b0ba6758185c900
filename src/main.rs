use billing_reconciler::config::StorageBackend;
use billing_reconciler::db::{run_migrations, BillingStore};
use billing_reconciler::service::scheduler;
use billing_reconciler::{api, create_pool, AppConfig, BillingService, InMemoryStore, PgBillingStore};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::fmt::time::ChronoLocal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载配置
    let config = AppConfig::load()?;

    // 初始化日志 - 使用本地时间格式
    let level = tracing::Level::from_str(&config.log.level).unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_max_level(level)
        .with_target(true)
        .with_level(true)
        .init();

    info!("Starting server with config: {:?}", config);

    // 选择存储后端
    let store: Arc<dyn BillingStore> = match config.storage {
        StorageBackend::Postgres => {
            let pool = create_pool(&config.database).await?;
            info!("Database pool created");
            run_migrations(&pool).await?;
            info!("Migrations applied");
            Arc::new(PgBillingStore::new(pool, config.database.statement_timeout_ms))
        }
        StorageBackend::Memory => {
            info!("Using in-memory store, data is lost on exit");
            Arc::new(InMemoryStore::new())
        }
    };

    let service = BillingService::new(store, &config.billing);

    if config.scheduler.enabled {
        scheduler::spawn(service.clone(), config.scheduler.clone());
    }

    let app = api::router(service);

    // 启动服务器
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server listening on {}", addr);
    info!("API Endpoints:");
    info!("  POST /api/payments                   - record payment (FIFO allocation)");
    info!("  POST /api/invoices/generate          - generate invoice");
    info!("  POST /api/invoices/:id/void          - void unpaid invoice");
    info!("  POST /api/invoices/:id/correct       - void and regenerate");
    info!("  POST /api/invoices/overdue-sweep     - mark overdue invoices");
    info!("  POST /api/invoices/monthly-run       - generate invoices for all clients");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
