//! ScanAhead服务器主程序

use anyhow::Context;
use clap::Parser;
use scanahead_admin::{init_logging, AppConfig, Metrics};
use scanahead_database::{CaseRecords, DatabasePool, MemoryCaseRecords, PgCaseRecords};
use scanahead_integration::{
    HttpSummaryClient, HttpTranscriptionClient, KiriClient, ProxyArchiveFetcher,
    ReconstructionService, SummaryService, TranscriptionService,
};
use scanahead_storage::StorageManager;
use scanahead_web::{AppState, ProxyState, WebServer};
use scanahead_workflow::{DraftValidator, EnrichmentPipeline, ModelResolver, SubmissionPipeline};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// ScanAhead服务器命令行参数
#[derive(Parser, Debug)]
#[command(name = "scanahead-server")]
#[command(about = "患者病例采集与三维重建服务")]
struct Args {
    /// 配置文件路径
    #[arg(short, long)]
    config: Option<String>,

    /// 服务器端口，覆盖配置文件
    #[arg(short, long)]
    port: Option<u16>,

    /// 日志级别，覆盖配置文件
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    // 初始化日志
    init_logging(&config.logging)?;

    info!("启动ScanAhead服务器...");
    info!("  监听地址: {}", config.server.bind_address());
    info!("  转写服务: {}", configured(config.transcription.is_configured()));
    info!("  摘要服务: {}", configured(config.summary.is_configured()));
    info!("  三维重建: {}", configured(config.reconstruction.is_configured()));

    let storage = Arc::new(
        StorageManager::new(config.storage.clone())
            .await
            .context("Failed to initialize object storage")?,
    );

    let records: Arc<dyn CaseRecords> = match &config.database {
        Some(database) => {
            let pool = DatabasePool::new(database)
                .await
                .context("Failed to connect to database")?;
            let records = PgCaseRecords::new(pool);
            if database.auto_migrate {
                records.migrate().await?;
            }
            Arc::new(records)
        }
        None => {
            warn!("No database configured, case records are kept in memory only");
            Arc::new(MemoryCaseRecords::new())
        }
    };

    let transcriber = HttpTranscriptionClient::from_config(&config.transcription)?
        .map(|client| Arc::new(client) as Arc<dyn TranscriptionService>);
    let summarizer = HttpSummaryClient::from_config(&config.summary)?
        .map(|client| Arc::new(client) as Arc<dyn SummaryService>);
    let reconstruction: Option<Arc<dyn ReconstructionService>> =
        if config.reconstruction.is_configured() {
            Some(Arc::new(KiriClient::new(config.reconstruction.clone())?))
        } else {
            None
        };

    let fetcher = Arc::new(ProxyArchiveFetcher::new(
        config.proxy.download_endpoint(&config.server),
        Duration::from_secs(config.proxy.timeout_secs),
    )?);

    let submissions = SubmissionPipeline::new(
        DraftValidator::new(config.validation.clone())?,
        storage.clone(),
        records.clone(),
        EnrichmentPipeline::new(transcriber, summarizer),
        reconstruction.clone(),
        config.reconstruction.options.clone(),
    );
    let resolver = ModelResolver::new(records.clone(), storage, reconstruction, fetcher);

    let state = AppState {
        submissions: Arc::new(submissions),
        resolver: Arc::new(resolver),
        records,
        proxy: Arc::new(ProxyState::new(config.proxy.clone())?),
        metrics: Metrics::new()?,
    };

    let addr: SocketAddr = config
        .server
        .bind_address()
        .parse()
        .context("Invalid server address")?;
    let server = WebServer::new(addr, state, &config.server.cors_origins);

    // 启动服务器
    if let Err(e) = server.run().await {
        error!("服务器启动失败: {}", e);
        return Err(e);
    }

    Ok(())
}

fn configured(enabled: bool) -> &'static str {
    if enabled {
        "已配置"
    } else {
        "未配置"
    }
}
