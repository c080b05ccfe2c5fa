//! 서버 배선
//!
//! 커넥터 → 캐시 피드 → 배포 허브, 그리고 정산 엔진을 명시적 채널로
//! 엮어서 기동합니다.

use std::sync::Arc;

use log::info;
use tokio::sync::{broadcast, mpsc, Mutex};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::create_api_router;
use crate::cache::feed::CacheFeed;
use crate::cache::{self, SharedCaches};
use crate::config::Config;
use crate::db;
use crate::db::models::MarketRegistry;
use crate::events::{ledger_event_channel, stream_control_channel, EventChannels};
use crate::external::connector::OkxConnector;
use crate::external::market_stream;
use crate::external::session::SnSessionResolver;
use crate::hub::{run_broadcaster, SharedHub, SubscriptionHub};
use crate::settlement::{SettlementConfig, SettlementEngine};

/// 서버 상태
#[derive(Clone)]
pub struct ServerState {
    pub hub: SharedHub,
    pub caches: SharedCaches,
    pub resolver: Arc<SnSessionResolver>,
    pub markets: MarketRegistry,
}

/// 서버 시작
pub async fn start_server(config: Config) -> anyhow::Result<()> {
    info!("xBridge 서버 시작 중...");

    // DB + 종목 레지스트리
    let pool = db::init_database(&config.database_url).await?;
    let markets = db::load_market_registry(&pool).await?;

    // 캐시와 이벤트 배선
    let caches = cache::shared(markets.clone());
    let events = EventChannels::new(1024);
    let (control_tx, control_rx) = stream_control_channel();
    let (feed_tx, feed_rx) = mpsc::unbounded_channel();
    let (ledger_tx, ledger_rx) = ledger_event_channel();
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // 캐시 피드 태스크 (캐시 쓰기는 여기 하나로 직렬화)
    let feed = CacheFeed::new(caches.clone(), events.clone(), pool.clone());
    tokio::spawn(feed.run(feed_rx, ledger_rx));

    // 구독 허브 + 브로드캐스터
    let hub: SharedHub = Arc::new(Mutex::new(SubscriptionHub::new(control_tx)));
    tokio::spawn(run_broadcaster(hub.clone(), caches.clone(), events.clone()));

    // 외부 시장 데이터 스트림
    tokio::spawn(market_stream::run_market_stream(
        config.exchange_ws_url.clone(),
        control_rx,
        feed_tx,
    ));

    // 정산 엔진
    let connector = OkxConnector::new(&config.exchange_code, &config.exchange_rest_url);
    let settlement_config = SettlementConfig {
        exchange_code: config.exchange_code.clone(),
        broker_id: config.broker_id.clone(),
        interval_secs: config.sync_interval_secs,
        ..SettlementConfig::default()
    };
    let engine =
        SettlementEngine::new(pool.clone(), connector, markets.clone(), settlement_config, ledger_tx);
    tokio::spawn(engine.run(shutdown_tx.subscribe()));

    // 종료 신호 중계 (진행 중인 정산 행은 끝까지 커밋/롤백)
    let shutdown_relay = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("종료 신호 수신");
            let _ = shutdown_relay.send(());
        }
    });

    // WebSocket 라우터
    let state = ServerState {
        hub,
        caches,
        resolver: Arc::new(SnSessionResolver::new(pool.clone())),
        markets,
    };
    let api_router = create_api_router()
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.listen_port)).await?;

    info!("서버가 성공적으로 시작되었습니다!");
    info!("WebSocket: ws://localhost:{}/ws", config.listen_port);

    axum::serve(listener, api_router).await?;

    Ok(())
}
