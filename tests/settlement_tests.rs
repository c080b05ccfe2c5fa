//! 정산 엔진 통합 테스트
//!
//! 실제 SQLite 파일 DB 위에서 수집 → 스테이징 → 행 처리 → GC 전체
//! 파이프라인을 검증합니다.

use std::sync::Mutex;

use chrono::Utc;
use sqlx::sqlite::SqlitePool;

use xbridge::db::models::{MarketRecord, MemberRecord, OrderRecord, OuterTradeRecord, OuterTradeStatus};
use xbridge::db::repository::{
    AccountRepository, MarketRepository, MemberRepository, OrderRepository, OuterTradeFeeRepository,
    OuterTradeRepository, TradeRepository,
};
use xbridge::db::{init_database, load_market_registry};
use xbridge::events::ledger_event_channel;
use xbridge::external::connector::{
    Connector, ConnectorError, ExternalOrderState, Fill, OrderAck, OrderSpec,
};
use xbridge::settlement::{SettlementConfig, SettlementEngine};

const BROKER: &str = "e847386590ce4dBC";
const MS_PER_DAY: i64 = 86_400_000;

/// 테스트용 스텁 커넥터
struct StubConnector {
    fills: Mutex<Vec<Fill>>,
    order_state: ExternalOrderState,
}

impl StubConnector {
    fn new(fills: Vec<Fill>) -> Self {
        Self { fills: Mutex::new(fills), order_state: ExternalOrderState::Live }
    }
}

impl Connector for StubConnector {
    fn exchange_code(&self) -> &str {
        "okx"
    }

    async fn fetch_fills_since(&self, _begin_ms: i64) -> Result<Vec<Fill>, ConnectorError> {
        Ok(self.fills.lock().unwrap().clone())
    }

    async fn fetch_order_state(
        &self,
        _inst_id: &str,
        _ord_id: &str,
    ) -> Result<ExternalOrderState, ConnectorError> {
        Ok(self.order_state)
    }

    async fn place_order(&self, _spec: &OrderSpec) -> Result<OrderAck, ConnectorError> {
        Err(ConnectorError::Decode("테스트에서 사용하지 않음".to_string()))
    }

    async fn cancel_order(&self, _inst_id: &str, _ord_id: &str) -> Result<OrderAck, ConnectorError> {
        Err(ConnectorError::Decode("테스트에서 사용하지 않음".to_string()))
    }
}

async fn setup(name: &str) -> SqlitePool {
    let path = std::env::temp_dir().join(format!("xbridge_test_{}_{}.db", name, std::process::id()));
    let _ = std::fs::remove_file(&path);
    let url = format!("sqlite://{}?mode=rwc", path.display());
    init_database(&url).await.expect("DB 초기화 실패")
}

async fn seed_market(pool: &SqlitePool) {
    MarketRepository::insert(
        pool,
        &MarketRecord {
            id: 1,
            symbol: "BTC-USDT".to_string(),
            base_unit: "btc".to_string(),
            quote_unit: "usdt".to_string(),
            lot_size: "0.0001".to_string(),
            tick_size: "0.1".to_string(),
            price_scale: 2,
            ask_fee_rate: "0.002".to_string(),
            bid_fee_rate: "0.002".to_string(),
            vip_fee_rate: "0.001".to_string(),
            hero_fee_rate: "0".to_string(),
        },
    )
    .await
    .unwrap();
}

async fn seed_member(pool: &SqlitePool, id: i64, tier: &str) {
    MemberRepository::insert(
        pool,
        &MemberRecord {
            id,
            sn: format!("SN{}", id),
            tier: tier.to_string(),
            email: format!("m{}@example.com", id),
        },
    )
    .await
    .unwrap();
}

#[allow(clippy::too_many_arguments)]
async fn seed_order(
    pool: &SqlitePool,
    id: i64,
    member_id: i64,
    side: &str,
    price: Option<&str>,
    volume: &str,
    locked: &str,
    ord_type: &str,
) {
    let now = Utc::now().timestamp_millis();
    OrderRepository::insert(
        pool,
        &OrderRecord {
            id,
            member_id,
            market: "BTC-USDT".to_string(),
            side: side.to_string(),
            price: price.map(String::from),
            volume: volume.to_string(),
            origin_volume: volume.to_string(),
            locked: locked.to_string(),
            origin_locked: locked.to_string(),
            funds_received: "0".to_string(),
            trades_count: 0,
            state: "wait".to_string(),
            ord_type: ord_type.to_string(),
            created_at: now,
            updated_at: now,
        },
    )
    .await
    .unwrap();
}

fn fill(trade_id: &str, cl_ord_id: &str, side: &str, px: &str, sz: &str) -> Fill {
    Fill {
        trade_id: trade_id.to_string(),
        inst_id: "BTC-USDT".to_string(),
        ord_id: "ext-1".to_string(),
        cl_ord_id: cl_ord_id.to_string(),
        side: side.to_string(),
        fill_px: px.to_string(),
        fill_sz: sz.to_string(),
        fee: "-0.4".to_string(),
        fee_ccy: "USDT".to_string(),
        ts: Utc::now().timestamp_millis(),
    }
}

async fn engine_with(
    pool: &SqlitePool,
    fills: Vec<Fill>,
) -> (SettlementEngine<StubConnector>, tokio::sync::mpsc::UnboundedReceiver<xbridge::events::LedgerEvent>)
{
    let markets = load_market_registry(pool).await.unwrap();
    let (ledger_tx, ledger_rx) = ledger_event_channel();
    let config = SettlementConfig {
        broker_id: BROKER.to_string(),
        ..SettlementConfig::default()
    };
    let engine =
        SettlementEngine::new(pool.clone(), StubConnector::new(fills), markets, config, ledger_tx);
    (engine, ledger_rx)
}

async fn account(pool: &SqlitePool, member_id: i64, currency: &str) -> (String, String, i64) {
    let record = AccountRepository::find(pool, member_id, currency).await.unwrap().unwrap();
    (record.balance, record.locked, record.id)
}

/// 시나리오: 매도 체결이 주문/체결/바우처/잔고를 한 트랜잭션으로 갱신
#[tokio::test]
async fn test_ask_fill_settles_ledger() {
    let pool = setup("ask_fill").await;
    seed_market(&pool).await;
    seed_member(&pool, 501, "default").await;
    seed_order(&pool, 77, 501, "ask", Some("20000"), "0.02", "0.02", "limit").await;
    AccountRepository::insert(&pool, 501, "btc", "0", "0.02").await.unwrap();
    AccountRepository::insert(&pool, 501, "usdt", "1000", "0").await.unwrap();

    let fill_row = fill("998877", &format!("{}m501o77", BROKER), "sell", "20000", "0.01");
    let (engine, mut ledger_rx) = engine_with(&pool, vec![fill_row]).await;

    let stats = engine.sync_cycle().await.unwrap();
    assert_eq!(stats.staged, 1);
    assert_eq!(stats.applied, 1);
    assert_eq!(stats.failed, 0);

    // 주문: 잔여 수량 감소, 미체결 유지 (외부 상태 live)
    let order = OrderRepository::find_by_id(&pool, 77).await.unwrap().unwrap();
    assert_eq!(order.volume, "0.01");
    assert_eq!(order.locked, "0.01");
    assert_eq!(order.state, "wait");
    assert_eq!(order.trades_count, 1);
    // 수취액 = 200 - 수수료 0.4
    assert_eq!(order.funds_received, "199.6");

    // 체결 1건 + 바우처 trend=ask
    assert_eq!(TradeRepository::count_by_fk(&pool, "998877").await.unwrap(), 1);
    let (trend, ask_fee): (String, String) =
        sqlx::query_as("SELECT trend, ask_fee FROM vouchers WHERE order_id = 77")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(trend, "ask");
    assert_eq!(ask_fee, "0.4");

    // 잔고: BTC 잠금 0.01 차감, USDT 잔고 +199.6
    let (btc_balance, btc_locked, _) = account(&pool, 501, "btc").await;
    assert_eq!((btc_balance.as_str(), btc_locked.as_str()), ("0", "0.01"));
    let (usdt_balance, usdt_locked, _) = account(&pool, 501, "usdt").await;
    assert_eq!((usdt_balance.as_str(), usdt_locked.as_str()), ("1199.6", "0"));

    // 스테이징 행은 DONE
    let row = OuterTradeRepository::find_by_id(&pool, "998877").await.unwrap().unwrap();
    assert_eq!(row.status, OuterTradeStatus::Done.as_i64());

    // 원장 변경 통지 발행됨
    let event = ledger_rx.try_recv().unwrap();
    assert_eq!(event.member_id, 501);
    assert_eq!(event.market, "BTC-USDT");
}

/// 같은 외부 체결을 두 번 처리해도 원장은 한 번만 움직인다
#[tokio::test]
async fn test_reprocessing_is_idempotent() {
    let pool = setup("idempotent").await;
    seed_market(&pool).await;
    seed_member(&pool, 501, "default").await;
    seed_order(&pool, 77, 501, "ask", Some("20000"), "0.02", "0.02", "limit").await;
    AccountRepository::insert(&pool, 501, "btc", "0", "0.02").await.unwrap();
    AccountRepository::insert(&pool, 501, "usdt", "1000", "0").await.unwrap();

    let fill_row = fill("998877", &format!("{}m501o77", BROKER), "sell", "20000", "0.01");
    let (engine, _ledger_rx) = engine_with(&pool, vec![fill_row]).await;

    engine.sync_cycle().await.unwrap();
    // 두 번째 사이클: 스테이징은 멱등 삽입에 걸러지고 DONE 행은 재처리되지 않음
    let stats = engine.sync_cycle().await.unwrap();
    assert_eq!(stats.staged, 0);

    // 상태를 억지로 미처리로 되돌려도 체결 유니크 가드가 이중 반영을 막는다
    OuterTradeRepository::set_status(
        &pool,
        "998877",
        OuterTradeStatus::Unprocessed.as_i64(),
        Utc::now().timestamp_millis(),
    )
    .await
    .unwrap();
    engine.sync_cycle().await.unwrap();

    assert_eq!(TradeRepository::count_by_fk(&pool, "998877").await.unwrap(), 1);
    let (usdt_balance, _, _) = account(&pool, 501, "usdt").await;
    assert_eq!(usdt_balance, "1199.6");
    let row = OuterTradeRepository::find_by_id(&pool, "998877").await.unwrap().unwrap();
    assert_eq!(row.status, OuterTradeStatus::Done.as_i64());
}

/// clOrdId를 해석할 수 없으면 상태만 기록되고 원장은 손대지 않는다
#[tokio::test]
async fn test_unparseable_client_order_id() {
    let pool = setup("bad_clordid").await;
    seed_market(&pool).await;
    seed_member(&pool, 501, "default").await;
    AccountRepository::insert(&pool, 501, "btc", "0", "0.02").await.unwrap();

    let fill_row = fill("11", &format!("{}xxx", BROKER), "sell", "20000", "0.01");
    let (engine, _ledger_rx) = engine_with(&pool, vec![fill_row]).await;

    let stats = engine.sync_cycle().await.unwrap();
    assert_eq!(stats.rejected, 1);

    let row = OuterTradeRepository::find_by_id(&pool, "11").await.unwrap().unwrap();
    assert_eq!(row.status, OuterTradeStatus::ClientOrderIdError.as_i64());
    assert_eq!(TradeRepository::count_by_fk(&pool, "11").await.unwrap(), 0);
    let (btc_balance, btc_locked, _) = account(&pool, 501, "btc").await;
    assert_eq!((btc_balance.as_str(), btc_locked.as_str()), ("0", "0.02"));
}

/// 다른 브로커/모르는 회원의 체결은 남의 시스템 체결로 분류된다
#[tokio::test]
async fn test_other_system_trade() {
    let pool = setup("other_system").await;
    seed_market(&pool).await;

    // 브로커 id 불일치
    let foreign = fill("21", "ffffffffffffffffm501o77", "sell", "20000", "0.01");
    // 브로커는 맞지만 회원/주문이 없음
    let unknown = fill("22", &format!("{}m999o1", BROKER), "sell", "20000", "0.01");
    let (engine, _ledger_rx) = engine_with(&pool, vec![foreign, unknown]).await;

    let stats = engine.sync_cycle().await.unwrap();
    assert_eq!(stats.rejected, 2);

    for id in ["21", "22"] {
        let row = OuterTradeRepository::find_by_id(&pool, id).await.unwrap().unwrap();
        assert_eq!(row.status, OuterTradeStatus::OtherSystemTrade.as_i64());
    }
}

/// 매수 주문이 지정가보다 유리하게 전량 체결되면 잔여 잠금이 풀린다
#[tokio::test]
async fn test_bid_fill_releases_remaining_locked() {
    let pool = setup("bid_release").await;
    seed_market(&pool).await;
    seed_member(&pool, 502, "default").await;
    // 0.02 BTC를 21000에 매수: 420 USDT 잠금
    seed_order(&pool, 88, 502, "bid", Some("21000"), "0.02", "420", "limit").await;
    AccountRepository::insert(&pool, 502, "btc", "0", "0").await.unwrap();
    AccountRepository::insert(&pool, 502, "usdt", "0", "420").await.unwrap();

    // 20000에 전량 체결 (명목가 400)
    let fill_row = fill("31", &format!("{}m502o88", BROKER), "buy", "20000", "0.02");
    let (engine, _ledger_rx) = engine_with(&pool, vec![fill_row]).await;
    engine.sync_cycle().await.unwrap();

    let order = OrderRepository::find_by_id(&pool, 88).await.unwrap().unwrap();
    assert_eq!(order.state, "done");
    assert_eq!(order.volume, "0");
    assert_eq!(order.locked, "0");
    // 수취 기초자산 = 0.02 - 수수료(0.02 * 0.002)
    assert_eq!(order.funds_received, "0.01996");

    // USDT: 명목가 400 잠금 차감 + 잔여 20 잠금 해제
    let (usdt_balance, usdt_locked, usdt_id) = account(&pool, 502, "usdt").await;
    assert_eq!((usdt_balance.as_str(), usdt_locked.as_str()), ("20", "0"));
    let (btc_balance, _, _) = account(&pool, 502, "btc").await;
    assert_eq!(btc_balance, "0.01996");

    // 감사 행 검증: 변경 없는 잔고 변동이 없어야 한다
    let versions =
        xbridge::db::repository::AccountVersionRepository::find_by_account(&pool, usdt_id)
            .await
            .unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0].reason, "strike_fill");
    assert_eq!(versions[1].reason, "order_release");
}

/// 계정 잔고가 음수가 되면 행 전체가 롤백되고 미처리로 남는다
#[tokio::test]
async fn test_negative_balance_rolls_back_row() {
    let pool = setup("negative").await;
    seed_market(&pool).await;
    seed_member(&pool, 501, "default").await;
    seed_order(&pool, 77, 501, "ask", Some("20000"), "0.02", "0.02", "limit").await;
    // 주문 잠금과 달리 계정 잠금이 부족한 무결성 이상 상태
    AccountRepository::insert(&pool, 501, "btc", "0", "0.005").await.unwrap();
    AccountRepository::insert(&pool, 501, "usdt", "1000", "0").await.unwrap();

    let fill_row = fill("41", &format!("{}m501o77", BROKER), "sell", "20000", "0.01");
    let (engine, _ledger_rx) = engine_with(&pool, vec![fill_row]).await;
    let stats = engine.sync_cycle().await.unwrap();
    assert_eq!(stats.failed, 1);

    // 트랜잭션 롤백: 체결/주문/잔고 전부 원래대로
    assert_eq!(TradeRepository::count_by_fk(&pool, "41").await.unwrap(), 0);
    let order = OrderRepository::find_by_id(&pool, 77).await.unwrap().unwrap();
    assert_eq!(order.volume, "0.02");
    assert_eq!(order.trades_count, 0);
    let (usdt_balance, _, _) = account(&pool, 501, "usdt").await;
    assert_eq!(usdt_balance, "1000");
    let row = OuterTradeRepository::find_by_id(&pool, "41").await.unwrap().unwrap();
    assert_eq!(row.status, OuterTradeStatus::Unprocessed.as_i64());
}

/// 시장가 주문은 clOrdId에 주문 id가 없어도 회원+종목으로 귀속된다
#[tokio::test]
async fn test_market_order_fill_without_order_id() {
    let pool = setup("market_order").await;
    seed_market(&pool).await;
    seed_member(&pool, 503, "vip").await;
    seed_order(&pool, 99, 503, "bid", None, "0.01", "250", "market").await;
    AccountRepository::insert(&pool, 503, "btc", "0", "0").await.unwrap();
    AccountRepository::insert(&pool, 503, "usdt", "0", "250").await.unwrap();

    let fill_row = fill("51", &format!("{}m503", BROKER), "buy", "20000", "0.01");
    let (engine, _ledger_rx) = engine_with(&pool, vec![fill_row]).await;
    engine.sync_cycle().await.unwrap();

    let order = OrderRepository::find_by_id(&pool, 99).await.unwrap().unwrap();
    assert_eq!(order.state, "done");
    // VIP 요율 0.001: 수취 BTC = 0.01 - 0.00001
    let (btc_balance, _, _) = account(&pool, 503, "btc").await;
    assert_eq!(btc_balance, "0.00999");
    // 명목가 200 차감, 잔여 50 해제
    let (usdt_balance, usdt_locked, _) = account(&pool, 503, "usdt").await;
    assert_eq!((usdt_balance.as_str(), usdt_locked.as_str()), ("50", "0"));
}

/// 원장 속성: 계정의 상태 변화는 감사 행 델타 합과 일치한다
#[tokio::test]
async fn test_account_versions_match_balance_changes() {
    let pool = setup("audit").await;
    seed_market(&pool).await;
    seed_member(&pool, 501, "default").await;
    seed_order(&pool, 77, 501, "ask", Some("20000"), "0.03", "0.03", "limit").await;
    AccountRepository::insert(&pool, 501, "btc", "0", "0.03").await.unwrap();
    AccountRepository::insert(&pool, 501, "usdt", "1000", "0").await.unwrap();

    let fills = vec![
        fill("61", &format!("{}m501o77", BROKER), "sell", "20000", "0.01"),
        fill("62", &format!("{}m501o77", BROKER), "sell", "20100", "0.02"),
    ];
    let (engine, _ledger_rx) = engine_with(&pool, fills).await;
    engine.sync_cycle().await.unwrap();

    for currency in ["btc", "usdt"] {
        let (balance, locked, account_id) = account(&pool, 501, currency).await;
        let versions =
            xbridge::db::repository::AccountVersionRepository::find_by_account(&pool, account_id)
                .await
                .unwrap();
        assert!(!versions.is_empty(), "변경이 있었는데 감사 행이 없음: {}", currency);

        let initial_balance = if currency == "usdt" { "1000" } else { "0" };
        let initial_locked = if currency == "btc" { "0.03" } else { "0" };

        let mut balance_sum = initial_balance.to_string();
        let mut locked_sum = initial_locked.to_string();
        for version in &versions {
            balance_sum = xbridge::util::decimal::add(&balance_sum, &version.balance_delta).unwrap();
            locked_sum = xbridge::util::decimal::add(&locked_sum, &version.locked_delta).unwrap();
        }
        assert_eq!(balance_sum, balance, "{} 잔고 감사 불일치", currency);
        assert_eq!(locked_sum, locked, "{} 잠금 감사 불일치", currency);
    }
}

/// 보존 기한이 지난 DONE 행은 수수료를 보존한 뒤 삭제된다
#[tokio::test]
async fn test_gc_archives_fees_before_delete() {
    let pool = setup("gc").await;
    seed_market(&pool).await;

    let now = Utc::now().timestamp_millis();
    let old_fill = fill("71", &format!("{}m501o77", BROKER), "sell", "20000", "0.01");
    let row = OuterTradeRecord {
        id: "71".to_string(),
        exchange_code: "okx".to_string(),
        data: serde_json::to_string(&old_fill).unwrap(),
        status: OuterTradeStatus::Done.as_i64(),
        traded_at: now - 200 * MS_PER_DAY,
        created_at: now - 200 * MS_PER_DAY,
        updated_at: now - 200 * MS_PER_DAY,
    };
    OuterTradeRepository::stage(&pool, &row).await.unwrap();

    let (engine, _ledger_rx) = engine_with(&pool, vec![]).await;
    let stats = engine.sync_cycle().await.unwrap();
    assert_eq!(stats.purged, 1);

    assert!(OuterTradeRepository::find_by_id(&pool, "71").await.unwrap().is_none());
    assert_eq!(OuterTradeFeeRepository::count(&pool).await.unwrap(), 1);
}
