pub mod models;
pub mod repository;

use std::collections::HashMap;

use log::info;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Error as SqlxError;

use models::MarketRegistry;

/// SQLite 데이터베이스 초기화 및 연결
pub async fn init_database(database_url: &str) -> Result<SqlitePool, SqlxError> {
    info!("SQLite 데이터베이스 초기화 중...");

    // 연결 풀 생성
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    // 테이블 생성
    create_tables(&pool).await?;

    info!("데이터베이스 초기화 완료");

    Ok(pool)
}

/// 종목 테이블을 읽어 기동 시 1회 레지스트리 구성
pub async fn load_market_registry(pool: &SqlitePool) -> anyhow::Result<MarketRegistry> {
    let records = repository::MarketRepository::find_all(pool).await?;
    let mut markets = HashMap::new();
    for record in &records {
        let market = record.to_market()?;
        markets.insert(market.symbol.clone(), market);
    }
    info!("종목 레지스트리 로드: {}개", markets.len());
    Ok(std::sync::Arc::new(markets))
}

/// 필요한 테이블 생성
async fn create_tables(pool: &SqlitePool) -> Result<(), SqlxError> {
    // 종목 테이블
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS markets (
            id INTEGER PRIMARY KEY,
            symbol TEXT NOT NULL UNIQUE,
            base_unit TEXT NOT NULL,
            quote_unit TEXT NOT NULL,
            lot_size TEXT NOT NULL,
            tick_size TEXT NOT NULL,
            price_scale INTEGER NOT NULL,
            ask_fee_rate TEXT NOT NULL,
            bid_fee_rate TEXT NOT NULL,
            vip_fee_rate TEXT NOT NULL,
            hero_fee_rate TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    // 회원 테이블
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS members (
            id INTEGER PRIMARY KEY,
            sn TEXT NOT NULL UNIQUE,
            tier TEXT NOT NULL DEFAULT 'default',
            email TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    // 주문 테이블
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS orders (
            id INTEGER PRIMARY KEY,
            member_id INTEGER NOT NULL,
            market TEXT NOT NULL,
            side TEXT NOT NULL,
            price TEXT,
            volume TEXT NOT NULL,
            origin_volume TEXT NOT NULL,
            locked TEXT NOT NULL DEFAULT '0',
            origin_locked TEXT NOT NULL DEFAULT '0',
            funds_received TEXT NOT NULL DEFAULT '0',
            trades_count INTEGER NOT NULL DEFAULT 0,
            state TEXT NOT NULL,
            ord_type TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    // 체결 테이블. trade_fk 유니크 제약이 중복 반영을 막는다.
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS trades (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            market TEXT NOT NULL,
            price TEXT NOT NULL,
            volume TEXT NOT NULL,
            funds TEXT NOT NULL,
            ask_order_id INTEGER,
            bid_order_id INTEGER,
            ask_member_id INTEGER,
            bid_member_id INTEGER,
            currency TEXT NOT NULL,
            trade_fk TEXT NOT NULL UNIQUE,
            created_at INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    // 바우처 테이블
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS vouchers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            member_id INTEGER NOT NULL,
            order_id INTEGER NOT NULL,
            trade_id INTEGER NOT NULL,
            trend TEXT NOT NULL,
            price TEXT NOT NULL,
            volume TEXT NOT NULL,
            value TEXT NOT NULL,
            ask_fee TEXT NOT NULL,
            bid_fee TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    // 계정 테이블
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS accounts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            member_id INTEGER NOT NULL,
            currency TEXT NOT NULL,
            balance TEXT NOT NULL DEFAULT '0',
            locked TEXT NOT NULL DEFAULT '0',
            UNIQUE(member_id, currency)
        )",
    )
    .execute(pool)
    .await?;

    // 계정 변경 감사 테이블 (append-only)
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS account_versions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            member_id INTEGER NOT NULL,
            account_id INTEGER NOT NULL,
            reason TEXT NOT NULL,
            balance_delta TEXT NOT NULL,
            locked_delta TEXT NOT NULL,
            fee TEXT NOT NULL DEFAULT '0',
            amount TEXT NOT NULL DEFAULT '0',
            modifiable_id INTEGER,
            modifiable_type TEXT,
            currency TEXT NOT NULL,
            fun TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    // 외부 체결 스테이징 테이블
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS outer_trades (
            id TEXT PRIMARY KEY,
            exchange_code TEXT NOT NULL,
            data TEXT NOT NULL,
            status INTEGER NOT NULL DEFAULT 0,
            traded_at INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    // GC 전 수수료 보존 테이블
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS outer_trade_fees (
            outer_trade_id TEXT PRIMARY KEY,
            market TEXT NOT NULL,
            fee TEXT NOT NULL,
            fee_currency TEXT NOT NULL,
            traded_at INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    // 인덱스 생성
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_orders_member_market ON orders(member_id, market)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_market ON trades(market)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_account_versions_account ON account_versions(account_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_outer_trades_status ON outer_trades(exchange_code, status)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_outer_trades_traded_at ON outer_trades(traded_at)")
        .execute(pool)
        .await?;

    Ok(())
}
