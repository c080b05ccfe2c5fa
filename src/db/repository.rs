//! 원장 저장소
//!
//! 모든 함수는 실행자를 인자로 받으므로 풀 직접 호출과 트랜잭션 내 호출을
//! 같은 코드로 처리합니다. 원장을 변경하는 호출은 반드시 호출자가 소유한
//! 트랜잭션 안에서 실행해야 합니다.

use sqlx::sqlite::Sqlite;
use sqlx::Error as SqlxError;

use super::models::{
    AccountRecord, AccountVersionRecord, MarketRecord, MemberRecord, OrderRecord,
    OuterTradeFeeRecord, OuterTradeRecord, TradeRecord, VoucherRecord,
};

/// 종목 저장소
pub struct MarketRepository;

impl MarketRepository {
    pub async fn find_all<'e, E>(executor: E) -> Result<Vec<MarketRecord>, SqlxError>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, MarketRecord>(
            "SELECT id, symbol, base_unit, quote_unit, lot_size, tick_size, price_scale,
                    ask_fee_rate, bid_fee_rate, vip_fee_rate, hero_fee_rate
             FROM markets
             ORDER BY id ASC",
        )
        .fetch_all(executor)
        .await
    }

    pub async fn insert<'e, E>(executor: E, market: &MarketRecord) -> Result<(), SqlxError>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            "INSERT INTO markets
             (id, symbol, base_unit, quote_unit, lot_size, tick_size, price_scale,
              ask_fee_rate, bid_fee_rate, vip_fee_rate, hero_fee_rate)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(market.id)
        .bind(&market.symbol)
        .bind(&market.base_unit)
        .bind(&market.quote_unit)
        .bind(&market.lot_size)
        .bind(&market.tick_size)
        .bind(market.price_scale)
        .bind(&market.ask_fee_rate)
        .bind(&market.bid_fee_rate)
        .bind(&market.vip_fee_rate)
        .bind(&market.hero_fee_rate)
        .execute(executor)
        .await?;

        Ok(())
    }
}

/// 회원 저장소
pub struct MemberRepository;

impl MemberRepository {
    pub async fn find_by_id<'e, E>(executor: E, id: i64) -> Result<Option<MemberRecord>, SqlxError>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, MemberRecord>("SELECT id, sn, tier, email FROM members WHERE id = ?")
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn find_by_sn<'e, E>(executor: E, sn: &str) -> Result<Option<MemberRecord>, SqlxError>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, MemberRecord>("SELECT id, sn, tier, email FROM members WHERE sn = ?")
            .bind(sn)
            .fetch_optional(executor)
            .await
    }

    pub async fn insert<'e, E>(executor: E, member: &MemberRecord) -> Result<(), SqlxError>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query("INSERT INTO members (id, sn, tier, email) VALUES (?, ?, ?, ?)")
            .bind(member.id)
            .bind(&member.sn)
            .bind(&member.tier)
            .bind(&member.email)
            .execute(executor)
            .await?;

        Ok(())
    }
}

/// 주문 저장소
pub struct OrderRepository;

const ORDER_COLUMNS: &str = "id, member_id, market, side, price, volume, origin_volume, locked,
    origin_locked, funds_received, trades_count, state, ord_type, created_at, updated_at";

impl OrderRepository {
    pub async fn find_by_id<'e, E>(executor: E, id: i64) -> Result<Option<OrderRecord>, SqlxError>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, OrderRecord>(&format!(
            "SELECT {} FROM orders WHERE id = ?",
            ORDER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    /// 시장가 주문 체결 귀속용: 해당 회원/종목의 가장 오래된 미체결 시장가 주문
    pub async fn find_wait_market_order<'e, E>(
        executor: E,
        member_id: i64,
        market: &str,
    ) -> Result<Option<OrderRecord>, SqlxError>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, OrderRecord>(&format!(
            "SELECT {} FROM orders
             WHERE member_id = ? AND market = ? AND state = 'wait' AND ord_type = 'market'
             ORDER BY created_at ASC, id ASC
             LIMIT 1",
            ORDER_COLUMNS
        ))
        .bind(member_id)
        .bind(market)
        .fetch_optional(executor)
        .await
    }

    /// 캐시 재적재용 최근 주문 조회
    pub async fn find_recent<'e, E>(
        executor: E,
        member_id: i64,
        market: &str,
        limit: i64,
    ) -> Result<Vec<OrderRecord>, SqlxError>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, OrderRecord>(&format!(
            "SELECT {} FROM orders
             WHERE member_id = ? AND market = ?
             ORDER BY created_at DESC, id DESC
             LIMIT ?",
            ORDER_COLUMNS
        ))
        .bind(member_id)
        .bind(market)
        .bind(limit)
        .fetch_all(executor)
        .await
    }

    pub async fn insert<'e, E>(executor: E, order: &OrderRecord) -> Result<(), SqlxError>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            "INSERT INTO orders
             (id, member_id, market, side, price, volume, origin_volume, locked, origin_locked,
              funds_received, trades_count, state, ord_type, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(order.id)
        .bind(order.member_id)
        .bind(&order.market)
        .bind(&order.side)
        .bind(&order.price)
        .bind(&order.volume)
        .bind(&order.origin_volume)
        .bind(&order.locked)
        .bind(&order.origin_locked)
        .bind(&order.funds_received)
        .bind(order.trades_count)
        .bind(&order.state)
        .bind(&order.ord_type)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(executor)
        .await?;

        Ok(())
    }

    /// 체결 반영 후 주문 진행 상태 기록
    pub async fn update_fill_progress<'e, E>(executor: E, order: &OrderRecord) -> Result<(), SqlxError>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            "UPDATE orders
             SET volume = ?, locked = ?, funds_received = ?, trades_count = ?, state = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&order.volume)
        .bind(&order.locked)
        .bind(&order.funds_received)
        .bind(order.trades_count)
        .bind(&order.state)
        .bind(order.updated_at)
        .bind(order.id)
        .execute(executor)
        .await?;

        Ok(())
    }
}

/// 체결 저장소
pub struct TradeRepository;

impl TradeRepository {
    /// 외부 체결 id로 기존 체결 존재 확인 (중복 반영 방지 가드)
    pub async fn exists_by_fk<'e, E>(executor: E, trade_fk: &str) -> Result<bool, SqlxError>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM trades WHERE trade_fk = ?")
            .bind(trade_fk)
            .fetch_one(executor)
            .await?;
        Ok(count > 0)
    }

    pub async fn insert<'e, E>(executor: E, trade: &TradeRecord) -> Result<i64, SqlxError>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            "INSERT INTO trades
             (market, price, volume, funds, ask_order_id, bid_order_id, ask_member_id,
              bid_member_id, currency, trade_fk, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&trade.market)
        .bind(&trade.price)
        .bind(&trade.volume)
        .bind(&trade.funds)
        .bind(trade.ask_order_id)
        .bind(trade.bid_order_id)
        .bind(trade.ask_member_id)
        .bind(trade.bid_member_id)
        .bind(&trade.currency)
        .bind(&trade.trade_fk)
        .bind(trade.created_at)
        .execute(executor)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn count_by_fk<'e, E>(executor: E, trade_fk: &str) -> Result<i64, SqlxError>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_scalar("SELECT COUNT(*) FROM trades WHERE trade_fk = ?")
            .bind(trade_fk)
            .fetch_one(executor)
            .await
    }
}

/// 바우처 저장소
pub struct VoucherRepository;

impl VoucherRepository {
    pub async fn insert<'e, E>(executor: E, voucher: &VoucherRecord) -> Result<i64, SqlxError>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            "INSERT INTO vouchers
             (member_id, order_id, trade_id, trend, price, volume, value, ask_fee, bid_fee, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(voucher.member_id)
        .bind(voucher.order_id)
        .bind(voucher.trade_id)
        .bind(&voucher.trend)
        .bind(&voucher.price)
        .bind(&voucher.volume)
        .bind(&voucher.value)
        .bind(&voucher.ask_fee)
        .bind(&voucher.bid_fee)
        .bind(voucher.created_at)
        .execute(executor)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn find_by_trade<'e, E>(executor: E, trade_id: i64) -> Result<Vec<VoucherRecord>, SqlxError>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, VoucherRecord>(
            "SELECT id, member_id, order_id, trade_id, trend, price, volume, value,
                    ask_fee, bid_fee, created_at
             FROM vouchers
             WHERE trade_id = ?",
        )
        .bind(trade_id)
        .fetch_all(executor)
        .await
    }
}

/// 계정 저장소
pub struct AccountRepository;

impl AccountRepository {
    pub async fn find<'e, E>(
        executor: E,
        member_id: i64,
        currency: &str,
    ) -> Result<Option<AccountRecord>, SqlxError>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, AccountRecord>(
            "SELECT id, member_id, currency, balance, locked
             FROM accounts
             WHERE member_id = ? AND currency = ?",
        )
        .bind(member_id)
        .bind(currency)
        .fetch_optional(executor)
        .await
    }

    pub async fn find_all_by_member<'e, E>(
        executor: E,
        member_id: i64,
    ) -> Result<Vec<AccountRecord>, SqlxError>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, AccountRecord>(
            "SELECT id, member_id, currency, balance, locked
             FROM accounts
             WHERE member_id = ?
             ORDER BY currency ASC",
        )
        .bind(member_id)
        .fetch_all(executor)
        .await
    }

    pub async fn insert<'e, E>(
        executor: E,
        member_id: i64,
        currency: &str,
        balance: &str,
        locked: &str,
    ) -> Result<i64, SqlxError>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let result =
            sqlx::query("INSERT INTO accounts (member_id, currency, balance, locked) VALUES (?, ?, ?, ?)")
                .bind(member_id)
                .bind(currency)
                .bind(balance)
                .bind(locked)
                .execute(executor)
                .await?;

        Ok(result.last_insert_rowid())
    }

    /// 새 잔고 기록. 호출 전에 음수 검증이 끝나 있어야 한다.
    pub async fn update_amounts<'e, E>(
        executor: E,
        account_id: i64,
        balance: &str,
        locked: &str,
    ) -> Result<(), SqlxError>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query("UPDATE accounts SET balance = ?, locked = ? WHERE id = ?")
            .bind(balance)
            .bind(locked)
            .bind(account_id)
            .execute(executor)
            .await?;

        Ok(())
    }
}

/// 계정 변경 감사 저장소 (append-only)
pub struct AccountVersionRepository;

impl AccountVersionRepository {
    pub async fn insert<'e, E>(executor: E, version: &AccountVersionRecord) -> Result<(), SqlxError>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            "INSERT INTO account_versions
             (member_id, account_id, reason, balance_delta, locked_delta, fee, amount,
              modifiable_id, modifiable_type, currency, fun, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(version.member_id)
        .bind(version.account_id)
        .bind(&version.reason)
        .bind(&version.balance_delta)
        .bind(&version.locked_delta)
        .bind(&version.fee)
        .bind(&version.amount)
        .bind(version.modifiable_id)
        .bind(&version.modifiable_type)
        .bind(&version.currency)
        .bind(&version.fun)
        .bind(version.created_at)
        .execute(executor)
        .await?;

        Ok(())
    }

    pub async fn find_by_account<'e, E>(
        executor: E,
        account_id: i64,
    ) -> Result<Vec<AccountVersionRecord>, SqlxError>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, AccountVersionRecord>(
            "SELECT id, member_id, account_id, reason, balance_delta, locked_delta, fee, amount,
                    modifiable_id, modifiable_type, currency, fun, created_at
             FROM account_versions
             WHERE account_id = ?
             ORDER BY id ASC",
        )
        .bind(account_id)
        .fetch_all(executor)
        .await
    }
}

/// 외부 체결 스테이징 저장소
pub struct OuterTradeRepository;

const OUTER_TRADE_COLUMNS: &str =
    "id, exchange_code, data, status, traded_at, created_at, updated_at";

impl OuterTradeRepository {
    /// 멱등 스테이징: 이미 있는 외부 체결 id는 건너뛴다. 신규 삽입이면 true.
    pub async fn stage<'e, E>(executor: E, row: &OuterTradeRecord) -> Result<bool, SqlxError>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO outer_trades
             (id, exchange_code, data, status, traded_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&row.id)
        .bind(&row.exchange_code)
        .bind(&row.data)
        .bind(row.status)
        .bind(row.traded_at)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn find_by_id<'e, E>(executor: E, id: &str) -> Result<Option<OuterTradeRecord>, SqlxError>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, OuterTradeRecord>(&format!(
            "SELECT {} FROM outer_trades WHERE id = ?",
            OUTER_TRADE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    pub async fn find_unprocessed<'e, E>(
        executor: E,
        exchange_code: &str,
        limit: i64,
    ) -> Result<Vec<OuterTradeRecord>, SqlxError>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, OuterTradeRecord>(&format!(
            "SELECT {} FROM outer_trades
             WHERE exchange_code = ? AND status = 0
             ORDER BY created_at ASC, id ASC
             LIMIT ?",
            OUTER_TRADE_COLUMNS
        ))
        .bind(exchange_code)
        .bind(limit)
        .fetch_all(executor)
        .await
    }

    pub async fn set_status<'e, E>(executor: E, id: &str, status: i64, updated_at: i64) -> Result<(), SqlxError>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query("UPDATE outer_trades SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status)
            .bind(updated_at)
            .bind(id)
            .execute(executor)
            .await?;

        Ok(())
    }

    /// 마지막 동기화 지점 (스테이징된 체결의 최신 체결 시각)
    pub async fn latest_traded_at<'e, E>(
        executor: E,
        exchange_code: &str,
    ) -> Result<Option<i64>, SqlxError>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_scalar("SELECT MAX(traded_at) FROM outer_trades WHERE exchange_code = ?")
            .bind(exchange_code)
            .fetch_one(executor)
            .await
    }

    /// 보존 기한이 지난 DONE 행 조회 (GC 대상)
    pub async fn find_expired_done<'e, E>(
        executor: E,
        exchange_code: &str,
        cutoff: i64,
    ) -> Result<Vec<OuterTradeRecord>, SqlxError>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, OuterTradeRecord>(&format!(
            "SELECT {} FROM outer_trades
             WHERE exchange_code = ? AND status = 1 AND traded_at < ?",
            OUTER_TRADE_COLUMNS
        ))
        .bind(exchange_code)
        .bind(cutoff)
        .fetch_all(executor)
        .await
    }

    pub async fn delete<'e, E>(executor: E, id: &str) -> Result<(), SqlxError>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query("DELETE FROM outer_trades WHERE id = ?")
            .bind(id)
            .execute(executor)
            .await?;

        Ok(())
    }
}

/// 외부 수수료 보존 저장소
pub struct OuterTradeFeeRepository;

impl OuterTradeFeeRepository {
    pub async fn insert<'e, E>(executor: E, fee: &OuterTradeFeeRecord) -> Result<(), SqlxError>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            "INSERT OR REPLACE INTO outer_trade_fees
             (outer_trade_id, market, fee, fee_currency, traded_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&fee.outer_trade_id)
        .bind(&fee.market)
        .bind(&fee.fee)
        .bind(&fee.fee_currency)
        .bind(fee.traded_at)
        .execute(executor)
        .await?;

        Ok(())
    }

    pub async fn count<'e, E>(executor: E) -> Result<i64, SqlxError>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_scalar("SELECT COUNT(*) FROM outer_trade_fees")
            .fetch_one(executor)
            .await
    }
}
