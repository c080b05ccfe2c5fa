//! 외부 체결 정산 엔진
//!
//! 외부 거래소에서 체결 이력을 끌어와 스테이징하고, 행 단위 트랜잭션으로
//! 주문/체결/바우처/계정을 갱신합니다. 스테이징은 외부 체결 id 기준으로
//! 멱등이고, 체결 테이블의 trade_fk 유니크 제약이 이중 반영을 막으므로
//! 전체 파이프라인은 최소 한 번 실행 + 사실상 한 번 반영입니다.

use std::time::Duration;

use chrono::Utc;
use log::{error, info, warn};
use rust_decimal::Decimal;
use sqlx::sqlite::{Sqlite, SqlitePool};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, sleep};

use crate::db::models::{
    AccountVersionRecord, MarketRegistry, OuterTradeFeeRecord, OuterTradeRecord, OuterTradeStatus,
    TradeRecord, VoucherRecord,
};
use crate::db::repository::{
    AccountRepository, AccountVersionRepository, MemberRepository, OrderRepository,
    OuterTradeFeeRepository, OuterTradeRepository, TradeRepository, VoucherRepository,
};
use crate::events::LedgerEvent;
use crate::external::client_order_id;
use crate::external::connector::{Connector, ConnectorError, ExternalOrderState, Fill};
use crate::settlement::fees;
use crate::util::decimal::{self, DecimalError};

const MS_PER_DAY: i64 = 86_400_000;

/// 정산 엔진 설정
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    pub exchange_code: String,
    /// clOrdId 앞의 고정 길이 브로커 id. 다른 값이면 남의 시스템 체결.
    pub broker_id: String,
    pub interval_secs: u64,
    pub first_pull_days: i64,
    pub overlap_days: i64,
    pub retention_days: i64,
    pub fetch_retry_max: u32,
    pub fetch_retry_base_ms: u64,
    pub batch_limit: i64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            exchange_code: "okx".to_string(),
            broker_id: "0000000000000000".to_string(),
            interval_secs: 600, // 10분
            first_pull_days: 180,
            overlap_days: 1,
            retention_days: 180,
            fetch_retry_max: 3,
            fetch_retry_base_ms: 500,
            batch_limit: 500,
        }
    }
}

/// 정산 오류
#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("DB 오류: {0}")]
    Db(#[from] sqlx::Error),
    #[error("십진수 오류: {0}")]
    Decimal(#[from] DecimalError),
    #[error("커넥터 오류: {0}")]
    Connector(#[from] ConnectorError),
    #[error("체결 데이터 이상: {0}")]
    BadFill(String),
    /// 음수 잔고 등 원장 무결성 위반. 조용히 보정하지 않고 트랜잭션을 되돌린다.
    #[error("원장 무결성 위반: {0}")]
    Integrity(String),
}

/// 행 처리 결과
enum RowOutcome {
    /// 원장에 반영됨
    Applied { member_id: i64, market: String },
    /// 이미 반영된 체결 (멱등 가드에 걸림)
    AlreadyApplied,
    /// 터미널 상태로 분류됨 (원장 미반영)
    Rejected(OuterTradeStatus),
}

/// 한 사이클 집계
#[derive(Debug, Default)]
pub struct CycleStats {
    pub fetched: usize,
    pub staged: usize,
    pub applied: usize,
    pub rejected: usize,
    pub failed: usize,
    pub purged: usize,
}

/// 외부 체결 정산 엔진
pub struct SettlementEngine<C: Connector> {
    pool: SqlitePool,
    connector: C,
    markets: MarketRegistry,
    config: SettlementConfig,
    ledger_tx: mpsc::UnboundedSender<LedgerEvent>,
}

impl<C: Connector> SettlementEngine<C> {
    pub fn new(
        pool: SqlitePool,
        connector: C,
        markets: MarketRegistry,
        config: SettlementConfig,
        ledger_tx: mpsc::UnboundedSender<LedgerEvent>,
    ) -> Self {
        Self { pool, connector, markets, config, ledger_tx }
    }

    /// 주기 실행. 종료 신호를 받으면 진행 중인 사이클을 마치고 멈춥니다.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("정산 엔진 시작 (주기 {}초)", self.config.interval_secs);
        let mut ticker = interval(Duration::from_secs(self.config.interval_secs));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sync_cycle().await {
                        Ok(stats) => info!(
                            "정산 사이클 완료: staged={} applied={} rejected={} failed={} purged={}",
                            stats.staged, stats.applied, stats.rejected, stats.failed, stats.purged
                        ),
                        Err(e) => error!("정산 사이클 실패, 다음 주기에 재시도: {}", e),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("정산 엔진 종료");
                    break;
                }
            }
        }
    }

    /// 한 사이클: 수집 → 스테이징 → 행 처리 → GC. 강제 실행 진입점이기도 합니다.
    pub async fn sync_cycle(&self) -> Result<CycleStats, SettlementError> {
        let mut stats = CycleStats::default();

        match self.fetch_and_stage().await {
            Ok((fetched, staged)) => {
                stats.fetched = fetched;
                stats.staged = staged;
            }
            // 수집 실패는 처리 단계를 막지 않음 (이미 스테이징된 행 재시도)
            Err(e) => warn!("체결 수집 실패, 스테이징분만 처리: {}", e),
        }

        self.process_unprocessed(&mut stats).await?;
        stats.purged = self.collect_garbage().await?;

        Ok(stats)
    }

    /// 마지막 동기화 지점부터 체결을 수집해 멱등 스테이징
    async fn fetch_and_stage(&self) -> Result<(usize, usize), SettlementError> {
        let now = Utc::now().timestamp_millis();
        let begin = match OuterTradeRepository::latest_traded_at(&self.pool, &self.config.exchange_code)
            .await?
        {
            // 이후 실행은 1일 겹침으로 지연 전달/시계 오차 흡수
            Some(latest) => latest - self.config.overlap_days * MS_PER_DAY,
            // 최초 실행은 180일 이력
            None => now - self.config.first_pull_days * MS_PER_DAY,
        };

        let fills = self.fetch_with_retry(begin).await?;
        let fetched = fills.len();
        let mut staged = 0;

        for fill in fills {
            let data = serde_json::to_string(&fill)
                .map_err(|e| SettlementError::BadFill(format!("체결 직렬화 실패: {}", e)))?;
            let row = OuterTradeRecord {
                id: fill.trade_id.clone(),
                exchange_code: self.config.exchange_code.clone(),
                data,
                status: OuterTradeStatus::Unprocessed.as_i64(),
                traded_at: fill.ts,
                created_at: now,
                updated_at: now,
            };
            if OuterTradeRepository::stage(&self.pool, &row).await? {
                staged += 1;
            }
        }

        Ok((fetched, staged))
    }

    /// 일시 오류에 한해 지수 백오프 재시도
    async fn fetch_with_retry(&self, begin_ms: i64) -> Result<Vec<Fill>, SettlementError> {
        let mut attempt = 0;
        loop {
            match self.connector.fetch_fills_since(begin_ms).await {
                Ok(fills) => return Ok(fills),
                Err(e) if e.is_transient() && attempt < self.config.fetch_retry_max => {
                    let backoff = self.config.fetch_retry_base_ms * (1u64 << attempt);
                    warn!("체결 수집 일시 오류, {}ms 후 재시도: {}", backoff, e);
                    sleep(Duration::from_millis(backoff)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// 미처리 행을 순차 처리. 행 하나의 실패가 사이클을 멈추지 않습니다.
    async fn process_unprocessed(&self, stats: &mut CycleStats) -> Result<(), SettlementError> {
        let rows =
            OuterTradeRepository::find_unprocessed(&self.pool, &self.config.exchange_code, self.config.batch_limit)
                .await?;

        for row in rows {
            let fill: Fill = match serde_json::from_str(&row.data) {
                Ok(fill) => fill,
                Err(e) => {
                    error!("스테이징 데이터 해석 불가, 격리 (id={}): {}", row.id, e);
                    self.mark_status(&row.id, OuterTradeStatus::SystemError).await?;
                    stats.failed += 1;
                    continue;
                }
            };

            match self.process_row(&row, &fill).await {
                Ok(RowOutcome::Applied { member_id, market }) => {
                    stats.applied += 1;
                    let _ = self.ledger_tx.send(LedgerEvent { member_id, market });
                }
                Ok(RowOutcome::AlreadyApplied) => {
                    stats.applied += 1;
                }
                Ok(RowOutcome::Rejected(status)) => {
                    // 터미널 분류는 원장과 무관하게 상태만 커밋
                    self.mark_status(&row.id, status).await?;
                    stats.rejected += 1;
                }
                Err(SettlementError::Integrity(detail)) => {
                    // 무결성 위반은 우선순위 경보 대상
                    error!("[무결성] 행 롤백, 수동 확인 필요 (id={}): {}", row.id, detail);
                    stats.failed += 1;
                }
                Err(e) => {
                    warn!("행 처리 실패, 다음 사이클 재시도 (id={}): {}", row.id, e);
                    stats.failed += 1;
                }
            }
        }

        Ok(())
    }

    /// 행 하나를 한 트랜잭션으로 원장에 반영
    async fn process_row(
        &self,
        row: &OuterTradeRecord,
        fill: &Fill,
    ) -> Result<RowOutcome, SettlementError> {
        // (a) clOrdId 해석
        let decoded = match client_order_id::decode(&fill.cl_ord_id) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("clOrdId 해석 실패 (id={}): {}", row.id, e);
                return Ok(RowOutcome::Rejected(OuterTradeStatus::ClientOrderIdError));
            }
        };

        // 다른 배포 환경의 주문
        if decoded.broker_id != self.config.broker_id {
            return Ok(RowOutcome::Rejected(OuterTradeStatus::OtherSystemTrade));
        }

        let Some(market) = self.markets.get(&fill.inst_id) else {
            return Ok(RowOutcome::Rejected(OuterTradeStatus::OtherSystemTrade));
        };

        // (b) 주문/회원 해석. 시장가 주문은 주문 id 없이 회원+종목으로 귀속.
        let order = match decoded.order_id {
            Some(order_id) => OrderRepository::find_by_id(&self.pool, order_id).await?,
            None => {
                OrderRepository::find_wait_market_order(&self.pool, decoded.member_id, &market.symbol)
                    .await?
            }
        };
        let Some(order) = order else {
            return Ok(RowOutcome::Rejected(OuterTradeStatus::OtherSystemTrade));
        };
        if order.member_id != decoded.member_id || order.market != market.symbol {
            return Ok(RowOutcome::Rejected(OuterTradeStatus::OtherSystemTrade));
        }
        let Some(member) = MemberRepository::find_by_id(&self.pool, decoded.member_id).await? else {
            return Ok(RowOutcome::Rejected(OuterTradeStatus::OtherSystemTrade));
        };

        let trend = match fill.side.as_str() {
            "sell" => fees::SIDE_ASK,
            "buy" => fees::SIDE_BID,
            other => return Err(SettlementError::BadFill(format!("알 수 없는 사이드: {}", other))),
        };
        if order.side != trend {
            return Err(SettlementError::Integrity(format!(
                "주문 사이드 불일치: 주문 {} = {}, 체결 = {}",
                order.id, order.side, trend
            )));
        }

        let size = decimal::parse(&fill.fill_sz)?;
        let price = decimal::parse(&fill.fill_px)?;
        if size <= Decimal::ZERO || price <= Decimal::ZERO {
            return Err(SettlementError::BadFill(format!(
                "체결 수량/가격 이상: sz={} px={}",
                fill.fill_sz, fill.fill_px
            )));
        }
        let notional = size * price;

        // (c) 회원 등급별 수수료율
        let rate = fees::fee_rate(market, &member.tier, trend);
        let fee = if trend == fees::SIDE_ASK { notional * rate } else { size * rate };

        // 부분 체결이 남는 경우만 외부 주문 상태를 미러링.
        // 외부 API 지연이 트랜잭션을 붙들지 않도록 조회는 트랜잭션 밖에서 한다.
        let volume_before = decimal::parse(&order.volume)?;
        let mirrored_state = if volume_before > size {
            match self.connector.fetch_order_state(&fill.inst_id, &fill.ord_id).await {
                Ok(ExternalOrderState::Live) => "wait",
                Ok(ExternalOrderState::Filled) => "done",
                Ok(ExternalOrderState::Canceled) => "cancel",
                Err(e) => {
                    warn!("외부 주문 상태 조회 실패, wait 유지 (ordId={}): {}", fill.ord_id, e);
                    "wait"
                }
            }
        } else {
            "done"
        };

        let now = Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;

        // (e 가드) 이미 반영된 외부 체결이면 상태만 맞추고 끝
        if TradeRepository::exists_by_fk(&mut *tx, &row.id).await? {
            OuterTradeRepository::set_status(&mut *tx, &row.id, OuterTradeStatus::Done.as_i64(), now)
                .await?;
            tx.commit().await?;
            return Ok(RowOutcome::AlreadyApplied);
        }

        // 트랜잭션 안에서 주문 재조회 (최신 잔여 수량 기준으로 계산)
        let Some(mut order) = OrderRepository::find_by_id(&mut *tx, order.id).await? else {
            return Ok(RowOutcome::Rejected(OuterTradeStatus::OtherSystemTrade));
        };

        let volume = decimal::parse(&order.volume)?;
        let locked = decimal::parse(&order.locked)?;
        let funds_received = decimal::parse(&order.funds_received)?;

        if size > volume {
            return Err(SettlementError::Integrity(format!(
                "체결 수량이 주문 잔여 수량 초과: 주문 {} 잔여 {} < 체결 {}",
                order.id, volume, size
            )));
        }

        // (d) 주문 진행 수치
        let new_volume = volume - size;
        // 매도 주문은 기초자산 수량을, 매수 주문은 상대자산 명목가를 잠그고 있다
        let order_locked_delta = if trend == fees::SIDE_ASK { size } else { notional };
        let received_gain = if trend == fees::SIDE_ASK { notional - fee } else { size - fee };
        let mut new_locked = locked - order_locked_delta;
        if new_locked < Decimal::ZERO {
            return Err(SettlementError::Integrity(format!(
                "주문 잠금 음수: 주문 {} locked {} - {}",
                order.id, locked, order_locked_delta
            )));
        }
        let new_state = if new_volume.is_zero() { "done" } else { mirrored_state };

        // (e) 체결 + 바우처
        let trade_id = TradeRepository::insert(
            &mut *tx,
            &TradeRecord {
                id: None,
                market: market.symbol.clone(),
                price: decimal::format(price),
                volume: decimal::format(size),
                funds: decimal::format(notional),
                ask_order_id: (trend == fees::SIDE_ASK).then_some(order.id),
                bid_order_id: (trend == fees::SIDE_BID).then_some(order.id),
                ask_member_id: (trend == fees::SIDE_ASK).then_some(member.id),
                bid_member_id: (trend == fees::SIDE_BID).then_some(member.id),
                currency: market.symbol.clone(),
                trade_fk: row.id.clone(),
                created_at: fill.ts,
            },
        )
        .await?;

        VoucherRepository::insert(
            &mut *tx,
            &VoucherRecord {
                id: None,
                member_id: member.id,
                order_id: order.id,
                trade_id,
                trend: trend.to_string(),
                price: decimal::format(price),
                volume: decimal::format(size),
                value: decimal::format(notional),
                ask_fee: decimal::format(if trend == fees::SIDE_ASK { fee } else { Decimal::ZERO }),
                bid_fee: decimal::format(if trend == fees::SIDE_BID { fee } else { Decimal::ZERO }),
                created_at: fill.ts,
            },
        )
        .await?;

        // (f) 계정 반영: 변경마다 감사 행이 짝으로 남는다
        if trend == fees::SIDE_ASK {
            // 매도 체결: 기초자산 잠금 차감, 상대자산 잔고 증가(수수료 차감)
            self.apply_account_delta(
                &mut tx,
                member.id,
                &market.base_unit,
                Decimal::ZERO,
                -size,
                Decimal::ZERO,
                "strike_fill",
                "unlock_and_sub_funds",
                trade_id,
                now,
            )
            .await?;
            self.apply_account_delta(
                &mut tx,
                member.id,
                &market.quote_unit,
                notional - fee,
                Decimal::ZERO,
                fee,
                "strike_fill",
                "plus_funds",
                trade_id,
                now,
            )
            .await?;
        } else {
            // 매수 체결: 상대자산 잠금 차감, 기초자산 잔고 증가(수수료 차감)
            self.apply_account_delta(
                &mut tx,
                member.id,
                &market.quote_unit,
                Decimal::ZERO,
                -notional,
                Decimal::ZERO,
                "strike_fill",
                "unlock_and_sub_funds",
                trade_id,
                now,
            )
            .await?;
            self.apply_account_delta(
                &mut tx,
                member.id,
                &market.base_unit,
                size - fee,
                Decimal::ZERO,
                fee,
                "strike_fill",
                "plus_funds",
                trade_id,
                now,
            )
            .await?;
        }

        // 종결 주문의 잔여 잠금 해제 (유리한 평균가 체결 또는 취소 잔여분)
        if new_state != "wait" && new_locked > Decimal::ZERO {
            let release_currency =
                if trend == fees::SIDE_ASK { &market.base_unit } else { &market.quote_unit };
            self.apply_account_delta(
                &mut tx,
                member.id,
                release_currency,
                new_locked,
                -new_locked,
                Decimal::ZERO,
                "order_release",
                "unlock_funds",
                order.id,
                now,
            )
            .await?;
            new_locked = Decimal::ZERO;
        }

        order.volume = decimal::format(new_volume);
        order.locked = decimal::format(new_locked);
        order.funds_received = decimal::format(funds_received + received_gain);
        order.trades_count += 1;
        order.state = new_state.to_string();
        order.updated_at = now;
        OrderRepository::update_fill_progress(&mut *tx, &order).await?;

        // (g) 같은 트랜잭션에서 DONE 마킹
        OuterTradeRepository::set_status(&mut *tx, &row.id, OuterTradeStatus::Done.as_i64(), now)
            .await?;

        tx.commit().await?;

        Ok(RowOutcome::Applied { member_id: member.id, market: market.symbol.clone() })
    }

    /// 계정 잔고 변경 + 감사 행 기록. 음수가 되면 무결성 오류.
    #[allow(clippy::too_many_arguments)]
    async fn apply_account_delta(
        &self,
        tx: &mut sqlx::Transaction<'_, Sqlite>,
        member_id: i64,
        currency: &str,
        balance_delta: Decimal,
        locked_delta: Decimal,
        fee: Decimal,
        reason: &str,
        fun: &str,
        modifiable_id: i64,
        now: i64,
    ) -> Result<(), SettlementError> {
        let account = AccountRepository::find(&mut **tx, member_id, currency)
            .await?
            .ok_or_else(|| {
                SettlementError::Integrity(format!(
                    "계정 없음: member={} currency={}",
                    member_id, currency
                ))
            })?;

        let balance = decimal::parse(&account.balance)?;
        let locked = decimal::parse(&account.locked)?;
        let new_balance = balance + balance_delta;
        let new_locked = locked + locked_delta;

        if new_balance < Decimal::ZERO || new_locked < Decimal::ZERO {
            return Err(SettlementError::Integrity(format!(
                "음수 잔고: member={} currency={} balance {}→{} locked {}→{}",
                member_id, currency, balance, new_balance, locked, new_locked
            )));
        }

        AccountRepository::update_amounts(
            &mut **tx,
            account.id,
            &decimal::format(new_balance),
            &decimal::format(new_locked),
        )
        .await?;

        AccountVersionRepository::insert(
            &mut **tx,
            &AccountVersionRecord {
                id: None,
                member_id,
                account_id: account.id,
                reason: reason.to_string(),
                balance_delta: decimal::format(balance_delta),
                locked_delta: decimal::format(locked_delta),
                fee: decimal::format(fee),
                amount: decimal::format(new_balance + new_locked),
                modifiable_id: Some(modifiable_id),
                modifiable_type: Some(if reason == "order_release" { "Order" } else { "Trade" }.to_string()),
                currency: currency.to_string(),
                fun: fun.to_string(),
                created_at: now,
            },
        )
        .await?;

        Ok(())
    }

    async fn mark_status(&self, id: &str, status: OuterTradeStatus) -> Result<(), SettlementError> {
        let now = Utc::now().timestamp_millis();
        OuterTradeRepository::set_status(&self.pool, id, status.as_i64(), now).await?;
        Ok(())
    }

    /// 보존 기한이 지난 DONE 행 정리. 삭제 전에 외부 수수료를 보존 테이블로 옮긴다.
    async fn collect_garbage(&self) -> Result<usize, SettlementError> {
        let cutoff = Utc::now().timestamp_millis() - self.config.retention_days * MS_PER_DAY;
        let expired =
            OuterTradeRepository::find_expired_done(&self.pool, &self.config.exchange_code, cutoff)
                .await?;

        let mut purged = 0;
        for row in expired {
            let mut tx = self.pool.begin().await?;

            match serde_json::from_str::<Fill>(&row.data) {
                Ok(fill) => {
                    let fee = if fill.fee.is_empty() { "0".to_string() } else { fill.fee.clone() };
                    OuterTradeFeeRepository::insert(
                        &mut *tx,
                        &OuterTradeFeeRecord {
                            outer_trade_id: row.id.clone(),
                            market: fill.inst_id.clone(),
                            fee,
                            fee_currency: fill.fee_ccy.clone(),
                            traded_at: row.traded_at,
                        },
                    )
                    .await?;
                }
                Err(e) => {
                    // 수수료를 보존할 수 없으면 지우지 않는다
                    warn!("GC 건너뜀, 수수료 보존 불가 (id={}): {}", row.id, e);
                    continue;
                }
            }

            OuterTradeRepository::delete(&mut *tx, &row.id).await?;
            tx.commit().await?;
            purged += 1;
        }

        Ok(purged)
    }
}
