//! 내부 이벤트 배선
//!
//! 커넥터 → 캐시 피드 → 배포 허브 사이의 결합을 전역 이벤트 버스 대신
//! 명시적으로 주입되는 타입 채널로 구성합니다.

use tokio::sync::{broadcast, mpsc};

use crate::external::connector::Candle;

/// 시장 채널 캐시 갱신 이벤트 (캐시 반영 완료 후 발행)
#[derive(Debug, Clone)]
pub enum MarketEvent {
    /// 체결 테이프 갱신
    TradesUpdated { market: String },
    /// 호가창 갱신
    BookUpdated { market: String },
    /// 1분봉 갱신
    CandleUpdated { market: String, candle: Candle },
    /// 티커 갱신 (전 종목 공통)
    TickerUpdated,
    /// 종목 목록 변경 (전체 연결 대상)
    InstrumentsUpdated { markets: Vec<String> },
}

/// 회원 채널 캐시 갱신 이벤트
#[derive(Debug, Clone)]
pub enum MemberEvent {
    /// 잔고 갱신
    AccountUpdated { member_id: i64 },
    /// 주문 갱신
    OrderUpdated { member_id: i64, market: String },
}

/// 허브 → 커넥터 스트림 제어 신호
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamControl {
    /// 해당 종목 스트리밍 시작 (첫 구독자 발생)
    StartMarket(String),
    /// 해당 종목 스트리밍 중단 (구독자 0명)
    StopMarket(String),
    /// 회원 비공개 채널 시작
    StartMember(i64),
    /// 회원 비공개 채널 중단
    StopMember(i64),
}

/// 정산 엔진 → 캐시 피드 원장 변경 통지
#[derive(Debug, Clone)]
pub struct LedgerEvent {
    pub member_id: i64,
    pub market: String,
}

/// 이벤트 채널 묶음
#[derive(Clone)]
pub struct EventChannels {
    pub market_tx: broadcast::Sender<MarketEvent>,
    pub member_tx: broadcast::Sender<MemberEvent>,
}

impl EventChannels {
    /// 새 채널 묶음 생성
    pub fn new(capacity: usize) -> Self {
        let (market_tx, _) = broadcast::channel(capacity);
        let (member_tx, _) = broadcast::channel(capacity);
        Self { market_tx, member_tx }
    }

    pub fn subscribe_market(&self) -> broadcast::Receiver<MarketEvent> {
        self.market_tx.subscribe()
    }

    pub fn subscribe_member(&self) -> broadcast::Receiver<MemberEvent> {
        self.member_tx.subscribe()
    }

    /// 수신자가 없으면 보내지 않고 조용히 넘어감
    pub fn publish_market(&self, event: MarketEvent) {
        let _ = self.market_tx.send(event);
    }

    pub fn publish_member(&self, event: MemberEvent) {
        let _ = self.member_tx.send(event);
    }
}

/// 스트림 제어 채널 생성
pub fn stream_control_channel() -> (mpsc::UnboundedSender<StreamControl>, mpsc::UnboundedReceiver<StreamControl>) {
    mpsc::unbounded_channel()
}

/// 원장 변경 통지 채널 생성
pub fn ledger_event_channel() -> (mpsc::UnboundedSender<LedgerEvent>, mpsc::UnboundedReceiver<LedgerEvent>) {
    mpsc::unbounded_channel()
}
