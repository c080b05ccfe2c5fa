//! 구독 레지스트리
//!
//! 연결당 종목 채널 하나와 (인증 시) 회원 채널 하나를 추적합니다.
//! 종목/회원별 청취자 집합이 비거나 처음 채워질 때 업스트림 제어 신호를
//! 보냅니다. 이 레지스트리의 변경은 호출 측 락으로 직렬화됩니다.

use std::collections::{HashMap, HashSet};

use log::{debug, warn};
use tokio::sync::mpsc;

use crate::api::models::WsOutMessage;
use crate::events::StreamControl;

/// 연결 식별자
pub type ConnectionId = u64;

#[derive(Debug, Default)]
struct SessionState {
    market: Option<String>,
    member: Option<i64>,
}

/// 구독 허브
pub struct SubscriptionHub {
    sessions: HashMap<ConnectionId, SessionState>,
    senders: HashMap<ConnectionId, mpsc::UnboundedSender<WsOutMessage>>,
    market_listeners: HashMap<String, HashSet<ConnectionId>>,
    member_listeners: HashMap<i64, HashSet<ConnectionId>>,
    control_tx: mpsc::UnboundedSender<StreamControl>,
    next_id: ConnectionId,
}

impl SubscriptionHub {
    pub fn new(control_tx: mpsc::UnboundedSender<StreamControl>) -> Self {
        Self {
            sessions: HashMap::new(),
            senders: HashMap::new(),
            market_listeners: HashMap::new(),
            member_listeners: HashMap::new(),
            control_tx,
            next_id: 0,
        }
    }

    /// 새 연결 등록
    pub fn register(&mut self, sender: mpsc::UnboundedSender<WsOutMessage>) -> ConnectionId {
        self.next_id += 1;
        let conn = self.next_id;
        self.sessions.insert(conn, SessionState::default());
        self.senders.insert(conn, sender);
        debug!("연결 등록: {}", conn);
        conn
    }

    /// 종목 채널 구독. 이전 구독은 먼저 해지됩니다.
    pub fn subscribe_market(&mut self, conn: ConnectionId, market: &str) {
        if !self.sessions.contains_key(&conn) {
            warn!("모르는 연결의 구독 요청: {}", conn);
            return;
        }

        self.unsubscribe_market(conn);

        let listeners = self.market_listeners.entry(market.to_string()).or_default();
        let first = listeners.is_empty();
        listeners.insert(conn);
        if let Some(session) = self.sessions.get_mut(&conn) {
            session.market = Some(market.to_string());
        }
        if first {
            let _ = self.control_tx.send(StreamControl::StartMarket(market.to_string()));
        }
    }

    /// 회원 채널 구독 (세션 해석은 호출 전에 끝나 있어야 함)
    pub fn subscribe_member(&mut self, conn: ConnectionId, member_id: i64) {
        if !self.sessions.contains_key(&conn) {
            warn!("모르는 연결의 구독 요청: {}", conn);
            return;
        }

        self.unsubscribe_member(conn);

        let listeners = self.member_listeners.entry(member_id).or_default();
        let first = listeners.is_empty();
        listeners.insert(conn);
        if let Some(session) = self.sessions.get_mut(&conn) {
            session.member = Some(member_id);
        }
        if first {
            let _ = self.control_tx.send(StreamControl::StartMember(member_id));
        }
    }

    /// 연결 해제: 두 채널 모두 해지
    pub fn disconnect(&mut self, conn: ConnectionId) {
        self.unsubscribe_market(conn);
        self.unsubscribe_member(conn);
        self.sessions.remove(&conn);
        self.senders.remove(&conn);
        debug!("연결 해제: {}", conn);
    }

    fn unsubscribe_market(&mut self, conn: ConnectionId) {
        let Some(market) = self.sessions.get_mut(&conn).and_then(|s| s.market.take()) else {
            return;
        };
        if let Some(listeners) = self.market_listeners.get_mut(&market) {
            listeners.remove(&conn);
            if listeners.is_empty() {
                self.market_listeners.remove(&market);
                let _ = self.control_tx.send(StreamControl::StopMarket(market));
            }
        }
    }

    fn unsubscribe_member(&mut self, conn: ConnectionId) {
        let Some(member_id) = self.sessions.get_mut(&conn).and_then(|s| s.member.take()) else {
            return;
        };
        if let Some(listeners) = self.member_listeners.get_mut(&member_id) {
            listeners.remove(&conn);
            if listeners.is_empty() {
                self.member_listeners.remove(&member_id);
                let _ = self.control_tx.send(StreamControl::StopMember(member_id));
            }
        }
    }

    /// 해당 종목 구독 연결에만 전송. 느린 연결이 다른 연결을 막지 않습니다.
    pub fn broadcast_market(&self, market: &str, message: &WsOutMessage) {
        if let Some(listeners) = self.market_listeners.get(market) {
            for conn in listeners {
                self.send_to(*conn, message);
            }
        }
    }

    /// 해당 회원으로 인증된 연결에만 전송
    pub fn broadcast_member(&self, member_id: i64, message: &WsOutMessage) {
        if let Some(listeners) = self.member_listeners.get(&member_id) {
            for conn in listeners {
                self.send_to(*conn, message);
            }
        }
    }

    /// 전체 연결 전송 (종목 목록 변경 등)
    pub fn broadcast_all(&self, message: &WsOutMessage) {
        for conn in self.senders.keys() {
            self.send_to(*conn, message);
        }
    }

    /// 단일 연결 전송
    pub fn send_to(&self, conn: ConnectionId, message: &WsOutMessage) {
        if let Some(sender) = self.senders.get(&conn) {
            // 전송 실패(연결 종료 중)는 그 연결만의 문제
            if sender.send(message.clone()).is_err() {
                debug!("전송 실패, 연결 정리 대기: {}", conn);
            }
        }
    }

    /// 종목 청취자 수 (테스트/관측용)
    pub fn market_listener_count(&self, market: &str) -> usize {
        self.market_listeners.get(market).map(|l| l.len()).unwrap_or(0)
    }

    pub fn member_listener_count(&self, member_id: i64) -> usize {
        self.member_listeners.get(&member_id).map(|l| l.len()).unwrap_or(0)
    }
}
