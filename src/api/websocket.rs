//! WebSocket 연결 핸들러
//!
//! 연결마다 송신용 채널을 허브에 등록하고, 구독 요청을 처리하며,
//! 구독 직후 현재 스냅샷을 내려보냅니다.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{sink::SinkExt, stream::StreamExt};
use log::warn;
use tokio::sync::mpsc;

use crate::api::models::{error_code, WsOutMessage, WsRequest};
use crate::cache::account_book::account_key;
use crate::cache::order_book::order_key;
use crate::external::session::SessionResolver;
use crate::hub::{depth_wire, ConnectionId};
use crate::server::ServerState;

/// WebSocket 업그레이드 핸들러
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<ServerState>,
) -> Response {
    ws.on_upgrade(|socket| websocket_connection(socket, state))
}

/// WebSocket 연결 처리
async fn websocket_connection(socket: WebSocket, state: ServerState) {
    let (mut sender, mut receiver) = socket.split();

    // 연결별 송신 큐. 허브는 여기로만 밀어 넣으므로 느린 소켓이 다른
    // 연결의 전송을 막지 않는다.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WsOutMessage>();
    let conn = state.hub.lock().await.register(out_tx);

    let send_task = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            match serde_json::to_string(&message) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("메시지 직렬화 실패: {}", e),
            }
        }
    });

    // 클라이언트 요청 수신
    while let Some(Ok(message)) = receiver.next().await {
        match message {
            Message::Text(text) => handle_request(&state, conn, &text).await,
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.hub.lock().await.disconnect(conn);
    send_task.abort();
}

/// 구독 요청 한 건 처리. 입력 오류는 해당 연결에만 보고합니다.
async fn handle_request(state: &ServerState, conn: ConnectionId, text: &str) {
    let request = match serde_json::from_str::<WsRequest>(text) {
        Ok(request) => request,
        Err(e) => {
            let code = if e.to_string().contains("unknown variant") {
                error_code::UNKNOWN_OP
            } else {
                error_code::BAD_REQUEST
            };
            let message = WsOutMessage::error(code, format!("요청 해석 실패: {}", e));
            state.hub.lock().await.send_to(conn, &message);
            return;
        }
    };

    match request {
        WsRequest::SubscribeMarket { market } => {
            if !state.markets.contains_key(&market) {
                let message =
                    WsOutMessage::error(error_code::UNKNOWN_MARKET, format!("모르는 종목: {}", market));
                state.hub.lock().await.send_to(conn, &message);
                return;
            }

            {
                let mut hub = state.hub.lock().await;
                hub.subscribe_market(conn, &market);
                hub.send_to(conn, &WsOutMessage::Subscribed { channel: market.clone() });
            }

            // 구독 직후 현재 스냅샷 전달
            let (book, trades, tickers) = {
                let caches = state.caches.read().await;
                let book = depth_wire(&caches.depth.snapshot(&market));
                let trades = caches.tape.snapshot(&market);
                let mut tickers = Vec::new();
                for key in caches.ticker.keys() {
                    tickers.extend(caches.ticker.snapshot(&key));
                }
                (book, trades, tickers)
            };
            let hub = state.hub.lock().await;
            let (asks, bids) = book;
            hub.send_to(conn, &WsOutMessage::BookUpdated { market: market.clone(), asks, bids });
            hub.send_to(conn, &WsOutMessage::TradesUpdated { market: market.clone(), trades });
            hub.send_to(conn, &WsOutMessage::TickerUpdated { tickers });
        }
        WsRequest::SubscribeMember { token } => {
            // 세션 해석 실패는 비인증일 뿐 연결은 유지된다
            let Some(member_id) = state.resolver.resolve_member_id(&token).await else {
                let message = WsOutMessage::error(error_code::UNAUTHENTICATED, "세션 해석 실패");
                state.hub.lock().await.send_to(conn, &message);
                return;
            };

            {
                let mut hub = state.hub.lock().await;
                hub.subscribe_member(conn, member_id);
                hub.send_to(
                    conn,
                    &WsOutMessage::Subscribed { channel: format!("member:{}", member_id) },
                );
            }

            let (accounts, orders_by_market) = {
                let caches = state.caches.read().await;
                let accounts = caches.accounts.snapshot(&account_key(member_id));
                let orders_by_market: Vec<(String, _)> = state
                    .markets
                    .keys()
                    .map(|market| {
                        (market.clone(), caches.orders.snapshot(&order_key(member_id, market)))
                    })
                    .filter(|(_, orders)| !orders.is_empty())
                    .collect();
                (accounts, orders_by_market)
            };
            let hub = state.hub.lock().await;
            hub.send_to(conn, &WsOutMessage::AccountUpdated { accounts });
            for (market, orders) in orders_by_market {
                hub.send_to(conn, &WsOutMessage::OrderUpdated { market, orders });
            }
        }
    }
}
