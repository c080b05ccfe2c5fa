//! 서버 설정
//!
//! dotenv로 불러온 환경 변수에서 읽고, 없으면 기본값을 씁니다.

use std::env;

/// 서버 설정
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub listen_port: u16,
    pub exchange_code: String,
    /// clOrdId 앞에 붙는 고정 길이(16자) 브로커 id
    pub broker_id: String,
    pub exchange_rest_url: String,
    pub exchange_ws_url: String,
    pub sync_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://xbridge.db?mode=rwc".to_string(),
            listen_port: 7100,
            exchange_code: "okx".to_string(),
            broker_id: "0000000000000000".to_string(),
            exchange_rest_url: "https://www.okx.com".to_string(),
            exchange_ws_url: "wss://ws.okx.com:8443/ws/v5/public".to_string(),
            sync_interval_secs: 600,
        }
    }
}

impl Config {
    /// 환경 변수에서 설정 로드
    pub fn from_env() -> Self {
        let default = Config::default();
        Self {
            database_url: env_or("DATABASE_URL", default.database_url),
            listen_port: env_parse("LISTEN_PORT", default.listen_port),
            exchange_code: env_or("EXCHANGE_CODE", default.exchange_code),
            broker_id: env_or("BROKER_ID", default.broker_id),
            exchange_rest_url: env_or("EXCHANGE_REST_URL", default.exchange_rest_url),
            exchange_ws_url: env_or("EXCHANGE_WS_URL", default.exchange_ws_url),
            sync_interval_secs: env_parse("SYNC_INTERVAL_SECS", default.sync_interval_secs),
        }
    }
}

fn env_or(key: &str, default: String) -> String {
    env::var(key).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|raw| raw.parse().ok()).unwrap_or(default)
}
