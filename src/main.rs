use xbridge::config::Config;
use xbridge::server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 환경 변수 로드 및 로거 초기화
    dotenv::dotenv().ok();
    env_logger::init();

    let config = Config::from_env();
    server::start_server(config).await
}
