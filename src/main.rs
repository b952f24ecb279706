use std::sync::Arc;

use hansom::config::Config;
use hansom::coordinator::Coordinator;
use hansom::external::GoogleMaps;
use hansom::session::transport::WsTransport;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = Config::from_env().unwrap();

    let transport = Arc::new(WsTransport::new(
        config.session_url.clone(),
        config.auth_token.clone(),
    ));
    let directions = Arc::new(GoogleMaps::new());

    let (coordinator, handle) = Coordinator::new(config, transport, directions);

    let runner = tokio::spawn(coordinator.run());

    tokio::signal::ctrl_c().await.unwrap();

    handle.shutdown().await.unwrap();
    runner.await.unwrap();
}
