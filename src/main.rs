#[tokio::main]
async fn main() {
    chainpoll::start_server().await;
}
