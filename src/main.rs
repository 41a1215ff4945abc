mod app;
mod dispatch;
mod menu;
mod session;
mod store;
mod types;

#[tokio::main]
async fn main() {
    app::run().await;
}
