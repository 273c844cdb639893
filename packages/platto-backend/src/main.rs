#[tokio::main]
async fn main() {
    if let Err(e) = platto_backend::run().await {
        log::error!("platto-backend failed: {}", e);
        eprintln!("platto-backend failed: {}", e);
        std::process::exit(1);
    }
}
