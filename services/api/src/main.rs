use olla_api::run;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("olla error: {err}");
        std::process::exit(1);
    }
}
