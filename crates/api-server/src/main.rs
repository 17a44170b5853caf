fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(api_server::run_server());

    if let Err(err) = &result {
        // Exit codes: 1 user error, 2 dependency unavailable, 3 internal.
        let message = err.to_string();
        tracing::error!(error = %message, "server exited with error");
        let code = if message.contains("Validation") {
            1
        } else if message.contains("Unavailable") || message.contains("connect") {
            2
        } else {
            3
        };
        std::process::exit(code);
    }
    Ok(())
}
