use clap::ArgMatches;
use vantasync_engine::ApiCredentials;

pub async fn run(matches: &ArgMatches) {
    let client_id = matches
        .get_one::<String>("client-id")
        .cloned()
        .unwrap_or_default();
    let client_secret = matches
        .get_one::<String>("client-secret")
        .cloned()
        .unwrap_or_default();

    let credentials = ApiCredentials::new(client_id, client_secret);
    if !credentials.is_complete() {
        eprintln!("✗ Client ID and Client Secret cannot be empty");
        std::process::exit(1);
    }

    let engine = super::engine();
    match engine.settings().set(credentials).await {
        Ok(()) => println!("✓ Credentials saved"),
        Err(e) => {
            eprintln!("✗ Failed to save credentials: {e}");
            std::process::exit(1);
        }
    }
}
