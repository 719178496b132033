use std::env;

use chrono::Duration;
use fansite_backend::config::AppConfig;
use fansite_backend::routes::auth::create_access_token;
use uuid::Uuid;

fn main() {
    dotenvy::dotenv().ok();

    let mut args = env::args().skip(1);
    let user_id = match args.next().map(|s| s.parse::<Uuid>()) {
        Some(Ok(id)) => id,
        Some(Err(e)) => {
            eprintln!("Invalid profile id: {}", e);
            std::process::exit(1);
        }
        None => {
            eprintln!("Usage: cargo run --bin mint-token <PROFILE_ID> [EMAIL] [TTL_MINUTES]");
            std::process::exit(1);
        }
    };
    let email = args.next();
    let ttl_minutes: i64 = args.next().and_then(|s| s.parse().ok()).unwrap_or(60);

    let config = AppConfig::from_env();

    let signed = create_access_token(
        user_id,
        email.as_deref(),
        &config.jwt_secret,
        Duration::minutes(ttl_minutes),
    );

    match signed {
        Ok(token) => {
            println!("\nProfile : {}", user_id);
            println!("Expires : {} minutes", ttl_minutes);
            println!("Token   : {}\n", token);
            println!("# Send it as:");
            println!("Authorization: Bearer {}", token);
        }
        Err(e) => {
            eprintln!("Error signing token: {}", e);
            std::process::exit(1);
        }
    }
}
