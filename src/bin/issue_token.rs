use std::env;

use dotenv::dotenv;
use uuid::Uuid;

use kanari::auth::create_jwt_token;

/// Mints a development JWT for the given (or a fresh) user id.
fn main() {
    dotenv().ok();

    let args: Vec<String> = env::args().collect();
    if args.len() > 3 {
        println!("Usage: {} [user-uuid] [ttl-hours]", args[0]);
        std::process::exit(1);
    }

    let user_id = match args.get(1).map(|s| s.parse::<Uuid>()) {
        Some(Ok(id)) => id,
        Some(Err(e)) => {
            eprintln!("Invalid user id: {}", e);
            std::process::exit(1);
        }
        None => Uuid::new_v4(),
    };
    let ttl_hours = args
        .get(2)
        .and_then(|s| s.parse::<i64>().ok())
        .unwrap_or(24);

    let secret = match env::var("JWT_SECRET") {
        Ok(secret) => secret,
        Err(_) => {
            eprintln!("JWT_SECRET must be set");
            std::process::exit(1);
        }
    };

    match create_jwt_token(user_id, &secret, chrono::Duration::hours(ttl_hours)) {
        Ok(token) => {
            println!("User ID: {}", user_id);
            println!("Token (valid {}h):", ttl_hours);
            println!("{}", token);
            println!("\nUse it as:");
            println!("curl -H 'Authorization: Bearer {}' http://localhost:3000/projects", token);
        }
        Err(e) => {
            eprintln!("Error creating token: {}", e);
            std::process::exit(1);
        }
    }
}
