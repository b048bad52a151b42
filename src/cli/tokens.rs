use console::style;
use rand::Rng;
use rand::distributions::Alphanumeric;

use crate::core::terminal::{GuideSection, print_success};
use crate::interfaces::web::auth::hash_token;

const TOKEN_PREFIX: &str = "solo_";
const TOKEN_LEN: usize = 32;

fn generate_raw_token() -> String {
    let body: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect();
    format!("{}{}", TOKEN_PREFIX, body)
}

/// Print a fresh bearer token and the hash that goes into `solo.toml`.
/// The raw token is never stored anywhere.
pub fn run_token_command() {
    let raw = generate_raw_token();
    let hash = hash_token(&raw);

    print_success("Generated a new API token.");
    println!();
    GuideSection::new("API Token")
        .status("Token", &style(&raw).bold().green().to_string())
        .status("SHA-256", &hash)
        .blank()
        .text("Add the hash to solo.toml:")
        .text("  [server]")
        .text(&format!("  token_hashes = [\"{}\"]", hash))
        .blank()
        .text("Send the token as 'Authorization: Bearer <token>'. It is shown only once.")
        .print();
    println!();
}
