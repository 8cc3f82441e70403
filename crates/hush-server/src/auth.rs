use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

/// Token claims accepted at the WebSocket upgrade. `sub` is the user id the
/// connection is registered under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

/// Validate a token and return the user id it was issued to.
pub fn authenticate(token: &str, secret: &str) -> Option<String> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()?;

    let sub = token_data.claims.sub;
    if sub.is_empty() { None } else { Some(sub) }
}
