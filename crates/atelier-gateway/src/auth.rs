//! Bearer-token auth: resolves the caller to a username. `mode = "none"`
//! treats every caller as anonymous; token mode maps configured tokens to
//! usernames and rejects everything else.

use axum::http::HeaderMap;

use atelier_core::config::AuthMode;

use crate::app::AppState;

/// `Ok(None)` = anonymous caller, `Ok(Some(user))` = authenticated,
/// `Err(())` = rejected.
pub fn resolve_username(state: &AppState, headers: &HeaderMap) -> Result<Option<String>, ()> {
    match state.config.gateway.auth.mode {
        AuthMode::None => Ok(None),
        AuthMode::Token => {
            let Some(token) = extract_bearer(headers) else {
                return Err(());
            };
            state
                .config
                .gateway
                .auth
                .tokens
                .iter()
                .find(|entry| entry.token == token)
                .map(|entry| Some(entry.username.clone()))
                .ok_or(())
        }
    }
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}
