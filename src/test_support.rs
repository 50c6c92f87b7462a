//! Shared fixtures for unit tests.

use crate::db::{TickData, User, UserRole};
use crate::store::Store;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// In-memory store with a small tick history.
pub fn store() -> Arc<Store> {
    Arc::new(Store::new(None, 100))
}

/// A trader with the given username.
pub fn user(username: &str) -> User {
    let now = Utc::now();
    User {
        id: Uuid::new_v4(),
        username: username.to_string(),
        email: format!("{username}@example.com"),
        hashed_password: crate::auth::hash_password("password123"),
        phone: None,
        role: UserRole::Trader,
        is_active: true,
        failed_login_attempts: 0,
        locked_until: None,
        last_login_at: None,
        session_token_hash: None,
        session_expires_at: None,
        api_key_hash: None,
        api_key_expires_at: None,
        max_daily_loss: Decimal::ZERO,
        max_position_size: Decimal::ZERO,
        created_at: now,
        updated_at: now,
    }
}

/// A tick at `ltp` with a 0.05 spread.
pub fn tick(symbol: &str, ltp: f64) -> TickData {
    TickData {
        symbol: symbol.to_string(),
        ltp,
        bid: ltp - 0.05,
        ask: ltp + 0.05,
        volume: 10,
        change: 0.0,
        change_pct: 0.0,
        timestamp_ms: Utc::now().timestamp_millis() as u64,
    }
}

/// Application state without a database.
pub fn app_state() -> Arc<crate::state::AppState> {
    Arc::new(crate::state::AppState::default())
}

/// Stores a trader in the state and returns it.
pub async fn trader(state: &crate::state::AppState, username: &str) -> User {
    let user = user(username);
    state.store.save_user(user.clone()).await.unwrap();
    user
}

/// Stores an admin in the state and returns it.
pub async fn admin(state: &crate::state::AppState, username: &str) -> User {
    let mut user = user(username);
    user.role = UserRole::Admin;
    state.store.save_user(user.clone()).await.unwrap();
    user
}
