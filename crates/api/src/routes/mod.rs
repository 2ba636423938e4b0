use axum::{
    middleware::{from_fn, from_fn_with_state},
    Router,
};

use crate::middleware::{admin::admin_auth, request_id::request_id};
use crate::state::AppState;

pub mod checkout;
pub mod downloads;
pub mod fulfillment;
pub mod health;

pub fn app(state: AppState) -> Router {
    let admin = fulfillment::router(state.clone())
        .layer(from_fn_with_state(state.clone(), admin_auth));

    Router::new()
        .merge(health::router(state.clone()))
        .merge(checkout::router(state.clone()))
        .merge(downloads::router(state))
        .merge(admin)
        .layer(from_fn(request_id))
}
