pub mod streams;

use axum::Router;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    streams::router()
}
