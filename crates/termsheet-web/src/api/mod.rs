mod emails;
mod health;
mod termsheets;
mod upload;

use axum::Router;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/upload", upload::router())
        .nest("/emails", emails::router())
        .nest("/termsheets", termsheets::router())
        .nest("/health", health::router())
}
