pub mod chat;

use axum::routing::post;
use axum::Router;

use crate::state::AppState;

/// Build the API router. No public/protected split: there's no auth layer
/// here, unlike a full product gateway's bearer-token middleware.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/chat", post(chat::chat))
        .route("/chat/stream", post(chat::chat_stream))
        .route("/chat/close", post(chat::chat_close))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
