pub mod chats;
pub mod sessions;
pub mod wsroute;

use crate::metrics::metrics_handler;
use actix_web::{web, HttpResponse};

async fn health() -> HttpResponse {
    HttpResponse::Ok().body("OK")
}

/// Every route of the service; shared by `main` and the route tests
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(chats::list_conversations)
        .service(chats::send_message)
        .service(chats::leave_conversation)
        .service(chats::mark_message_read)
        .service(chats::get_conversation)
        .service(sessions::logout)
        .service(sessions::issue_session)
        .service(wsroute::ws_handler)
        .route("/health", web::get().to(health))
        .route("/metrics", web::get().to(metrics_handler));
}
