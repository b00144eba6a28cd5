//! Router assembly: public, optionally-authenticated, authenticated and
//! admin route groups, each under a request deadline. Routes that stream
//! request bodies (uploads, archive builds) get a longer budget; the
//! websocket feed is the one long-lived exception.

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers::{
    annotations, drives, file_shares, files, notifications, share_access, shares, trash, upload,
    ws, zip_download,
};
use crate::infra::app_state::AppState;
use crate::infra::middleware::{request_deadline, upload_deadline};
use crate::users::auth::middleware::{admin_middleware, auth_middleware, optional_auth_middleware};
use crate::users::{admin_handlers, auth};

pub fn build_router(state: AppState) -> Router {
    // Long-lived by design; no request deadline.
    let feed = Router::new().route("/api/ws", get(ws::websocket_handler));

    let public = Router::new()
        .route("/api/auth/login", post(auth::handlers::login))
        .route("/api/auth/login/totp", post(auth::handlers::login_totp))
        .layer(middleware::from_fn(request_deadline));

    // Share links and root listing carry their own gates; a bearer token is
    // honoured when present.
    let optional = Router::new()
        .route("/s/{token}", get(share_access::download))
        .route("/e/{token}", post(share_access::edit_callback))
        .route("/api/files", get(files::list))
        .layer(middleware::from_fn(request_deadline))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            optional_auth_middleware,
        ));

    let share_upload = Router::new()
        .route("/u/{token}", post(share_access::upload))
        .layer(middleware::from_fn(upload_deadline))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            optional_auth_middleware,
        ));

    let protected = Router::new()
        .route("/api/auth/logout", post(auth::handlers::logout))
        .route("/api/auth/me", get(auth::handlers::me))
        .route("/api/auth/totp/setup", post(auth::handlers::totp_setup))
        .route("/api/auth/totp/enable", post(auth::handlers::totp_enable))
        .route("/api/auth/totp/disable", post(auth::handlers::totp_disable))
        .route(
            "/api/files/rename/{*path}",
            put(files::rename),
        )
        .route("/api/files/move/{*path}", put(files::relocate))
        .route("/api/files/copy/{*path}", post(files::duplicate))
        .route(
            "/api/files/{*path}",
            get(files::download)
                .put(files::overwrite)
                .delete(files::delete),
        )
        .route("/api/folders", post(files::create_folder))
        .route("/api/folders/{*path}", delete(files::delete_folder))
        .route("/api/trash", get(trash::list).delete(trash::empty))
        .route("/api/trash/stats", get(trash::stats))
        .route("/api/trash/restore/{id}", post(trash::restore))
        .route("/api/trash/{id}", delete(trash::delete))
        .route("/api/shares", get(shares::list).post(shares::create))
        .route(
            "/api/shares/{id}",
            put(shares::update).delete(shares::delete),
        )
        .route("/api/shares/{id}/revoke", post(shares::revoke))
        .route(
            "/api/file-shares",
            get(file_shares::list_owned).post(file_shares::create),
        )
        .route("/api/file-shares/received", get(file_shares::list_received))
        .route("/api/file-shares/{id}", delete(file_shares::delete))
        .route("/api/drives", get(drives::list))
        .route(
            "/api/meta/{*path}",
            get(annotations::get)
                .put(annotations::set)
                .delete(annotations::delete),
        )
        .route("/api/starred", get(annotations::list_starred))
        .route(
            "/api/starred/{*path}",
            put(annotations::star).delete(annotations::unstar),
        )
        .route(
            "/api/notifications",
            get(notifications::list),
        )
        .route("/api/notifications/count", get(notifications::unread_count))
        .route(
            "/api/notifications/{id}/read",
            post(notifications::mark_read),
        )
        .route(
            "/api/notifications/read-all",
            post(notifications::mark_all_read),
        )
        .route("/api/stats", get(files::stats))
        .layer(middleware::from_fn(request_deadline))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    // Body-streaming routes: same auth, longer deadline.
    let uploads = Router::new()
        .route("/api/upload", post(upload::create))
        .route("/api/upload/simple", post(upload::simple))
        // `get` also answers HEAD, which is the canonical offset probe.
        .route(
            "/api/upload/{id}",
            get(upload::head)
                .patch(upload::append)
                .delete(upload::terminate),
        )
        .route("/api/download/zip", post(zip_download::download_zip))
        .layer(middleware::from_fn(upload_deadline))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let admin = Router::new()
        .route(
            "/api/admin/users",
            get(admin_handlers::list_users).post(admin_handlers::create_user),
        )
        .route(
            "/api/admin/users/{id}",
            put(admin_handlers::update_user).delete(admin_handlers::delete_user),
        )
        .route(
            "/api/admin/users/{id}/password",
            put(admin_handlers::set_user_password),
        )
        .route(
            "/api/admin/users/{id}/smb-password",
            put(admin_handlers::set_user_smb_password),
        )
        .route(
            "/api/admin/users/{id}/unlock",
            post(admin_handlers::unlock_user),
        )
        .route(
            "/api/admin/settings",
            get(admin_handlers::get_settings).put(admin_handlers::update_settings),
        )
        .route("/api/audit/logs", get(admin_handlers::query_audit))
        .route("/api/admin/smb/flush", post(admin_handlers::flush_smb_log))
        .route("/api/admin/drives", post(drives::create))
        .route(
            "/api/admin/drives/{id}",
            put(drives::update).delete(drives::delete),
        )
        .route(
            "/api/admin/drives/{id}/members",
            get(drives::list_members).post(drives::add_member),
        )
        .route(
            "/api/admin/drives/{id}/members/{user_id}",
            delete(drives::remove_member),
        )
        .layer(middleware::from_fn(request_deadline))
        .layer(middleware::from_fn(admin_middleware))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .merge(feed)
        .merge(public)
        .merge(optional)
        .merge(share_upload)
        .merge(protected)
        .merge(uploads)
        .merge(admin)
        // Body size policy is quota- and settings-driven, not a framework
        // constant.
        .layer(axum::extract::DefaultBodyLimit::disable())
        .layer(cors_layer(&state))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(state: &AppState) -> CorsLayer {
    let origins = &state.config.cors_allowed_origins;
    if origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let parsed: Vec<_> = origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(parsed))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
