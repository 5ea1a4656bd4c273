// src/routes.rs

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{delete, get, post, put},
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{admin, faculty, proctoring, student},
    realtime::ws,
    state::AppState,
    utils::jwt::{admin_middleware, auth_middleware, faculty_middleware, student_middleware},
};

/// Assembles the main application router.
///
/// * Student, faculty and admin sub-routers each sit behind `auth_middleware`
///   followed by their role check.
/// * The WebSocket endpoint authenticates through its `token` query parameter.
/// * Applies global middleware (Trace, CORS).
pub fn create_router(state: AppState) -> Router {
    let origins: Vec<HeaderValue> = state
        .config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let auth = middleware::from_fn_with_state(state.clone(), auth_middleware);

    let proctoring_routes = Router::new()
        .route("/start/{exam_id}", post(proctoring::start_exam))
        .route("/session/{session_id}/questions", get(proctoring::get_questions))
        .route("/answer/{session_id}", post(proctoring::submit_answer))
        .route("/submit/{session_id}", post(proctoring::submit_exam))
        .route("/violation/{session_id}", post(proctoring::log_violation))
        .route("/results/{session_id}", get(proctoring::get_results))
        .layer(middleware::from_fn(student_middleware))
        // Ownership is checked inside: student owner, exam author or admin.
        .merge(Router::new().route("/violations/{session_id}", get(proctoring::get_violations)))
        .layer(auth.clone());

    let student_routes = Router::new()
        .route("/exams", get(student::available_exams))
        .route("/history", get(student::exam_history))
        .layer(middleware::from_fn(student_middleware))
        .layer(auth.clone());

    let faculty_routes = Router::new()
        .route("/exams", post(faculty::create_exam).get(faculty::list_exams))
        .route(
            "/exams/{id}",
            get(faculty::get_exam).delete(faculty::delete_exam),
        )
        .route("/exams/{id}/toggle", put(faculty::toggle_exam))
        .route("/exams/{id}/sessions", get(faculty::exam_sessions))
        .route("/sessions/{id}", get(faculty::session_report))
        .route("/sessions/{id}/terminate", post(faculty::terminate_session))
        // Auth first, then the role check
        .layer(middleware::from_fn(faculty_middleware))
        .layer(auth.clone());

    let admin_routes = Router::new()
        .route("/sessions/{id}", delete(admin::delete_session))
        .layer(middleware::from_fn(admin_middleware))
        .layer(auth);

    Router::new()
        .nest("/api/proctoring", proctoring_routes)
        .nest("/api/student", student_routes)
        .nest("/api/faculty", faculty_routes)
        .nest("/api/admin", admin_routes)
        .route("/api/ws", get(ws::ws_handler))
        // Global Middleware (applied from outside in)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
