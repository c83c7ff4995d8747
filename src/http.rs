//! REST-ish adapter over the IPC router. Every route becomes one IPC request;
//! the session cookie decides who is acting and which client is in scope.

use crate::ipc::{self, AppState, HandlerErr, Request};
use crate::workflow::UserRole;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use tower_cookies::{CookieManagerLayer, Cookies};
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "session";

pub type SharedState = Arc<Mutex<AppState>>;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Access {
    Public,
    Admin,
    Client,
}

type Body = Bytes;
type QueryMap = Query<HashMap<String, String>>;

pub fn status_for_code(code: &str) -> StatusCode {
    match code {
        "bad_params" | "bad_json" | "invalid_state" | "capacity_exceeded" => StatusCode::BAD_REQUEST,
        "not_found" | "not_implemented" => StatusCode::NOT_FOUND,
        "unauthorized" => StatusCode::UNAUTHORIZED,
        "forbidden" => StatusCode::FORBIDDEN,
        "no_workspace" => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// `decision_notes` -> `decisionNotes`; keys already in camelCase pass through.
fn camelize(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper = false;
    for ch in key.chars() {
        if ch == '_' {
            upper = !out.is_empty();
            continue;
        }
        if upper {
            out.extend(ch.to_uppercase());
            upper = false;
        } else {
            out.push(ch);
        }
    }
    out
}

fn camelize_object(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.into_iter().map(|(k, v)| (camelize(&k), v)).collect(),
        ),
        other => other,
    }
}

/// An empty body reads as `{}`; anything else must be a JSON object.
fn body_params(body: Body) -> Result<serde_json::Value, Response> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(json!({}));
    }
    match serde_json::from_slice::<serde_json::Value>(&body) {
        Ok(v) if v.is_object() => Ok(camelize_object(v)),
        Ok(_) => Err(error_response(HandlerErr::new(
            "bad_json",
            "request body must be a JSON object",
        ))),
        Err(e) => {
            tracing::debug!(error = %e, "unparseable request body");
            Err(error_response(HandlerErr::new(
                "bad_json",
                format!("invalid JSON body: {}", e),
            )))
        }
    }
}

fn query_params(query: QueryMap) -> serde_json::Value {
    let map = query
        .0
        .into_iter()
        .map(|(k, v)| {
            let v = match v.as_str() {
                "true" => serde_json::Value::Bool(true),
                "false" => serde_json::Value::Bool(false),
                _ => serde_json::Value::String(v),
            };
            (camelize(&k), v)
        })
        .collect();
    serde_json::Value::Object(map)
}

fn error_response(error: HandlerErr) -> Response {
    let mut body = json!({ "error": error.message, "code": error.code });
    if let Some(d) = error.details {
        body["details"] = d;
    }
    (status_for_code(error.code), Json(body)).into_response()
}

/// Resolves the session for non-public routes and pins the acting identity
/// into `params`, overriding anything the body supplied.
fn authorize(
    state: &AppState,
    access: Access,
    token: Option<&str>,
    params: &mut serde_json::Value,
) -> Result<(), HandlerErr> {
    if access == Access::Public {
        return Ok(());
    }
    let Some(token) = token else {
        return Err(HandlerErr::new("unauthorized", "sign in required"));
    };
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };
    let user = ipc::resolve_session(conn, token)?;
    match (access, user.role) {
        (Access::Admin, UserRole::Admin) => {
            params["actorUserId"] = json!(user.user_id);
        }
        (Access::Client, UserRole::Client) => {
            let Some(client_id) = user.client_id else {
                return Err(HandlerErr::forbidden("no client profile linked"));
            };
            params["clientId"] = json!(client_id);
        }
        _ => return Err(HandlerErr::forbidden("not allowed for this role")),
    }
    Ok(())
}

async fn dispatch(
    state: SharedState,
    cookies: Cookies,
    access: Access,
    method: &'static str,
    mut params: serde_json::Value,
    success: StatusCode,
) -> Response {
    let token = cookies.get(SESSION_COOKIE).map(|c| c.value().to_string());
    let outcome = tokio::task::spawn_blocking(move || {
        let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
        authorize(&guard, access, token.as_deref(), &mut params)?;
        let req = Request {
            id: Uuid::new_v4().to_string(),
            method: method.to_string(),
            params,
        };
        Ok::<_, HandlerErr>(ipc::handle_request(&mut guard, req))
    })
    .await;

    let resp = match outcome {
        Ok(Ok(v)) => v,
        Ok(Err(e)) => {
            tracing::debug!(method, code = e.code, "http request refused");
            return error_response(e);
        }
        Err(e) => {
            tracing::error!(error = %e, method, "handler task failed");
            return error_response(HandlerErr::new("internal", "internal error"));
        }
    };

    if resp.get("ok").and_then(|v| v.as_bool()) == Some(true) {
        let result = resp.get("result").cloned().unwrap_or_else(|| json!({}));
        return (success, Json(result)).into_response();
    }
    let error = resp.get("error").cloned().unwrap_or_else(|| json!({}));
    let code = error
        .get("code")
        .and_then(|v| v.as_str())
        .unwrap_or("internal");
    let status = status_for_code(code);
    let mut body = json!({
        "error": error.get("message").cloned().unwrap_or_else(|| json!("request failed")),
        "code": code,
    });
    if let Some(d) = error.get("details") {
        body["details"] = d.clone();
    }
    tracing::info!(method, status = status.as_u16(), "http request failed");
    (status, Json(body)).into_response()
}

fn with_id(mut params: serde_json::Value, key: &str, id: String) -> serde_json::Value {
    params[key] = json!(id);
    params
}

fn as_patch(id_key: &str, id: String, body: Body) -> Result<serde_json::Value, Response> {
    Ok(json!({ id_key: id, "patch": body_params(body)? }))
}

async fn health(State(state): State<SharedState>, cookies: Cookies) -> Response {
    dispatch(state, cookies, Access::Public, "health", json!({}), StatusCode::OK).await
}

// --- admin: bookings

async fn admin_booking_requests(State(state): State<SharedState>, cookies: Cookies) -> Response {
    dispatch(state, cookies, Access::Admin, "bookings.requests", json!({}), StatusCode::OK).await
}

async fn admin_bookings_list(State(state): State<SharedState>, cookies: Cookies, query: QueryMap) -> Response {
    dispatch(state, cookies, Access::Admin, "bookings.list", query_params(query), StatusCode::OK).await
}

async fn admin_bookings_create(State(state): State<SharedState>, cookies: Cookies, body: Body) -> Result<Response, Response> {
    Ok(dispatch(state, cookies, Access::Admin, "bookings.create", body_params(body)?, StatusCode::CREATED).await)
}

async fn admin_booking_approve(
    State(state): State<SharedState>,
    cookies: Cookies,
    Path(id): Path<String>,
    body: Body,
) -> Result<Response, Response> {
    let params = with_id(body_params(body)?, "bookingId", id);
    Ok(dispatch(state, cookies, Access::Admin, "bookings.approve", params, StatusCode::OK).await)
}

async fn admin_booking_deny(
    State(state): State<SharedState>,
    cookies: Cookies,
    Path(id): Path<String>,
    body: Body,
) -> Result<Response, Response> {
    let params = with_id(body_params(body)?, "bookingId", id);
    Ok(dispatch(state, cookies, Access::Admin, "bookings.deny", params, StatusCode::OK).await)
}

async fn admin_booking_complete(
    State(state): State<SharedState>,
    cookies: Cookies,
    Path(id): Path<String>,
) -> Response {
    let params = json!({ "bookingId": id });
    dispatch(state, cookies, Access::Admin, "bookings.complete", params, StatusCode::OK).await
}

async fn admin_booking_cancel(
    State(state): State<SharedState>,
    cookies: Cookies,
    Path(id): Path<String>,
) -> Response {
    let params = json!({ "bookingId": id });
    dispatch(state, cookies, Access::Admin, "bookings.cancel", params, StatusCode::OK).await
}

// --- admin: slots

async fn admin_slots_list(State(state): State<SharedState>, cookies: Cookies, query: QueryMap) -> Response {
    dispatch(state, cookies, Access::Admin, "slots.list", query_params(query), StatusCode::OK).await
}

async fn admin_slots_create(State(state): State<SharedState>, cookies: Cookies, body: Body) -> Result<Response, Response> {
    Ok(dispatch(state, cookies, Access::Admin, "slots.create", body_params(body)?, StatusCode::CREATED).await)
}

async fn admin_slot_get(State(state): State<SharedState>, cookies: Cookies, Path(id): Path<String>) -> Response {
    dispatch(state, cookies, Access::Admin, "slots.get", json!({ "slotId": id }), StatusCode::OK).await
}

async fn admin_slot_update(
    State(state): State<SharedState>,
    cookies: Cookies,
    Path(id): Path<String>,
    body: Body,
) -> Result<Response, Response> {
    Ok(dispatch(state, cookies, Access::Admin, "slots.update", as_patch("slotId", id, body)?, StatusCode::OK).await)
}

async fn admin_slot_cancel(State(state): State<SharedState>, cookies: Cookies, Path(id): Path<String>) -> Response {
    dispatch(state, cookies, Access::Admin, "slots.cancel", json!({ "slotId": id }), StatusCode::OK).await
}

// --- admin: leave

async fn admin_leave_list(State(state): State<SharedState>, cookies: Cookies, query: QueryMap) -> Response {
    dispatch(state, cookies, Access::Admin, "leave.list", query_params(query), StatusCode::OK).await
}

async fn admin_leave_create(State(state): State<SharedState>, cookies: Cookies, body: Body) -> Result<Response, Response> {
    Ok(dispatch(state, cookies, Access::Admin, "leave.create", body_params(body)?, StatusCode::CREATED).await)
}

async fn admin_leave_update(
    State(state): State<SharedState>,
    cookies: Cookies,
    Path(id): Path<String>,
    body: Body,
) -> Result<Response, Response> {
    Ok(dispatch(state, cookies, Access::Admin, "leave.update", as_patch("leaveId", id, body)?, StatusCode::OK).await)
}

async fn admin_leave_delete(State(state): State<SharedState>, cookies: Cookies, Path(id): Path<String>) -> Response {
    dispatch(state, cookies, Access::Admin, "leave.delete", json!({ "leaveId": id }), StatusCode::OK).await
}

// --- admin: walkers, clients, pets

async fn admin_walkers_list(State(state): State<SharedState>, cookies: Cookies) -> Response {
    dispatch(state, cookies, Access::Admin, "walkers.list", json!({}), StatusCode::OK).await
}

async fn admin_walkers_create(State(state): State<SharedState>, cookies: Cookies, body: Body) -> Result<Response, Response> {
    Ok(dispatch(state, cookies, Access::Admin, "walkers.create", body_params(body)?, StatusCode::CREATED).await)
}

async fn admin_walker_update(
    State(state): State<SharedState>,
    cookies: Cookies,
    Path(id): Path<String>,
    body: Body,
) -> Result<Response, Response> {
    Ok(dispatch(state, cookies, Access::Admin, "walkers.update", as_patch("walkerId", id, body)?, StatusCode::OK).await)
}

async fn admin_clients_list(State(state): State<SharedState>, cookies: Cookies) -> Response {
    dispatch(state, cookies, Access::Admin, "clients.list", json!({}), StatusCode::OK).await
}

async fn admin_clients_create(State(state): State<SharedState>, cookies: Cookies, body: Body) -> Result<Response, Response> {
    Ok(dispatch(state, cookies, Access::Admin, "clients.create", body_params(body)?, StatusCode::CREATED).await)
}

async fn admin_client_get(State(state): State<SharedState>, cookies: Cookies, Path(id): Path<String>) -> Response {
    dispatch(state, cookies, Access::Admin, "clients.get", json!({ "clientId": id }), StatusCode::OK).await
}

async fn admin_client_update(
    State(state): State<SharedState>,
    cookies: Cookies,
    Path(id): Path<String>,
    body: Body,
) -> Result<Response, Response> {
    Ok(dispatch(state, cookies, Access::Admin, "clients.update", as_patch("clientId", id, body)?, StatusCode::OK).await)
}

async fn admin_client_delete(State(state): State<SharedState>, cookies: Cookies, Path(id): Path<String>) -> Response {
    dispatch(state, cookies, Access::Admin, "clients.delete", json!({ "clientId": id }), StatusCode::OK).await
}

async fn admin_pets_list(State(state): State<SharedState>, cookies: Cookies, query: QueryMap) -> Response {
    dispatch(state, cookies, Access::Admin, "pets.list", query_params(query), StatusCode::OK).await
}

async fn admin_pets_create(State(state): State<SharedState>, cookies: Cookies, body: Body) -> Result<Response, Response> {
    Ok(dispatch(state, cookies, Access::Admin, "pets.create", body_params(body)?, StatusCode::CREATED).await)
}

async fn admin_pet_update(
    State(state): State<SharedState>,
    cookies: Cookies,
    Path(id): Path<String>,
    body: Body,
) -> Result<Response, Response> {
    Ok(dispatch(state, cookies, Access::Admin, "pets.update", as_patch("petId", id, body)?, StatusCode::OK).await)
}

async fn admin_pet_delete(State(state): State<SharedState>, cookies: Cookies, Path(id): Path<String>) -> Response {
    dispatch(state, cookies, Access::Admin, "pets.delete", json!({ "petId": id }), StatusCode::OK).await
}

// --- client portal

async fn me_slots(State(state): State<SharedState>, cookies: Cookies, query: QueryMap) -> Response {
    let mut params = query_params(query);
    params["bookableOnly"] = json!(true);
    dispatch(state, cookies, Access::Client, "slots.list", params, StatusCode::OK).await
}

async fn me_bookings_list(State(state): State<SharedState>, cookies: Cookies, query: QueryMap) -> Response {
    dispatch(state, cookies, Access::Client, "bookings.list", query_params(query), StatusCode::OK).await
}

async fn me_bookings_request(State(state): State<SharedState>, cookies: Cookies, body: Body) -> Result<Response, Response> {
    Ok(dispatch(state, cookies, Access::Client, "bookings.request", body_params(body)?, StatusCode::CREATED).await)
}

async fn me_booking_get(State(state): State<SharedState>, cookies: Cookies, Path(id): Path<String>) -> Response {
    dispatch(state, cookies, Access::Client, "bookings.get", json!({ "bookingId": id }), StatusCode::OK).await
}

async fn me_booking_cancel(State(state): State<SharedState>, cookies: Cookies, Path(id): Path<String>) -> Response {
    dispatch(state, cookies, Access::Client, "bookings.cancel", json!({ "bookingId": id }), StatusCode::OK).await
}

async fn me_pets(State(state): State<SharedState>, cookies: Cookies) -> Response {
    dispatch(state, cookies, Access::Client, "pets.list", json!({}), StatusCode::OK).await
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/admin/bookings/requests", get(admin_booking_requests))
        .route("/api/admin/bookings", get(admin_bookings_list).post(admin_bookings_create))
        .route("/api/admin/bookings/:id/approve", put(admin_booking_approve))
        .route("/api/admin/bookings/:id/deny", put(admin_booking_deny))
        .route("/api/admin/bookings/:id/complete", put(admin_booking_complete))
        .route("/api/admin/bookings/:id/cancel", put(admin_booking_cancel))
        .route("/api/admin/slots", get(admin_slots_list).post(admin_slots_create))
        .route("/api/admin/slots/:id", get(admin_slot_get).put(admin_slot_update))
        .route("/api/admin/slots/:id/cancel", put(admin_slot_cancel))
        .route("/api/admin/leave", get(admin_leave_list).post(admin_leave_create))
        .route("/api/admin/leave/:id", put(admin_leave_update).delete(admin_leave_delete))
        .route("/api/admin/walkers", get(admin_walkers_list).post(admin_walkers_create))
        .route("/api/admin/walkers/:id", put(admin_walker_update))
        .route("/api/admin/clients", get(admin_clients_list).post(admin_clients_create))
        .route(
            "/api/client/:id",
            get(admin_client_get).put(admin_client_update).delete(admin_client_delete),
        )
        .route("/api/admin/pets", get(admin_pets_list).post(admin_pets_create))
        .route("/api/admin/pets/:id", put(admin_pet_update).delete(admin_pet_delete))
        .route("/api/me/slots", get(me_slots))
        .route("/api/me/bookings", get(me_bookings_list).post(me_bookings_request))
        .route("/api/me/bookings/:id", get(me_booking_get))
        .route("/api/me/bookings/:id/cancel", put(me_booking_cancel))
        .route("/api/me/pets", get(me_pets))
        .layer(CookieManagerLayer::new())
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: SharedState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "http listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body as HttpBody;
    use axum::http::{header, Method, Request as HttpRequest};
    use http_body_util::BodyExt;
    use std::time::{SystemTime, UNIX_EPOCH};
    use tower::ServiceExt;

    struct Fixture {
        state: SharedState,
        admin_token: String,
        client_token: String,
        slot_id: String,
        pet_id: String,
    }

    fn call(state: &mut AppState, method: &str, params: serde_json::Value) -> serde_json::Value {
        let resp = ipc::handle_request(
            state,
            Request {
                id: "t".to_string(),
                method: method.to_string(),
                params,
            },
        );
        assert_eq!(resp["ok"], json!(true), "{} failed: {}", method, resp);
        resp["result"].clone()
    }

    fn fixture() -> Fixture {
        let dir = std::env::temp_dir().join(format!(
            "walkbook-http-{}-{}",
            std::process::id(),
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        let mut state = AppState::new(24);
        ipc::select_workspace(&mut state, dir).expect("open workspace");

        let admin = call(
            &mut state,
            "users.create",
            json!({ "email": "admin@example.com", "displayName": "Admin", "role": "admin" }),
        );
        let client = call(&mut state, "clients.create", json!({ "name": "Dana" }));
        let client_id = client["clientId"].as_str().expect("clientId").to_string();
        let client_user = call(
            &mut state,
            "users.create",
            json!({
                "email": "dana@example.com",
                "displayName": "Dana",
                "role": "client",
                "clientId": client_id,
            }),
        );
        let pet = call(
            &mut state,
            "pets.create",
            json!({ "clientId": client_id, "name": "Biscuit" }),
        );
        let slot = call(
            &mut state,
            "slots.create",
            json!({
                "startsAt": "2030-05-01T09:00:00Z",
                "endsAt": "2030-05-01T10:00:00Z",
                "capacityDogs": 3,
            }),
        );
        let admin_token = call(&mut state, "sessions.create", json!({ "userId": admin["userId"] }))
            ["token"]
            .as_str()
            .expect("token")
            .to_string();
        let client_token = call(
            &mut state,
            "sessions.create",
            json!({ "userId": client_user["userId"] }),
        )["token"]
            .as_str()
            .expect("token")
            .to_string();

        Fixture {
            state: Arc::new(Mutex::new(state)),
            admin_token,
            client_token,
            slot_id: slot["slotId"].as_str().expect("slotId").to_string(),
            pet_id: pet["petId"].as_str().expect("petId").to_string(),
        }
    }

    async fn send(
        state: &SharedState,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        send_raw(state, method, uri, token, body.map(|b| b.to_string())).await
    }

    async fn send_raw(
        state: &SharedState,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<String>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = HttpRequest::builder().method(method).uri(uri);
        if let Some(t) = token {
            builder = builder.header(header::COOKIE, format!("{}={}", SESSION_COOKIE, t));
        }
        let req = match body {
            Some(b) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(HttpBody::from(b)),
            None => builder.body(HttpBody::empty()),
        }
        .expect("build request");
        let resp = router(state.clone()).oneshot(req).await.expect("response");
        let status = resp.status();
        let bytes = resp
            .into_body()
            .collect()
            .await
            .expect("read body")
            .to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    async fn request_booking(f: &Fixture) -> String {
        let (status, body) = send(
            &f.state,
            Method::POST,
            "/api/me/bookings",
            Some(&f.client_token),
            Some(json!({ "slot_id": f.slot_id, "pet_ids": [f.pet_id] })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        assert_eq!(body["booking"]["status"], json!("PENDING_APPROVAL"));
        body["bookingId"].as_str().expect("bookingId").to_string()
    }

    #[test]
    fn camelize_handles_snake_and_camel_keys() {
        assert_eq!(camelize("decision_notes"), "decisionNotes");
        assert_eq!(camelize("pet_ids"), "petIds");
        assert_eq!(camelize("slotId"), "slotId");
        assert_eq!(camelize("_private"), "private");
    }

    #[test]
    fn error_codes_map_to_http_statuses() {
        assert_eq!(status_for_code("invalid_state"), StatusCode::BAD_REQUEST);
        assert_eq!(status_for_code("capacity_exceeded"), StatusCode::BAD_REQUEST);
        assert_eq!(status_for_code("not_found"), StatusCode::NOT_FOUND);
        assert_eq!(status_for_code("unauthorized"), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for_code("forbidden"), StatusCode::FORBIDDEN);
        assert_eq!(status_for_code("db_update_failed"), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn admin_routes_require_a_session() {
        let f = fixture();
        let (status, body) = send(&f.state, Method::GET, "/api/admin/bookings/requests", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].is_string());

        let (status, _) = send(
            &f.state,
            Method::GET,
            "/api/admin/bookings/requests",
            Some("not-a-real-token"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn client_session_cannot_approve() {
        let f = fixture();
        let booking_id = request_booking(&f).await;
        let (status, _) = send(
            &f.state,
            Method::PUT,
            &format!("/api/admin/bookings/{}/approve", booking_id),
            Some(&f.client_token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn approve_flow_over_http() {
        let f = fixture();
        let booking_id = request_booking(&f).await;

        let (status, body) = send(
            &f.state,
            Method::GET,
            "/api/admin/bookings/requests",
            Some(&f.admin_token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["requests"].as_array().map(|a| a.len()), Some(1));

        let (status, body) = send(
            &f.state,
            Method::PUT,
            &format!("/api/admin/bookings/{}/approve", booking_id),
            Some(&f.admin_token),
            Some(json!({ "decision_notes": "see you then" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["booking"]["status"], json!("APPROVED"));
        assert_eq!(body["booking"]["legacyStatus"], json!("scheduled"));
        assert_eq!(body["booking"]["decisionNotes"], json!("see you then"));

        let (status, body) = send(
            &f.state,
            Method::PUT,
            &format!("/api/admin/bookings/{}/deny", booking_id),
            Some(&f.admin_token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], json!("invalid_state"));

        let (status, _) = send(
            &f.state,
            Method::PUT,
            "/api/admin/bookings/does-not-exist/approve",
            Some(&f.admin_token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn client_scope_comes_from_the_session() {
        let f = fixture();
        let booking_id = request_booking(&f).await;

        let (status, body) = send(
            &f.state,
            Method::GET,
            "/api/me/bookings?client_id=someone-else",
            Some(&f.client_token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["bookings"].as_array().map(|a| a.len()), Some(1));

        let (status, body) = send(
            &f.state,
            Method::PUT,
            &format!("/api/me/bookings/{}/cancel", booking_id),
            Some(&f.client_token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["booking"]["status"], json!("CANCELLED"));
    }

    #[tokio::test]
    async fn leave_dates_are_validated() {
        let f = fixture();
        let (_, walker) = send(
            &f.state,
            Method::POST,
            "/api/admin/walkers",
            Some(&f.admin_token),
            Some(json!({ "name": "Sam" })),
        )
        .await;
        let walker_id = walker["walkerId"].as_str().expect("walkerId").to_string();

        let (status, body) = send(
            &f.state,
            Method::POST,
            "/api/admin/leave",
            Some(&f.admin_token),
            Some(json!({
                "walker_id": walker_id,
                "start_date": "2024-06-10",
                "end_date": "2024-06-05",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], json!("end_date must be on or after start_date"));

        let (status, body) = send(
            &f.state,
            Method::POST,
            "/api/admin/leave",
            Some(&f.admin_token),
            Some(json!({
                "walker_id": walker_id,
                "start_date": "2024-06-10",
                "end_date": "2024-06-10",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        assert_eq!(body["leave"]["startDate"], json!("2024-06-10"));
    }

    #[tokio::test]
    async fn garbled_bodies_are_rejected_before_dispatch() {
        let f = fixture();
        let booking_id = request_booking(&f).await;
        let approve = format!("/api/admin/bookings/{}/approve", booking_id);

        let (status, body) = send_raw(
            &f.state,
            Method::PUT,
            &approve,
            Some(&f.admin_token),
            Some("{not json".to_string()),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
        assert_eq!(body["code"], json!("bad_json"));

        let (status, body) = send_raw(
            &f.state,
            Method::PUT,
            &approve,
            Some(&f.admin_token),
            Some("[1]".to_string()),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
        assert_eq!(body["code"], json!("bad_json"));

        let (status, body) = send(
            &f.state,
            Method::GET,
            &format!("/api/me/bookings/{}", booking_id),
            Some(&f.client_token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["booking"]["status"], json!("PENDING_APPROVAL"));

        // Whitespace-only reads as an empty object.
        let (status, body) = send_raw(
            &f.state,
            Method::PUT,
            &approve,
            Some(&f.admin_token),
            Some("  \n".to_string()),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["booking"]["status"], json!("APPROVED"));
    }
}
