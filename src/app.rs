use std::{collections::HashMap, env, sync::Arc};

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::CorsLayer;

use crate::{
    dispatch, menu,
    session::{SessionRegistry, IDLE_WINDOW},
    store,
    types::{AppState, InboundEvent, InboundMessage, SaveRecommendationBody, UserRecord},
};

fn resolve_database_url() -> String {
    if let Ok(url) = env::var("DATABASE_URL") {
        if !url.trim().is_empty() {
            return url;
        }
    }
    let host = env::var("POSTGRES_HOST")
        .or_else(|_| env::var("PGHOST"))
        .unwrap_or_else(|_| "localhost".to_string());
    let port = env::var("POSTGRES_PORT")
        .or_else(|_| env::var("PGPORT"))
        .unwrap_or_else(|_| "5432".to_string());
    let user = env::var("POSTGRES_USER")
        .or_else(|_| env::var("PGUSER"))
        .unwrap_or_else(|_| "postgres".to_string());
    let password = env::var("POSTGRES_PASSWORD")
        .or_else(|_| env::var("PGPASSWORD"))
        .unwrap_or_else(|_| "postgres".to_string());
    let db = env::var("POSTGRES_DB")
        .or_else(|_| env::var("PGDATABASE"))
        .unwrap_or_else(|_| "asesoria_bot".to_string());
    format!("postgres://{user}:{password}@{host}:{port}/{db}")
}

/// An unset app secret disables the check; otherwise the body must carry a
/// matching `sha256=` HMAC in the signature header.
fn verify_webhook_signature(
    app_secret: &str,
    signature_header: Option<&str>,
    body: &[u8],
) -> bool {
    if app_secret.is_empty() {
        return true;
    }
    let signature = signature_header.unwrap_or("").trim();
    let signature = signature
        .strip_prefix("sha256=")
        .unwrap_or(signature)
        .trim();
    if signature.is_empty() {
        return false;
    }
    let Ok(signature_bytes) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(app_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&signature_bytes).is_ok()
}

/// Profile names from the envelope's `contacts` block, keyed by normalized
/// phone. Only genuine message events carry this block.
fn contact_profile_names(value: &Value) -> HashMap<String, String> {
    let contacts = value
        .get("contacts")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut map = HashMap::new();
    for contact in contacts {
        let wa_id = contact
            .get("wa_id")
            .and_then(Value::as_str)
            .or_else(|| contact.get("input").and_then(Value::as_str))
            .unwrap_or("");
        let digits = store::normalize_phone(wa_id);
        if digits.is_empty() {
            continue;
        }
        let name = contact
            .get("profile")
            .and_then(|p| p.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim()
            .to_string();
        map.insert(digits, name);
    }
    map
}

fn parse_inbound_event(message: &Value) -> Option<InboundEvent> {
    let msg_type = message
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_ascii_lowercase();

    if msg_type == "text" {
        let body = message
            .get("text")
            .and_then(|t| t.get("body"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim()
            .to_string();
        return if body.is_empty() {
            None
        } else {
            Some(InboundEvent::Text { body })
        };
    }

    if msg_type == "interactive" {
        let interactive = message.get("interactive")?;
        let reply = interactive
            .get("list_reply")
            .or_else(|| interactive.get("button_reply"))?;
        let id = reply
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim()
            .to_string();
        let title = reply
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim()
            .to_string();
        return if id.is_empty() {
            None
        } else {
            Some(InboundEvent::MenuSelection { id, title })
        };
    }

    None
}

/// Walks `entry[].changes[].value.messages[]` tolerating absence at every
/// level. Messages for a foreign phone-number id are skipped.
fn parse_webhook_events(payload: &Value, expected_phone_number_id: &str) -> Vec<InboundMessage> {
    let mut events = Vec::new();
    if payload.get("object").and_then(Value::as_str).is_none() {
        return events;
    }
    let entries = payload
        .get("entry")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for entry in entries {
        let changes = entry
            .get("changes")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for change in changes {
            let value = change.get("value").cloned().unwrap_or_else(|| json!({}));
            let metadata_phone_id = value
                .get("metadata")
                .and_then(|m| m.get("phone_number_id"))
                .and_then(Value::as_str)
                .unwrap_or("");
            if !expected_phone_number_id.is_empty()
                && !metadata_phone_id.is_empty()
                && expected_phone_number_id != metadata_phone_id
            {
                continue;
            }
            let profile_names = contact_profile_names(&value);
            let messages = value
                .get("messages")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for message in messages {
                let from = message
                    .get("from")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();
                let digits = store::normalize_phone(&from);
                if digits.is_empty() {
                    continue;
                }
                let Some(event) = parse_inbound_event(&message) else {
                    continue;
                };
                let profile_name = profile_names.get(&digits).cloned().unwrap_or_default();
                events.push(InboundMessage {
                    from,
                    profile_name,
                    event,
                });
            }
        }
    }
    events
}

async fn root() -> impl IntoResponse {
    (StatusCode::OK, "¡El bot de WhatsApp está activo y escuchando!")
}

async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn webhook_verify(
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let mode = params.get("hub.mode").cloned().unwrap_or_default();
    let verify_token = params.get("hub.verify_token").cloned().unwrap_or_default();
    let challenge = params.get("hub.challenge").cloned().unwrap_or_default();

    if mode == "subscribe"
        && !challenge.is_empty()
        && !state.verify_token.is_empty()
        && verify_token == state.verify_token
    {
        println!("[webhook] verification handshake accepted");
        return (StatusCode::OK, challenge).into_response();
    }

    (
        StatusCode::FORBIDDEN,
        Json(json!({ "error": "invalid webhook verification token" })),
    )
        .into_response()
}

async fn webhook_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let signature_header = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok());
    if !verify_webhook_signature(&state.app_secret, signature_header, &body) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid webhook signature" })),
        )
            .into_response();
    }

    let payload = serde_json::from_slice::<Value>(&body).unwrap_or_else(|_| json!({}));
    let events = parse_webhook_events(&payload, &state.phone_number_id);
    if events.is_empty() {
        // verification pings, delivery receipts, foreign payloads
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "unsupported webhook payload" })),
        )
            .into_response();
    }

    let mut processed = 0usize;
    for inbound in events {
        if process_inbound(&state, inbound).await {
            processed += 1;
        }
    }

    (
        StatusCode::OK,
        Json(json!({ "received": true, "processed": processed })),
    )
        .into_response()
}

async fn process_inbound(state: &Arc<AppState>, inbound: InboundMessage) -> bool {
    let account_key = store::normalize_phone(&inbound.from);
    if account_key.is_empty() {
        return false;
    }

    // Cancel-then-rearm is the serialization point against the idle timer;
    // it must happen before anything state-visible for this account.
    let was_active = state
        .sessions
        .touch(&account_key, {
            let state = Arc::clone(state);
            let to_phone = inbound.from.clone();
            let key = account_key.clone();
            async move {
                eprintln!("[session] idle window elapsed for {key}");
                dispatch::deliver(&state, &to_phone, &key, &menu::idle_farewell()).await;
            }
        })
        .await;

    // Free text may be first contact, so the record is created atomically;
    // a menu selection always follows an earlier message, so a plain lookup
    // picks up the latest recommendation state.
    let user = match &inbound.event {
        InboundEvent::Text { .. } => {
            store::get_or_create(&state.db, &inbound.from, &inbound.profile_name).await
        }
        InboundEvent::MenuSelection { .. } => store::find_latest(&state.db, &inbound.from).await,
    }
    .unwrap_or_else(|| UserRecord::detached(&account_key, &inbound.profile_name));

    let inbound_summary = match &inbound.event {
        InboundEvent::Text { body } => body.clone(),
        InboundEvent::MenuSelection { id, title } => {
            if title.is_empty() {
                id.clone()
            } else {
                title.clone()
            }
        }
    };
    store::append_history(&state.db, &account_key, "user", &inbound_summary).await;

    let decision = menu::decide(was_active, &user, &inbound.profile_name, &inbound.event);
    if decision.end_session {
        state.sessions.end(&account_key).await;
    }
    dispatch::deliver_all(&state, &inbound.from, &account_key, &decision.messages).await;
    true
}

async fn save_recommendation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<SaveRecommendationBody>,
) -> impl IntoResponse {
    let provided = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if state.api_secret_key.is_empty() || provided != state.api_secret_key {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "unauthorized" })),
        )
            .into_response();
    }

    let whatsapp_number = body.whatsapp_number.as_deref().unwrap_or("").trim();
    let business_name = body.business_name.as_deref().unwrap_or("").trim();
    let recommendation = body.recommendation.as_deref().unwrap_or("").trim();
    if whatsapp_number.is_empty() || business_name.is_empty() || recommendation.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "missing fields in request" })),
        )
            .into_response();
    }

    match store::set_recommendation(&state.db, whatsapp_number, business_name, recommendation)
        .await
    {
        Some(_) => {
            println!("[ingest] recommendation stored for {business_name}");
            (StatusCode::OK, Json(json!({ "saved": true }))).into_response()
        }
        None => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "failed to store recommendation" })),
        )
            .into_response(),
    }
}

pub async fn run() {
    let _ = dotenvy::dotenv();

    let port = env::var("PORT")
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(3000);
    let database_url = resolve_database_url();
    let whatsapp_token = env::var("WHATSAPP_TOKEN").unwrap_or_default();
    let verify_token = env::var("VERIFY_TOKEN").unwrap_or_default();
    let phone_number_id = env::var("PHONE_NUMBER_ID").unwrap_or_default();
    let api_secret_key = env::var("API_SECRET_KEY").unwrap_or_default();
    let app_secret = env::var("WHATSAPP_APP_SECRET").unwrap_or_default();
    if whatsapp_token.is_empty() || phone_number_id.is_empty() {
        eprintln!("[config] WHATSAPP_TOKEN or PHONE_NUMBER_ID is not set; outbound sends will fail");
    }

    let db = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .expect("failed to connect to postgres (set DATABASE_URL or POSTGRES_* env vars)");

    sqlx::migrate!("./migrations")
        .run(&db)
        .await
        .expect("failed to run sqlx migrations");

    let state = Arc::new(AppState {
        db,
        http: reqwest::Client::new(),
        sessions: SessionRegistry::new(IDLE_WINDOW),
        whatsapp_token,
        verify_token,
        phone_number_id,
        api_secret_key,
        app_secret,
    });

    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/webhook", get(webhook_verify).post(webhook_event))
        .route("/save-recommendation", post(save_recommendation))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind TCP listener");

    println!("asesoria bot listening at http://localhost:{port}");
    axum::serve(listener, app)
        .await
        .expect("server runtime failure");
}
