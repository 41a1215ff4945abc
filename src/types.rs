use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::PgPool;

use crate::session::SessionRegistry;

pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub sender: String,
    pub message: String,
    pub timestamp: String,
}

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: String,
    pub phone: String,
    pub display_name: String,
    pub recommendation: Option<String>,
    pub history: Vec<HistoryEntry>,
    pub created_at: String,
    pub updated_at: String,
    pub last_bot_interaction: String,
}

impl UserRecord {
    /// Stand-in record used when the store is unreachable; keeps the
    /// conversation going with the empty-profile menu branch.
    pub fn detached(phone: &str, display_name: &str) -> Self {
        let now = now_iso();
        Self {
            id: String::new(),
            phone: phone.to_string(),
            display_name: display_name.trim().to_string(),
            recommendation: None,
            history: Vec::new(),
            created_at: now.clone(),
            updated_at: now,
            last_bot_interaction: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Text { body: String },
    MenuSelection { id: String, title: String },
}

#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub from: String,
    pub profile_name: String,
    pub event: InboundEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MenuOption {
    pub id: &'static str,
    pub title: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Text {
        body: String,
    },
    Buttons {
        body: String,
        buttons: Vec<MenuOption>,
    },
    List {
        header: &'static str,
        body: String,
        footer: &'static str,
        button: &'static str,
        section_title: &'static str,
        rows: Vec<MenuOption>,
    },
}

impl OutboundMessage {
    pub fn payload(&self, to: &str) -> Value {
        let mut payload = json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
        });
        match self {
            OutboundMessage::Text { body } => {
                payload["type"] = json!("text");
                payload["text"] = json!({
                    "preview_url": false,
                    "body": body,
                });
            }
            OutboundMessage::Buttons { body, buttons } => {
                payload["type"] = json!("interactive");
                payload["interactive"] = json!({
                    "type": "button",
                    "body": { "text": body },
                    "action": {
                        "buttons": buttons
                            .iter()
                            .map(|b| json!({
                                "type": "reply",
                                "reply": { "id": b.id, "title": b.title },
                            }))
                            .collect::<Vec<_>>(),
                    },
                });
            }
            OutboundMessage::List {
                header,
                body,
                footer,
                button,
                section_title,
                rows,
            } => {
                payload["type"] = json!("interactive");
                payload["interactive"] = json!({
                    "type": "list",
                    "header": { "type": "text", "text": header },
                    "body": { "text": body },
                    "footer": { "text": footer },
                    "action": {
                        "button": button,
                        "sections": [{
                            "title": section_title,
                            "rows": rows
                                .iter()
                                .map(|r| json!({ "id": r.id, "title": r.title }))
                                .collect::<Vec<_>>(),
                        }],
                    },
                });
            }
        }
        payload
    }

    /// Transcript summary: the plain body for text, a fixed label for
    /// interactive payloads.
    pub fn summary(&self) -> String {
        match self {
            OutboundMessage::Text { body } => body.clone(),
            OutboundMessage::Buttons { .. } => "[botones de seguimiento]".to_string(),
            OutboundMessage::List { .. } => "[menú interactivo]".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SaveRecommendationBody {
    #[serde(default)]
    pub whatsapp_number: Option<String>,
    #[serde(default)]
    pub business_name: Option<String>,
    #[serde(default)]
    pub recommendation: Option<String>,
}

pub struct AppState {
    pub db: PgPool,
    pub http: reqwest::Client,
    pub sessions: SessionRegistry,
    pub whatsapp_token: String,
    pub verify_token: String,
    pub phone_number_id: String,
    pub api_secret_key: String,
    pub app_secret: String,
}
