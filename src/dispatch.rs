use std::sync::Arc;

use crate::{
    store,
    types::{AppState, OutboundMessage},
};

/// Submits one payload to the Cloud API and, on success, records a summary
/// in the transcript. Both the send and the transcript append are
/// best-effort: neither failure reaches the webhook response.
pub async fn deliver(
    state: &Arc<AppState>,
    to_phone: &str,
    account_key: &str,
    message: &OutboundMessage,
) -> bool {
    let payload = message.payload(to_phone);
    let response = state
        .http
        .post(format!(
            "https://graph.facebook.com/v21.0/{}/messages",
            state.phone_number_id
        ))
        .bearer_auth(&state.whatsapp_token)
        .json(&payload)
        .send()
        .await;
    let response = match response {
        Ok(response) => response,
        Err(err) => {
            eprintln!("[whatsapp] outbound request failed for {to_phone}: {err}");
            return false;
        }
    };
    if !response.status().is_success() {
        let status = response.status();
        let raw_body = response.text().await.unwrap_or_default();
        eprintln!("[whatsapp] outbound delivery failed for {to_phone}: {status} {raw_body}");
        return false;
    }
    store::append_history(&state.db, account_key, "bot", &message.summary()).await;
    true
}

pub async fn deliver_all(
    state: &Arc<AppState>,
    to_phone: &str,
    account_key: &str,
    messages: &[OutboundMessage],
) {
    for message in messages {
        deliver(state, to_phone, account_key, message).await;
    }
}
