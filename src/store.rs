use serde_json::Value;
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use crate::types::{now_iso, HistoryEntry, UserRecord};

const COUNTRY_PREFIX: &str = "57";
const LOCAL_NUMBER_LEN: usize = 10;

/// Canonical account key for a raw phone identifier: digits only, with the
/// country prefix stripped when the number is longer than a local one.
/// Every read and write path into the store goes through this.
pub fn normalize_phone(raw: &str) -> String {
    let digits = raw
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect::<String>();
    if digits.starts_with(COUNTRY_PREFIX) && digits.len() > LOCAL_NUMBER_LEN {
        digits[COUNTRY_PREFIX.len()..].to_string()
    } else {
        digits
    }
}

fn parse_user_row(row: PgRow) -> UserRecord {
    let history = row
        .try_get::<Value, _>("history")
        .ok()
        .and_then(|v| serde_json::from_value::<Vec<HistoryEntry>>(v).ok())
        .unwrap_or_default();
    UserRecord {
        id: row.get("id"),
        phone: row.get("phone"),
        display_name: row.get("display_name"),
        recommendation: row.get("recommendation"),
        history,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        last_bot_interaction: row.get("last_bot_interaction"),
    }
}

/// Single-statement upsert so concurrent first-contact deliveries for the
/// same key settle on one row. The existing row is returned untouched except
/// for an empty display name, which is filled from the fallback.
pub async fn get_or_create(
    pool: &PgPool,
    raw_phone: &str,
    fallback_display_name: &str,
) -> Option<UserRecord> {
    let phone = normalize_phone(raw_phone);
    if phone.is_empty() {
        return None;
    }
    let now = now_iso();
    let row = sqlx::query(
        r#"
        INSERT INTO users (id, phone, display_name, recommendation, history, created_at, updated_at)
        VALUES ($1, $2, $3, NULL, '[]'::jsonb, $4, $4)
        ON CONFLICT (phone) DO UPDATE SET
            display_name = CASE
                WHEN users.display_name = '' THEN EXCLUDED.display_name
                ELSE users.display_name
            END
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&phone)
    .bind(fallback_display_name.trim())
    .bind(&now)
    .fetch_one(pool)
    .await;
    match row {
        Ok(row) => Some(parse_user_row(row)),
        Err(err) => {
            eprintln!("[store] get_or_create failed for {phone}: {err}");
            None
        }
    }
}

/// Appends one transcript entry. Zero rows matched (unknown account) is a
/// no-op; a transcript entry must never take down message delivery.
pub async fn append_history(pool: &PgPool, raw_phone: &str, sender: &str, message: &str) {
    let phone = normalize_phone(raw_phone);
    if phone.is_empty() || message.is_empty() {
        return;
    }
    let now = now_iso();
    let entry = serde_json::to_string(&HistoryEntry {
        sender: sender.to_string(),
        message: message.to_string(),
        timestamp: now.clone(),
    })
    .unwrap_or_else(|_| "{}".to_string());
    let result = sqlx::query(
        r#"
        UPDATE users SET
            history = history || $2::jsonb,
            updated_at = $3,
            last_bot_interaction = CASE WHEN $4 = 'bot' THEN $3 ELSE last_bot_interaction END
        WHERE phone = $1
        "#,
    )
    .bind(&phone)
    .bind(&entry)
    .bind(&now)
    .bind(sender)
    .execute(pool)
    .await;
    if let Err(err) = result {
        eprintln!("[store] history append failed for {phone}: {err}");
    }
}

/// Ingestion upsert: replaces the recommendation and display name, keeps an
/// existing row's history and creation time. A repeated ingestion for the
/// same key never produces a second row.
pub async fn set_recommendation(
    pool: &PgPool,
    raw_phone: &str,
    display_name: &str,
    recommendation: &str,
) -> Option<UserRecord> {
    let phone = normalize_phone(raw_phone);
    if phone.is_empty() {
        return None;
    }
    let now = now_iso();
    let row = sqlx::query(
        r#"
        INSERT INTO users (id, phone, display_name, recommendation, history, created_at, updated_at)
        VALUES ($1, $2, $3, $4, '[]'::jsonb, $5, $5)
        ON CONFLICT (phone) DO UPDATE SET
            display_name = EXCLUDED.display_name,
            recommendation = EXCLUDED.recommendation,
            updated_at = EXCLUDED.updated_at
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&phone)
    .bind(display_name.trim())
    .bind(recommendation)
    .bind(&now)
    .fetch_one(pool)
    .await;
    match row {
        Ok(row) => Some(parse_user_row(row)),
        Err(err) => {
            eprintln!("[store] set_recommendation failed for {phone}: {err}");
            None
        }
    }
}

pub async fn find_latest(pool: &PgPool, raw_phone: &str) -> Option<UserRecord> {
    let phone = normalize_phone(raw_phone);
    if phone.is_empty() {
        return None;
    }
    sqlx::query("SELECT * FROM users WHERE phone = $1 ORDER BY updated_at DESC LIMIT 1")
        .bind(&phone)
        .fetch_optional(pool)
        .await
        .ok()
        .flatten()
        .map(parse_user_row)
}

#[cfg(test)]
mod tests {
    use super::normalize_phone;

    #[test]
    fn strips_country_prefix_from_long_numbers() {
        assert_eq!(normalize_phone("573001234567"), "3001234567");
    }

    #[test]
    fn keeps_local_numbers_unchanged() {
        assert_eq!(normalize_phone("3001234567"), "3001234567");
    }

    #[test]
    fn keeps_short_numbers_even_with_prefix() {
        // ten digits or fewer: the leading 57 is part of the number
        assert_eq!(normalize_phone("57300123"), "57300123");
        assert_eq!(normalize_phone("5730012345"), "5730012345");
    }

    #[test]
    fn drops_formatting_characters() {
        assert_eq!(normalize_phone("+57 300-123-4567"), "3001234567");
        assert_eq!(normalize_phone("(300) 123 45 67"), "3001234567");
    }

    #[test]
    fn unnormalizable_input_passes_through_as_digits() {
        assert_eq!(normalize_phone("no digits"), "");
        assert_eq!(normalize_phone("abc123"), "123");
    }
}
