//! Web-push dispatch for appointment and order updates.
//!
//! Notifications are strictly fire-and-forget: every failure is logged and
//! none is ever reported to the caller. The status write that triggered the
//! notification is the commit point and must stand on its own.

use serde::Deserialize;
use sqlx::SqlitePool;
use web_push::{
    ContentEncoding, IsahcWebPushClient, SubscriptionInfo, VapidSignatureBuilder, WebPushClient,
    WebPushError, WebPushMessageBuilder, URL_SAFE_NO_PAD,
};

use crate::{
    auth::new_id,
    state::{AppState, PushConfig},
};

#[derive(Debug, Deserialize)]
pub struct PushSubscriptionInput {
    pub endpoint: String,
    pub keys: PushKeys,
}

#[derive(Debug, Deserialize)]
pub struct PushKeys {
    pub p256dh: String,
    pub auth: String,
}

#[derive(Debug, sqlx::FromRow)]
struct PushSubscriptionRow {
    endpoint: String,
    p256dh: String,
    auth: String,
}

/// Store a browser subscription against an appointment or order id. A
/// malformed payload is logged and dropped rather than failing the request.
pub async fn store_subscription(
    pool: &SqlitePool,
    record_id: &str,
    raw_subscription: &str,
) -> Result<(), sqlx::Error> {
    let subscription: PushSubscriptionInput = match serde_json::from_str(raw_subscription) {
        Ok(value) => value,
        Err(err) => {
            log::warn!("Invalid push subscription payload: {err}");
            return Ok(());
        }
    };

    sqlx::query(
        r#"INSERT INTO push_subscriptions (id, record_id, endpoint, p256dh, auth, created_at)
           VALUES (?, ?, ?, ?, ?, ?)
           ON CONFLICT(record_id, endpoint) DO UPDATE SET
             p256dh = excluded.p256dh,
             auth = excluded.auth"#,
    )
    .bind(new_id())
    .bind(record_id)
    .bind(subscription.endpoint)
    .bind(subscription.keys.p256dh)
    .bind(subscription.keys.auth)
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// Send `title`/`body` to every subscription registered for `record_id`.
pub async fn notify_record(
    state: &AppState,
    record_id: &str,
    title: &str,
    body: &str,
    url: Option<&str>,
) {
    if !state.push.enabled() {
        return;
    }

    let rows = sqlx::query_as::<_, PushSubscriptionRow>(
        "SELECT endpoint, p256dh, auth FROM push_subscriptions WHERE record_id = ?",
    )
    .bind(record_id)
    .fetch_all(&state.db)
    .await
    .unwrap_or_default();

    if rows.is_empty() {
        return;
    }

    let payload = serde_json::json!({
        "title": title,
        "body": body,
        "url": url.unwrap_or("/")
    })
    .to_string();

    for row in rows {
        if let Err(err) = send_push(&state.push, row, &payload).await {
            log::warn!("Push send failed for {record_id}: {err}");
        }
    }
}

async fn send_push(
    config: &PushConfig,
    row: PushSubscriptionRow,
    payload: &str,
) -> Result<(), WebPushError> {
    let subscription = SubscriptionInfo::new(row.endpoint, row.p256dh, row.auth);
    let mut builder = WebPushMessageBuilder::new(&subscription);
    builder.set_payload(ContentEncoding::Aes128Gcm, payload.as_bytes());

    let mut vapid_builder =
        VapidSignatureBuilder::from_base64(&config.private_key, URL_SAFE_NO_PAD, &subscription)?;
    vapid_builder.add_claim("sub", config.subject.clone());

    builder.set_vapid_signature(vapid_builder.build()?);

    let client = IsahcWebPushClient::new()?;
    client.send(builder.build()?).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduling::test_support::memory_pool;

    #[actix_web::test]
    async fn malformed_subscription_is_dropped_quietly() {
        let pool = memory_pool().await;
        store_subscription(&pool, "some-record", "not json at all")
            .await
            .unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM push_subscriptions")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[actix_web::test]
    async fn resubscribing_updates_keys_in_place() {
        let pool = memory_pool().await;
        let first = r#"{"endpoint":"https://push.example/abc","keys":{"p256dh":"k1","auth":"a1"}}"#;
        let second = r#"{"endpoint":"https://push.example/abc","keys":{"p256dh":"k2","auth":"a2"}}"#;

        store_subscription(&pool, "appt-1", first).await.unwrap();
        store_subscription(&pool, "appt-1", second).await.unwrap();

        let (count, p256dh): (i64, String) = (
            sqlx::query_scalar("SELECT COUNT(*) FROM push_subscriptions")
                .fetch_one(&pool)
                .await
                .unwrap(),
            sqlx::query_scalar("SELECT p256dh FROM push_subscriptions WHERE record_id = 'appt-1'")
                .fetch_one(&pool)
                .await
                .unwrap(),
        );
        assert_eq!(count, 1);
        assert_eq!(p256dh, "k2");
    }
}
