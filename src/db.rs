use std::{env, fs, path::Path};

use chrono::Utc;
use sqlx::SqlitePool;

use crate::{
    auth::{hash_password, new_id},
    models::{AppointmentRow, OrderItemRow, OrderRow, ShippingUpdateRow, ROLE_ADMIN},
};

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

pub fn ensure_sqlite_dir(db_url: &str) -> std::io::Result<()> {
    let path = if let Some(path) = db_url.strip_prefix("sqlite://") {
        Some(path)
    } else if let Some(path) = db_url.strip_prefix("sqlite:") {
        Some(path)
    } else {
        None
    };

    let Some(path) = path else {
        return Ok(());
    };

    let path = path.split('?').next().unwrap_or(path);
    if path == ":memory:" || path.is_empty() {
        return Ok(());
    }

    let path = path.strip_prefix("file:").unwrap_or(path);
    let db_path = Path::new(path);
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

pub async fn seed_defaults(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    seed_admin(pool).await?;
    seed_catalog(pool).await?;
    Ok(())
}

/// Append-only audit trail. Failures are swallowed; the log must never take
/// a request down with it.
pub async fn log_activity(
    pool: &SqlitePool,
    kind: &str,
    message: &str,
    user_id: Option<&str>,
    record_id: Option<&str>,
) {
    let _ = sqlx::query(
        r#"INSERT INTO activities (id, kind, message, created_at, user_id, record_id)
           VALUES (?, ?, ?, ?, ?, ?)"#,
    )
    .bind(new_id())
    .bind(kind)
    .bind(message)
    .bind(Utc::now().to_rfc3339())
    .bind(user_id)
    .bind(record_id)
    .execute(pool)
    .await;
}

pub async fn fetch_appointment(pool: &SqlitePool, appointment_id: &str) -> Option<AppointmentRow> {
    sqlx::query_as::<_, AppointmentRow>(
        r#"SELECT a.id, a.service_id, s.name AS service_name, a.scheduled_date, a.scheduled_time,
                  a.duration_minutes, a.status, a.client_name, a.client_phone, a.client_email,
                  a.notes, a.total_cents, a.payment_status, a.requested_at
           FROM appointments a
           LEFT JOIN services s ON a.service_id = s.id
           WHERE a.id = ?
           LIMIT 1"#,
    )
    .bind(appointment_id)
    .fetch_optional(pool)
    .await
    .unwrap_or(None)
}

pub async fn fetch_order(pool: &SqlitePool, order_id: &str) -> Option<OrderRow> {
    sqlx::query_as::<_, OrderRow>(
        r#"SELECT id, customer_name, customer_email, customer_phone, shipping_address,
                  total_cents, shipping_cents, status, shipping_status, tracking_number,
                  shipped_at, delivered_at, created_at
           FROM orders WHERE id = ? LIMIT 1"#,
    )
    .bind(order_id)
    .fetch_optional(pool)
    .await
    .unwrap_or(None)
}

pub async fn fetch_order_items(pool: &SqlitePool, order_id: &str) -> Vec<OrderItemRow> {
    sqlx::query_as::<_, OrderItemRow>(
        r#"SELECT id, order_id, product_id, product_name, quantity, unit_price_cents
           FROM order_items WHERE order_id = ? ORDER BY product_name"#,
    )
    .bind(order_id)
    .fetch_all(pool)
    .await
    .unwrap_or_default()
}

pub async fn fetch_shipping_history(pool: &SqlitePool, order_id: &str) -> Vec<ShippingUpdateRow> {
    sqlx::query_as::<_, ShippingUpdateRow>(
        r#"SELECT id, order_id, status, message, location, created_at
           FROM shipping_updates WHERE order_id = ? ORDER BY created_at DESC"#,
    )
    .bind(order_id)
    .fetch_all(pool)
    .await
    .unwrap_or_default()
}

async fn seed_admin(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let existing =
        sqlx::query_as::<_, (String,)>("SELECT id FROM users WHERE role = ? LIMIT 1")
            .bind(ROLE_ADMIN)
            .fetch_optional(pool)
            .await?;

    if existing.is_some() {
        return Ok(());
    }

    let username = env::var("ADMIN_USER").unwrap_or_else(|_| "admin".to_string());
    let password = env::var("ADMIN_PASSWORD").unwrap_or_else(|_| "admin".to_string());
    let display_name =
        env::var("ADMIN_DISPLAY_NAME").unwrap_or_else(|_| "Store Manager".to_string());

    if password == "admin" {
        log::warn!("ADMIN_PASSWORD not set. Using default password 'admin'. Set ADMIN_PASSWORD in production.");
    }

    let password_hash = hash_password(&password)
        .map_err(|_| sqlx::Error::Protocol("password hash failed".into()))?;

    sqlx::query(
        r#"INSERT INTO users (id, username, display_name, role, password_hash, active, created_at)
           VALUES (?, ?, ?, ?, ?, 1, ?)"#,
    )
    .bind(new_id())
    .bind(username)
    .bind(display_name)
    .bind(ROLE_ADMIN)
    .bind(password_hash)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// First-run catalog so the storefront renders something bookable and
/// buyable out of the box. Skipped once any row exists.
async fn seed_catalog(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let has_services =
        sqlx::query_as::<_, (String,)>("SELECT id FROM services LIMIT 1")
            .fetch_optional(pool)
            .await?
            .is_some();

    if !has_services {
        let services = [
            ("Radiance Facial", "Deep-cleanse facial with LED finish.", 60, 6500),
            ("Gel Manicure", "Shaping, cuticle care, and gel polish.", 45, 4000),
            ("Brow Shaping", "Wax and tweeze, finished with a tint.", 30, 2500),
            ("Lash Lift", "Curl and set, lasts six to eight weeks.", 45, 5500),
        ];
        for (name, description, duration, price) in services {
            sqlx::query(
                r#"INSERT INTO services (id, name, description, duration_minutes, price_cents, active, created_at)
                   VALUES (?, ?, ?, ?, ?, 1, ?)"#,
            )
            .bind(new_id())
            .bind(name)
            .bind(description)
            .bind(duration)
            .bind(price)
            .bind(Utc::now().to_rfc3339())
            .execute(pool)
            .await?;
        }
    }

    let has_products =
        sqlx::query_as::<_, (String,)>("SELECT id FROM products LIMIT 1")
            .fetch_optional(pool)
            .await?
            .is_some();

    if has_products {
        return Ok(());
    }

    let categories = [("Skincare", "skincare"), ("Makeup", "makeup"), ("Hair", "hair")];
    let mut category_ids = Vec::new();
    for (name, slug) in categories {
        let id = new_id();
        sqlx::query("INSERT INTO categories (id, name, slug) VALUES (?, ?, ?)")
            .bind(&id)
            .bind(name)
            .bind(slug)
            .execute(pool)
            .await?;
        category_ids.push(id);
    }

    let products = [
        (0, "Vitamin C Serum", "Brightening daily serum, 30ml.", 3200, 40),
        (0, "Ceramide Night Cream", "Barrier-repair moisturizer, 50ml.", 3800, 25),
        (1, "Velvet Matte Lipstick", "Long-wear matte finish.", 2200, 60),
        (1, "Silk Finish Foundation", "Buildable medium coverage.", 3400, 30),
        (2, "Argan Repair Oil", "Lightweight shine and frizz control.", 2800, 35),
    ];
    for (category, name, description, price, stock) in products {
        sqlx::query(
            r#"INSERT INTO products (id, category_id, name, description, price_cents, stock, active, created_at)
               VALUES (?, ?, ?, ?, ?, ?, 1, ?)"#,
        )
        .bind(new_id())
        .bind(&category_ids[category])
        .bind(name)
        .bind(description)
        .bind(price)
        .bind(stock)
        .bind(Utc::now().to_rfc3339())
        .execute(pool)
        .await?;
    }

    Ok(())
}
