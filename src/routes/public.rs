use actix_web::http::header::Header;
use actix_web::{http::header, web, HttpRequest, HttpResponse, Result};
use actix_web_httpauth::headers::authorization::{Authorization, Basic};
use askama::Template;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::{
    auth::{authenticate_credentials, clear_logout_cookie, logout_cookie, AUTH_REALM},
    db::{fetch_appointment, log_activity},
    filters,
    models::{ProductRow, ServiceRow},
    notify,
    scheduling::{self, BookingError, BookingRequest},
    state::{AppState, ServerEvent},
    templates::render,
};

#[derive(Clone, Debug)]
struct ServicePick {
    id: String,
    name: String,
    description: String,
    duration_minutes: i64,
    price_cents: i64,
    selected: bool,
}

#[derive(Clone, Debug)]
struct ProductCard {
    id: String,
    name: String,
    description: String,
    price_cents: i64,
}

#[derive(Template)]
#[template(path = "home.html")]
struct HomeTemplate {
    services: Vec<ServicePick>,
    featured: Vec<ProductCard>,
}

#[derive(Template)]
#[template(path = "services.html")]
struct ServicesTemplate {
    services: Vec<ServicePick>,
}

#[derive(Clone, Debug, Default)]
struct BookingView {
    client_name: String,
    client_phone: String,
    client_email: String,
    notes: String,
}

#[derive(Clone, Debug)]
struct SlotPick {
    label: String,
    selected: bool,
}

#[derive(Template)]
#[template(path = "book.html")]
struct BookTemplate {
    services: Vec<ServicePick>,
    date: String,
    slots: Vec<SlotPick>,
    has_slots: bool,
    form: BookingView,
    errors: Vec<String>,
    vapid_public_key: String,
}

#[derive(Template)]
#[template(path = "book_success.html")]
struct BookSuccessTemplate {
    appointment_id: String,
    vapid_public_key: String,
}

#[derive(Template)]
#[template(path = "status.html")]
struct StatusTemplate {
    appointment_id: String,
    found: bool,
    service_name: String,
    scheduled_date: String,
    scheduled_time: String,
    status: String,
    client_name: String,
    vapid_public_key: String,
}

#[derive(Deserialize)]
struct BookQuery {
    service: Option<String>,
    date: Option<String>,
}

#[derive(Deserialize)]
struct BookingForm {
    service_id: String,
    date: String,
    time: Option<String>,
    client_name: String,
    client_phone: String,
    client_email: Option<String>,
    notes: Option<String>,
    push_subscription: Option<String>,
}

#[derive(Deserialize)]
struct SlotsQuery {
    date: String,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/").route(web::get().to(home)))
        .service(web::resource("/services").route(web::get().to(list_services)))
        .service(
            web::resource("/book")
                .route(web::get().to(show_booking))
                .route(web::post().to(create_booking)),
        )
        .service(web::resource("/book/slots").route(web::get().to(slots_json)))
        .service(web::resource("/status/{id}").route(web::get().to(status_page)))
        .service(web::resource("/status/{id}/subscribe").route(web::post().to(subscribe)))
        .service(web::resource("/login").route(web::get().to(login)))
        .service(web::resource("/logout").route(web::get().to(logout)))
        .service(web::resource("/health").route(web::get().to(health)));
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().body("ok")
}

async fn home(state: web::Data<AppState>) -> Result<HttpResponse> {
    let services = fetch_services(&state, None).await;
    let featured = sqlx::query_as::<_, ProductRow>(
        r#"SELECT id, category_id, name, description, price_cents, stock, active
           FROM products WHERE active = 1 ORDER BY created_at DESC LIMIT 4"#,
    )
    .fetch_all(&state.db)
    .await
    .unwrap_or_default()
    .into_iter()
    .map(|row| ProductCard {
        id: row.id,
        name: row.name,
        description: row.description,
        price_cents: row.price_cents,
    })
    .collect();

    Ok(render(HomeTemplate { services, featured }))
}

async fn list_services(state: web::Data<AppState>) -> Result<HttpResponse> {
    let services = fetch_services(&state, None).await;
    Ok(render(ServicesTemplate { services }))
}

async fn show_booking(
    state: web::Data<AppState>,
    query: web::Query<BookQuery>,
) -> Result<HttpResponse> {
    let date = normalize_date(query.date.as_deref());
    let services = fetch_services(&state, query.service.as_deref()).await;
    let slots = scheduling::available_slots(&state.db, &state.slots, &date)
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;

    Ok(render(BookTemplate {
        services,
        date,
        has_slots: !slots.is_empty(),
        slots: slot_picks(slots, ""),
        form: BookingView::default(),
        errors: Vec::new(),
        vapid_public_key: state.push.public_key.clone(),
    }))
}

async fn create_booking(
    state: web::Data<AppState>,
    form: web::Form<BookingForm>,
) -> Result<HttpResponse> {
    let form = form.into_inner();
    let request = BookingRequest {
        service_id: form.service_id.clone(),
        date: form.date.clone(),
        time: form.time.clone().unwrap_or_default(),
        client_name: form.client_name.clone(),
        client_phone: form.client_phone.clone(),
        client_email: form
            .client_email
            .clone()
            .filter(|value| !value.trim().is_empty()),
        notes: form.notes.clone().filter(|value| !value.trim().is_empty()),
    };

    let appointment_id = match scheduling::submit_booking(&state.db, &state.slots, &request).await
    {
        Ok(id) => id,
        Err(err @ (BookingError::Validation(_) | BookingError::SlotTaken)) => {
            // Re-render with a fresh availability snapshot so a lost race
            // immediately shows the slots that are still open.
            let date = normalize_date(Some(&form.date));
            let services = fetch_services(&state, Some(&form.service_id)).await;
            let slots = scheduling::available_slots(&state.db, &state.slots, &date)
                .await
                .map_err(actix_web::error::ErrorInternalServerError)?;
            return Ok(render(BookTemplate {
                services,
                date,
                has_slots: !slots.is_empty(),
                slots: slot_picks(slots, &request.time),
                form: BookingView {
                    client_name: form.client_name,
                    client_phone: form.client_phone,
                    client_email: form.client_email.unwrap_or_default(),
                    notes: form.notes.unwrap_or_default(),
                },
                errors: vec![err.to_string()],
                vapid_public_key: state.push.public_key.clone(),
            }));
        }
        Err(BookingError::Database(err)) => {
            return Err(actix_web::error::ErrorInternalServerError(err));
        }
    };

    log_activity(
        &state.db,
        "appointment_created",
        &format!("New booking requested by {}.", request.client_name.trim()),
        None,
        Some(&appointment_id),
    )
    .await;

    if let Some(subscription) = form
        .push_subscription
        .as_deref()
        .filter(|value| !value.trim().is_empty())
    {
        let _ = notify::store_subscription(&state.db, &appointment_id, subscription).await;
    }

    let _ = state.events.send(ServerEvent::appointment(
        "appointment_created",
        &appointment_id,
        "pending",
        format!("New booking requested by {}.", request.client_name.trim()),
        format!("{} {}", request.date, request.time),
    ));

    Ok(render(BookSuccessTemplate {
        appointment_id,
        vapid_public_key: state.push.public_key.clone(),
    }))
}

/// Fresh availability for a date, for the booking page to refresh after a
/// lost race without a full reload.
async fn slots_json(
    state: web::Data<AppState>,
    query: web::Query<SlotsQuery>,
) -> Result<HttpResponse> {
    let date = normalize_date(Some(&query.date));
    let slots = scheduling::available_slots(&state.db, &state.slots, &date)
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;
    Ok(HttpResponse::Ok().json(json!({ "date": date, "slots": slots })))
}

async fn status_page(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let appointment_id = path.into_inner();
    let row = fetch_appointment(&state.db, &appointment_id).await;

    let template = match row {
        Some(row) => StatusTemplate {
            appointment_id,
            found: true,
            service_name: row.service_name.unwrap_or_else(|| "Service".to_string()),
            scheduled_date: row.scheduled_date,
            scheduled_time: row.scheduled_time,
            status: row.status,
            client_name: row.client_name,
            vapid_public_key: state.push.public_key.clone(),
        },
        None => StatusTemplate {
            appointment_id,
            found: false,
            service_name: String::new(),
            scheduled_date: String::new(),
            scheduled_time: String::new(),
            status: String::new(),
            client_name: String::new(),
            vapid_public_key: state.push.public_key.clone(),
        },
    };

    Ok(render(template))
}

async fn subscribe(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Bytes,
) -> Result<HttpResponse> {
    let appointment_id = path.into_inner();
    if fetch_appointment(&state.db, &appointment_id).await.is_none() {
        return Ok(HttpResponse::NotFound().finish());
    }

    let raw = String::from_utf8(body.to_vec()).unwrap_or_default();
    if raw.trim().is_empty() {
        return Ok(HttpResponse::BadRequest().finish());
    }

    let _ = notify::store_subscription(&state.db, &appointment_id, &raw).await;
    Ok(HttpResponse::Ok().json(json!({ "ok": true })))
}

#[derive(Deserialize)]
struct LoginQuery {
    next: Option<String>,
}

async fn login(
    state: web::Data<AppState>,
    req: HttpRequest,
    query: web::Query<LoginQuery>,
) -> HttpResponse {
    let auth = match Authorization::<Basic>::parse(&req) {
        Ok(auth) => auth,
        Err(_) => return auth_challenge(),
    };
    let credentials = auth.into_scheme();
    let username = credentials.user_id();
    let password = credentials.password().unwrap_or_default();

    let user = match authenticate_credentials(&state, username, password).await {
        Some(user) => user,
        None => return auth_challenge(),
    };

    let requested = query.next.as_deref().unwrap_or("");
    let redirect = if user.is_admin() && requested.starts_with("/admin") {
        requested
    } else if user.is_admin() {
        "/admin/dashboard"
    } else {
        "/"
    };

    HttpResponse::SeeOther()
        .append_header((header::LOCATION, redirect))
        .cookie(clear_logout_cookie(&req))
        .insert_header((header::CACHE_CONTROL, "no-store"))
        .finish()
}

async fn logout(req: HttpRequest) -> HttpResponse {
    HttpResponse::SeeOther()
        .append_header((header::LOCATION, "/"))
        .cookie(logout_cookie(&req))
        .insert_header((header::CACHE_CONTROL, "no-store"))
        .finish()
}

fn auth_challenge() -> HttpResponse {
    HttpResponse::Unauthorized()
        .insert_header((
            header::WWW_AUTHENTICATE,
            format!("Basic realm=\"{}\"", AUTH_REALM),
        ))
        .insert_header((header::CACHE_CONTROL, "no-store"))
        .finish()
}

fn slot_picks(slots: Vec<String>, selected: &str) -> Vec<SlotPick> {
    slots
        .into_iter()
        .map(|label| SlotPick {
            selected: label == selected,
            label,
        })
        .collect()
}

fn normalize_date(date: Option<&str>) -> String {
    match date {
        Some(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => Utc::now().date_naive().format("%Y-%m-%d").to_string(),
    }
}

async fn fetch_services(state: &web::Data<AppState>, selected: Option<&str>) -> Vec<ServicePick> {
    sqlx::query_as::<_, ServiceRow>(
        r#"SELECT id, name, description, duration_minutes, price_cents, active
           FROM services WHERE active = 1 ORDER BY name"#,
    )
    .fetch_all(&state.db)
    .await
    .unwrap_or_default()
    .into_iter()
    .map(|row| ServicePick {
        selected: selected == Some(row.id.as_str()),
        id: row.id,
        name: row.name,
        description: row.description,
        duration_minutes: row.duration_minutes,
        price_cents: row.price_cents,
    })
    .collect()
}
