use actix_web::{http::header, middleware::from_fn, web, HttpResponse, Result};
use actix_web_httpauth::middleware::HttpAuthentication;
use askama::Template;
use serde::Deserialize;

use crate::{
    auth::{admin_validator, logout_guard, AuthUser},
    db::{fetch_order_items, fetch_shipping_history},
    filters,
    models::{
        ActivityRow, AppointmentAction, AppointmentRow, AppointmentStatus, OrderRow, OrderStatus,
        ShippingStatus,
    },
    state::AppState,
    templates::render,
    workflow::{self, ShippingUpdateInput, WorkflowError},
};

#[derive(Clone, Debug)]
struct StatCard {
    label: String,
    value: String,
}

#[derive(Clone, Debug)]
struct AppointmentView {
    id: String,
    service_name: String,
    scheduled_date: String,
    scheduled_time: String,
    duration_minutes: i64,
    status: String,
    client_name: String,
    client_phone: String,
    client_email: String,
    has_email: bool,
    notes: String,
    has_notes: bool,
    total_cents: i64,
    payment_status: String,
    requested_at: String,
}

#[derive(Clone, Debug)]
struct ActionButton {
    value: String,
    label: String,
}

#[derive(Clone, Debug)]
struct StatusOption {
    value: String,
    selected: bool,
}

#[derive(Clone, Debug)]
struct ActivityView {
    message: String,
    created_at: String,
}

#[derive(Clone, Debug)]
struct OrderSummary {
    id: String,
    customer_name: String,
    total_cents: i64,
    status: String,
    shipping_status: String,
    created_at: String,
}

#[derive(Clone, Debug)]
struct OrderItemView {
    name: String,
    quantity: i64,
    unit_price_cents: i64,
}

#[derive(Clone, Debug)]
struct ShippingEventView {
    status: String,
    message: String,
    location: String,
    has_location: bool,
    created_at: String,
}

#[derive(Template)]
#[template(path = "admin_dashboard.html")]
struct AdminDashboardTemplate {
    admin_name: String,
    stats: Vec<StatCard>,
    upcoming: Vec<AppointmentView>,
    activities: Vec<ActivityView>,
}

#[derive(Template)]
#[template(path = "admin_appointments.html")]
struct AdminAppointmentsTemplate {
    appointments: Vec<AppointmentView>,
    status_filter: String,
}

#[derive(Template)]
#[template(path = "admin_appointment_detail.html")]
struct AdminAppointmentDetailTemplate {
    appointment: AppointmentView,
    actions: Vec<ActionButton>,
    can_reschedule: bool,
    slot_options: Vec<String>,
}

#[derive(Template)]
#[template(path = "admin_orders.html")]
struct AdminOrdersTemplate {
    orders: Vec<OrderSummary>,
    status_filter: String,
}

#[derive(Template)]
#[template(path = "admin_order_detail.html")]
struct AdminOrderDetailTemplate {
    order: OrderSummary,
    customer_email: String,
    shipping_address: String,
    tracking_number: String,
    items: Vec<OrderItemView>,
    history: Vec<ShippingEventView>,
    shipping_options: Vec<StatusOption>,
    status_options: Vec<StatusOption>,
}

#[derive(Deserialize)]
struct StatusFilter {
    status: Option<String>,
}

#[derive(Deserialize)]
struct ActionForm {
    action: String,
}

#[derive(Deserialize)]
struct RescheduleForm {
    date: String,
    time: String,
}

#[derive(Deserialize)]
struct ShippingForm {
    status: String,
    message: Option<String>,
    location: Option<String>,
    tracking_number: Option<String>,
}

#[derive(Deserialize)]
struct OrderStatusForm {
    status: String,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/admin")
            .wrap(HttpAuthentication::basic(admin_validator))
            .wrap(from_fn(logout_guard))
            .service(web::resource("").route(web::get().to(index)))
            .service(web::resource("/").route(web::get().to(index)))
            .service(web::resource("/dashboard").route(web::get().to(dashboard)))
            .service(web::resource("/appointments").route(web::get().to(list_appointments)))
            .service(
                web::resource("/appointments/{id}").route(web::get().to(appointment_detail)),
            )
            .service(
                web::resource("/appointments/{id}/action")
                    .route(web::post().to(appointment_action)),
            )
            .service(
                web::resource("/appointments/{id}/reschedule")
                    .route(web::post().to(reschedule)),
            )
            .service(web::resource("/orders").route(web::get().to(list_orders)))
            .service(web::resource("/orders/{id}").route(web::get().to(order_detail)))
            .service(web::resource("/orders/{id}/shipping").route(web::post().to(shipping_update)))
            .service(web::resource("/orders/{id}/status").route(web::post().to(order_status))),
    );
}

async fn index() -> HttpResponse {
    HttpResponse::Found()
        .append_header((header::LOCATION, "/admin/dashboard"))
        .finish()
}

async fn dashboard(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
) -> Result<HttpResponse> {
    let pending_bookings = count(&state, "SELECT COUNT(*) FROM appointments WHERE status = 'pending'").await;
    let confirmed_bookings = count(&state, "SELECT COUNT(*) FROM appointments WHERE status = 'confirmed'").await;
    let open_orders = count(&state, "SELECT COUNT(*) FROM orders WHERE status != 'completed'").await;
    let revenue: i64 = sqlx::query_scalar("SELECT COALESCE(SUM(total_cents), 0) FROM orders")
        .fetch_one(&state.db)
        .await
        .unwrap_or(0);

    let stats = vec![
        StatCard {
            label: "Pending bookings".to_string(),
            value: pending_bookings.to_string(),
        },
        StatCard {
            label: "Confirmed bookings".to_string(),
            value: confirmed_bookings.to_string(),
        },
        StatCard {
            label: "Open orders".to_string(),
            value: open_orders.to_string(),
        },
        StatCard {
            label: "Order revenue".to_string(),
            value: filters::money(&revenue).unwrap_or_default(),
        },
    ];

    let upcoming = fetch_appointments(&state, "").await;
    let upcoming = upcoming.into_iter().take(6).collect();

    let activities = sqlx::query_as::<_, ActivityRow>(
        "SELECT message, created_at FROM activities ORDER BY created_at DESC LIMIT 10",
    )
    .fetch_all(&state.db)
    .await
    .unwrap_or_default()
    .into_iter()
    .map(|row| ActivityView {
        message: row.message,
        created_at: row.created_at,
    })
    .collect();

    Ok(render(AdminDashboardTemplate {
        admin_name: auth.display_name.clone(),
        stats,
        upcoming,
        activities,
    }))
}

async fn list_appointments(
    state: web::Data<AppState>,
    query: web::Query<StatusFilter>,
) -> Result<HttpResponse> {
    let status_filter = query.status.clone().unwrap_or_default();
    let appointments = fetch_appointments(&state, &status_filter).await;

    Ok(render(AdminAppointmentsTemplate {
        appointments,
        status_filter,
    }))
}

async fn appointment_detail(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let appointment_id = path.into_inner();
    let Some(row) = crate::db::fetch_appointment(&state.db, &appointment_id).await else {
        return Ok(HttpResponse::NotFound().body("Appointment not found"));
    };

    let status = AppointmentStatus::parse(&row.status);
    let actions = status
        .map(|status| {
            status
                .allowed_actions()
                .into_iter()
                .filter(|action| *action != AppointmentAction::Reschedule)
                .map(|action| ActionButton {
                    value: action.as_str().to_string(),
                    label: action_label(action).to_string(),
                })
                .collect()
        })
        .unwrap_or_default();
    let can_reschedule =
        status.is_some_and(|status| status.apply(AppointmentAction::Reschedule).is_some());

    Ok(render(AdminAppointmentDetailTemplate {
        appointment: to_view(row),
        actions,
        can_reschedule,
        slot_options: state.slots.labels().to_vec(),
    }))
}

async fn appointment_action(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
    form: web::Form<ActionForm>,
) -> Result<HttpResponse> {
    let appointment_id = path.into_inner();
    let action = AppointmentAction::parse(&form.action)
        .ok_or_else(|| WorkflowError::Validation("Unknown action.".into()))?;

    workflow::apply_appointment_action(&state, &auth, &appointment_id, action).await?;

    Ok(HttpResponse::SeeOther()
        .append_header((
            header::LOCATION,
            format!("/admin/appointments/{appointment_id}"),
        ))
        .finish())
}

async fn reschedule(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
    form: web::Form<RescheduleForm>,
) -> Result<HttpResponse> {
    let appointment_id = path.into_inner();
    workflow::reschedule_appointment(&state, &auth, &appointment_id, form.date.trim(), form.time.trim())
        .await?;

    Ok(HttpResponse::SeeOther()
        .append_header((
            header::LOCATION,
            format!("/admin/appointments/{appointment_id}"),
        ))
        .finish())
}

async fn list_orders(
    state: web::Data<AppState>,
    query: web::Query<StatusFilter>,
) -> Result<HttpResponse> {
    let status_filter = query.status.clone().unwrap_or_default();
    let rows = if status_filter.is_empty() {
        sqlx::query_as::<_, OrderRow>(
            r#"SELECT id, customer_name, customer_email, customer_phone, shipping_address,
                      total_cents, shipping_cents, status, shipping_status, tracking_number,
                      shipped_at, delivered_at, created_at
               FROM orders ORDER BY created_at DESC"#,
        )
        .fetch_all(&state.db)
        .await
    } else {
        sqlx::query_as::<_, OrderRow>(
            r#"SELECT id, customer_name, customer_email, customer_phone, shipping_address,
                      total_cents, shipping_cents, status, shipping_status, tracking_number,
                      shipped_at, delivered_at, created_at
               FROM orders WHERE shipping_status = ? ORDER BY created_at DESC"#,
        )
        .bind(&status_filter)
        .fetch_all(&state.db)
        .await
    }
    .unwrap_or_default();

    Ok(render(AdminOrdersTemplate {
        orders: rows.into_iter().map(to_summary).collect(),
        status_filter,
    }))
}

async fn order_detail(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let order_id = path.into_inner();
    let Some(order) = crate::db::fetch_order(&state.db, &order_id).await else {
        return Ok(HttpResponse::NotFound().body("Order not found"));
    };

    let items = fetch_order_items(&state.db, &order_id)
        .await
        .into_iter()
        .map(|row| OrderItemView {
            name: row.product_name,
            quantity: row.quantity,
            unit_price_cents: row.unit_price_cents,
        })
        .collect();

    let history = fetch_shipping_history(&state.db, &order_id)
        .await
        .into_iter()
        .map(|row| {
            let location = row.location.unwrap_or_default();
            ShippingEventView {
                status: row.status,
                message: row.message,
                has_location: !location.trim().is_empty(),
                location,
                created_at: row.created_at,
            }
        })
        .collect();

    let shipping_options = ShippingStatus::all()
        .iter()
        .map(|status| StatusOption {
            value: status.as_str().to_string(),
            selected: status.as_str() == order.shipping_status,
        })
        .collect();
    let status_options = OrderStatus::all()
        .iter()
        .map(|status| StatusOption {
            value: status.as_str().to_string(),
            selected: status.as_str() == order.status,
        })
        .collect();

    let customer_email = order.customer_email.clone();
    let shipping_address = order.shipping_address.clone();
    let tracking_number = order.tracking_number.clone().unwrap_or_default();

    Ok(render(AdminOrderDetailTemplate {
        order: to_summary(order),
        customer_email,
        shipping_address,
        tracking_number,
        items,
        history,
        shipping_options,
        status_options,
    }))
}

async fn shipping_update(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
    form: web::Form<ShippingForm>,
) -> Result<HttpResponse> {
    let order_id = path.into_inner();
    let form = form.into_inner();
    let input = ShippingUpdateInput {
        status: ShippingStatus::parse(form.status.trim()),
        message: form.message,
        location: form.location,
        tracking_number: form.tracking_number,
    };

    workflow::update_shipping(&state, &auth, &order_id, &input).await?;

    Ok(HttpResponse::SeeOther()
        .append_header((header::LOCATION, format!("/admin/orders/{order_id}")))
        .finish())
}

async fn order_status(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
    form: web::Form<OrderStatusForm>,
) -> Result<HttpResponse> {
    let order_id = path.into_inner();
    let status = OrderStatus::parse(form.status.trim())
        .ok_or_else(|| WorkflowError::Validation("Unknown order status.".into()))?;

    workflow::update_order_status(&state, &auth, &order_id, status).await?;

    Ok(HttpResponse::SeeOther()
        .append_header((header::LOCATION, format!("/admin/orders/{order_id}")))
        .finish())
}

fn action_label(action: AppointmentAction) -> &'static str {
    match action {
        AppointmentAction::Confirm => "Confirm",
        AppointmentAction::Cancel => "Cancel",
        AppointmentAction::Complete => "Mark completed",
        AppointmentAction::Reschedule => "Reschedule",
    }
}

async fn fetch_appointments(state: &web::Data<AppState>, status: &str) -> Vec<AppointmentView> {
    let rows = if status.is_empty() {
        sqlx::query_as::<_, AppointmentRow>(
            r#"SELECT a.id, a.service_id, s.name AS service_name, a.scheduled_date,
                      a.scheduled_time, a.duration_minutes, a.status, a.client_name,
                      a.client_phone, a.client_email, a.notes, a.total_cents,
                      a.payment_status, a.requested_at
               FROM appointments a
               LEFT JOIN services s ON a.service_id = s.id
               ORDER BY a.scheduled_date DESC, a.scheduled_time DESC"#,
        )
        .fetch_all(&state.db)
        .await
    } else {
        sqlx::query_as::<_, AppointmentRow>(
            r#"SELECT a.id, a.service_id, s.name AS service_name, a.scheduled_date,
                      a.scheduled_time, a.duration_minutes, a.status, a.client_name,
                      a.client_phone, a.client_email, a.notes, a.total_cents,
                      a.payment_status, a.requested_at
               FROM appointments a
               LEFT JOIN services s ON a.service_id = s.id
               WHERE a.status = ?
               ORDER BY a.scheduled_date DESC, a.scheduled_time DESC"#,
        )
        .bind(status)
        .fetch_all(&state.db)
        .await
    };

    rows.unwrap_or_default().into_iter().map(to_view).collect()
}

fn to_view(row: AppointmentRow) -> AppointmentView {
    let client_email = row.client_email.unwrap_or_default();
    let notes = row.notes.unwrap_or_default();
    AppointmentView {
        id: row.id,
        service_name: row.service_name.unwrap_or_else(|| "Service".to_string()),
        scheduled_date: row.scheduled_date,
        scheduled_time: row.scheduled_time,
        duration_minutes: row.duration_minutes,
        status: row.status,
        client_name: row.client_name,
        client_phone: row.client_phone,
        has_email: !client_email.trim().is_empty(),
        client_email,
        has_notes: !notes.trim().is_empty(),
        notes,
        total_cents: row.total_cents,
        payment_status: row.payment_status,
        requested_at: row.requested_at,
    }
}

fn to_summary(row: OrderRow) -> OrderSummary {
    OrderSummary {
        id: row.id,
        customer_name: row.customer_name,
        total_cents: row.total_cents,
        status: row.status,
        shipping_status: row.shipping_status,
        created_at: row.created_at,
    }
}

async fn count(state: &web::Data<AppState>, query: &str) -> i64 {
    sqlx::query_scalar::<_, i64>(query)
        .fetch_one(&state.db)
        .await
        .unwrap_or(0)
}
