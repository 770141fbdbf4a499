//! Admin-triggered status changes for appointments and orders.
//!
//! Every operation here follows the same shape: authorization check before
//! any read or write, the status write as the commit point, then best-effort
//! side effects (activity log, web push, SSE broadcast) that can fail without
//! affecting the result.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use chrono::Utc;
use thiserror::Error;

use crate::{
    auth::AuthUser,
    db::{fetch_appointment, fetch_order, log_activity},
    models::{
        AppointmentAction, AppointmentRow, AppointmentStatus, OrderStatus, ShippingStatus,
    },
    notify,
    scheduling::{self, is_slot_conflict},
    state::{AppState, ServerEvent},
};

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Admin access required")]
    Unauthorized,
    #[error("Record not found")]
    NotFound,
    #[error("Cannot {action} an appointment that is {status}")]
    InvalidTransition {
        status: AppointmentStatus,
        action: AppointmentAction,
    },
    #[error("{0}")]
    Validation(String),
    #[error("The requested time slot is no longer available")]
    SlotTaken,
    #[error("Stored status {0:?} is not recognized")]
    UnknownStatus(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ResponseError for WorkflowError {
    fn status_code(&self) -> StatusCode {
        match self {
            WorkflowError::Unauthorized => StatusCode::FORBIDDEN,
            WorkflowError::NotFound => StatusCode::NOT_FOUND,
            WorkflowError::InvalidTransition { .. } | WorkflowError::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            WorkflowError::SlotTaken => StatusCode::CONFLICT,
            WorkflowError::UnknownStatus(_) | WorkflowError::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            WorkflowError::UnknownStatus(_) | WorkflowError::Database(_) => {
                log::error!("Workflow failure: {self}");
                HttpResponse::InternalServerError().body("Something went wrong. Please try again.")
            }
            other => HttpResponse::build(other.status_code()).body(other.to_string()),
        }
    }
}

fn require_admin(caller: &AuthUser) -> Result<(), WorkflowError> {
    if caller.is_admin() {
        Ok(())
    } else {
        Err(WorkflowError::Unauthorized)
    }
}

fn parse_status(row: &AppointmentRow) -> Result<AppointmentStatus, WorkflowError> {
    AppointmentStatus::parse(&row.status)
        .ok_or_else(|| WorkflowError::UnknownStatus(row.status.clone()))
}

pub fn confirmation_message(row: &AppointmentRow) -> String {
    format!(
        "Your {} appointment on {} at {} is confirmed.",
        row.service_name.as_deref().unwrap_or("beauty"),
        row.scheduled_date,
        row.scheduled_time
    )
}

pub fn cancellation_message(row: &AppointmentRow) -> String {
    format!(
        "Your appointment on {} at {} has been cancelled.",
        row.scheduled_date, row.scheduled_time
    )
}

/// The reschedule notice always names the slot the customer originally held.
pub fn reschedule_message(
    old_date: &str,
    old_time: &str,
    new_date: &str,
    new_time: &str,
) -> String {
    format!(
        "Your appointment previously scheduled for {old_date} at {old_time} \
         has been moved to {new_date} at {new_time}."
    )
}

/// Apply one admin action (confirm, cancel, complete) to an appointment and
/// return the status it ended up in.
pub async fn apply_appointment_action(
    state: &AppState,
    caller: &AuthUser,
    appointment_id: &str,
    action: AppointmentAction,
) -> Result<AppointmentStatus, WorkflowError> {
    require_admin(caller)?;

    if action == AppointmentAction::Reschedule {
        return Err(WorkflowError::Validation(
            "Rescheduling needs a new date and time.".into(),
        ));
    }

    let row = fetch_appointment(&state.db, appointment_id)
        .await
        .ok_or(WorkflowError::NotFound)?;
    let current = parse_status(&row)?;
    let next = current
        .apply(action)
        .ok_or(WorkflowError::InvalidTransition {
            status: current,
            action,
        })?;

    sqlx::query("UPDATE appointments SET status = ? WHERE id = ?")
        .bind(next.as_str())
        .bind(appointment_id)
        .execute(&state.db)
        .await?;

    // The write above is the commit point. Everything below is best-effort.
    log_activity(
        &state.db,
        "appointment_status",
        &format!(
            "{} set appointment {} to {}.",
            caller.display_name, appointment_id, next
        ),
        Some(&caller.id),
        Some(appointment_id),
    )
    .await;

    let status_url = format!("/status/{appointment_id}");
    match action {
        AppointmentAction::Confirm => {
            notify::notify_record(
                state,
                appointment_id,
                "Appointment confirmed",
                &confirmation_message(&row),
                Some(&status_url),
            )
            .await;
        }
        AppointmentAction::Cancel => {
            notify::notify_record(
                state,
                appointment_id,
                "Appointment cancelled",
                &cancellation_message(&row),
                Some(&status_url),
            )
            .await;
        }
        AppointmentAction::Complete | AppointmentAction::Reschedule => {}
    }

    let _ = state.events.send(ServerEvent::appointment(
        "appointment_updated",
        appointment_id,
        next.as_str(),
        format!("Status changed to {next}."),
        format!("{} {}", row.scheduled_date, row.scheduled_time),
    ));

    Ok(next)
}

/// Move an appointment to a new slot. A successful reschedule always lands
/// in `confirmed`, whatever active status the record held before.
pub async fn reschedule_appointment(
    state: &AppState,
    caller: &AuthUser,
    appointment_id: &str,
    new_date: &str,
    new_time: &str,
) -> Result<(), WorkflowError> {
    require_admin(caller)?;

    let row = fetch_appointment(&state.db, appointment_id)
        .await
        .ok_or(WorkflowError::NotFound)?;
    let current = parse_status(&row)?;
    let next = current
        .apply(AppointmentAction::Reschedule)
        .ok_or(WorkflowError::InvalidTransition {
            status: current,
            action: AppointmentAction::Reschedule,
        })?;

    if chrono::NaiveDate::parse_from_str(new_date, "%Y-%m-%d").is_err() {
        return Err(WorkflowError::Validation(
            "The new date is not a valid calendar date.".into(),
        ));
    }
    if !state.slots.contains(new_time) {
        return Err(WorkflowError::Validation(
            "The new time is not a bookable slot.".into(),
        ));
    }

    // Keep the old slot for the notification before overwriting it.
    let (old_date, old_time) = (row.scheduled_date.clone(), row.scheduled_time.clone());

    let booked =
        scheduling::booked_slots_excluding(&state.db, new_date, Some(appointment_id)).await?;
    if booked.contains(new_time) {
        return Err(WorkflowError::SlotTaken);
    }

    let result = sqlx::query(
        "UPDATE appointments SET scheduled_date = ?, scheduled_time = ?, status = ? WHERE id = ?",
    )
    .bind(new_date)
    .bind(new_time)
    .bind(next.as_str())
    .bind(appointment_id)
    .execute(&state.db)
    .await;

    if let Err(err) = result {
        if is_slot_conflict(&err) {
            return Err(WorkflowError::SlotTaken);
        }
        return Err(err.into());
    }

    log_activity(
        &state.db,
        "appointment_rescheduled",
        &format!(
            "{} moved appointment {} to {} {}.",
            caller.display_name, appointment_id, new_date, new_time
        ),
        Some(&caller.id),
        Some(appointment_id),
    )
    .await;

    let message = reschedule_message(&old_date, &old_time, new_date, new_time);
    let status_url = format!("/status/{appointment_id}");
    notify::notify_record(
        state,
        appointment_id,
        "Appointment rescheduled",
        &message,
        Some(&status_url),
    )
    .await;

    let _ = state.events.send(ServerEvent::appointment(
        "appointment_rescheduled",
        appointment_id,
        next.as_str(),
        message,
        format!("{new_date} {new_time}"),
    ));

    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct ShippingUpdateInput {
    pub status: Option<ShippingStatus>,
    pub message: Option<String>,
    pub location: Option<String>,
    pub tracking_number: Option<String>,
}

/// Record a shipping update on an order: set the status label, append a
/// history row, and stamp shipped/delivered the first time each is entered.
/// Transitions are intentionally unrestricted.
pub async fn update_shipping(
    state: &AppState,
    caller: &AuthUser,
    order_id: &str,
    input: &ShippingUpdateInput,
) -> Result<(), WorkflowError> {
    require_admin(caller)?;

    let order = fetch_order(&state.db, order_id)
        .await
        .ok_or(WorkflowError::NotFound)?;
    let status = input
        .status
        .ok_or_else(|| WorkflowError::Validation("A shipping status is required.".into()))?;

    let now = Utc::now().to_rfc3339();
    let shipped_at = match (status, &order.shipped_at) {
        (ShippingStatus::Shipped, None) => Some(now.clone()),
        _ => order.shipped_at.clone(),
    };
    let delivered_at = match (status, &order.delivered_at) {
        (ShippingStatus::Delivered, None) => Some(now.clone()),
        _ => order.delivered_at.clone(),
    };
    let tracking_number = input
        .tracking_number
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .or(order.tracking_number.clone());

    sqlx::query(
        r#"UPDATE orders
           SET shipping_status = ?, tracking_number = ?, shipped_at = ?, delivered_at = ?
           WHERE id = ?"#,
    )
    .bind(status.as_str())
    .bind(&tracking_number)
    .bind(&shipped_at)
    .bind(&delivered_at)
    .bind(order_id)
    .execute(&state.db)
    .await?;

    let message = input
        .message
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("Order is now {status}."));

    sqlx::query(
        r#"INSERT INTO shipping_updates (id, order_id, status, message, location, created_at)
           VALUES (?, ?, ?, ?, ?, ?)"#,
    )
    .bind(crate::auth::new_id())
    .bind(order_id)
    .bind(status.as_str())
    .bind(&message)
    .bind(&input.location)
    .bind(&now)
    .execute(&state.db)
    .await?;

    log_activity(
        &state.db,
        "shipping_update",
        &format!(
            "{} set order {} shipping to {}.",
            caller.display_name, order_id, status
        ),
        Some(&caller.id),
        Some(order_id),
    )
    .await;

    let order_url = format!("/orders/{order_id}");
    notify::notify_record(state, order_id, "Shipping update", &message, Some(&order_url)).await;

    let _ = state.events.send(ServerEvent::order(
        "order_updated",
        order_id,
        status.as_str(),
        message,
        tracking_number,
    ));

    Ok(())
}

/// Set the business-level order status. No customer notification; the
/// activity log and event stream still record it.
pub async fn update_order_status(
    state: &AppState,
    caller: &AuthUser,
    order_id: &str,
    status: OrderStatus,
) -> Result<(), WorkflowError> {
    require_admin(caller)?;

    let order = fetch_order(&state.db, order_id)
        .await
        .ok_or(WorkflowError::NotFound)?;

    sqlx::query("UPDATE orders SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(order_id)
        .execute(&state.db)
        .await?;

    log_activity(
        &state.db,
        "order_status",
        &format!(
            "{} set order {} to {}.",
            caller.display_name, order_id, status
        ),
        Some(&caller.id),
        Some(order_id),
    )
    .await;

    let _ = state.events.send(ServerEvent::order(
        "order_updated",
        order_id,
        &order.shipping_status,
        format!("Order status changed to {status}."),
        order.tracking_number,
    ));

    Ok(())
}

#[cfg(test)]
mod tests {
    use tokio::sync::broadcast;

    use super::*;
    use crate::{
        auth::new_id,
        scheduling::test_support::{insert_appointment, insert_service, memory_pool},
        scheduling::SlotGrid,
        state::PushConfig,
    };

    fn admin() -> AuthUser {
        AuthUser {
            id: "admin-1".to_string(),
            display_name: "Store Manager".to_string(),
            role: "admin".to_string(),
        }
    }

    fn customer() -> AuthUser {
        AuthUser {
            id: "user-1".to_string(),
            display_name: "Walk-in".to_string(),
            role: "customer".to_string(),
        }
    }

    async fn test_state() -> AppState {
        AppState {
            db: memory_pool().await,
            events: broadcast::channel(16).0,
            push: PushConfig::disabled(),
            slots: SlotGrid::business_hours(),
        }
    }

    async fn appointment_status(state: &AppState, id: &str) -> String {
        sqlx::query_scalar("SELECT status FROM appointments WHERE id = ?")
            .bind(id)
            .fetch_one(&state.db)
            .await
            .unwrap()
    }

    async fn insert_order(state: &AppState) -> String {
        let id = new_id();
        sqlx::query(
            r#"INSERT INTO orders
               (id, customer_name, customer_email, shipping_address, total_cents, shipping_cents,
                status, shipping_status, created_at)
               VALUES (?, 'Ava Moreno', 'ava@example.com', '12 Rose Lane', 9900, 0,
                       'pending', 'pending', '2024-01-01T00:00:00Z')"#,
        )
        .bind(&id)
        .execute(&state.db)
        .await
        .unwrap();
        id
    }

    #[actix_web::test]
    async fn non_admin_is_rejected_before_any_write() {
        let state = test_state().await;
        let service = insert_service(&state.db, "Radiance Facial", 6500).await;
        let id = insert_appointment(&state.db, &service, "2024-06-01", "10:00", "pending").await;

        let err = apply_appointment_action(&state, &customer(), &id, AppointmentAction::Confirm)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Unauthorized));
        assert_eq!(appointment_status(&state, &id).await, "pending");

        let err = reschedule_appointment(&state, &customer(), &id, "2024-06-02", "11:00")
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Unauthorized));
        let (date, time): (String, String) = sqlx::query_as(
            "SELECT scheduled_date, scheduled_time FROM appointments WHERE id = ?",
        )
        .bind(&id)
        .fetch_one(&state.db)
        .await
        .unwrap();
        assert_eq!((date.as_str(), time.as_str()), ("2024-06-01", "10:00"));
    }

    #[actix_web::test]
    async fn confirm_then_complete() {
        let state = test_state().await;
        let service = insert_service(&state.db, "Lash Lift", 5500).await;
        let id = insert_appointment(&state.db, &service, "2024-06-01", "09:00", "pending").await;

        let next = apply_appointment_action(&state, &admin(), &id, AppointmentAction::Confirm)
            .await
            .unwrap();
        assert_eq!(next, AppointmentStatus::Confirmed);
        assert_eq!(appointment_status(&state, &id).await, "confirmed");

        let next = apply_appointment_action(&state, &admin(), &id, AppointmentAction::Complete)
            .await
            .unwrap();
        assert_eq!(next, AppointmentStatus::Completed);
        assert_eq!(appointment_status(&state, &id).await, "completed");
    }

    #[actix_web::test]
    async fn invalid_transitions_leave_status_alone() {
        let state = test_state().await;
        let service = insert_service(&state.db, "Lash Lift", 5500).await;

        let pending =
            insert_appointment(&state.db, &service, "2024-06-01", "09:00", "pending").await;
        let err = apply_appointment_action(&state, &admin(), &pending, AppointmentAction::Complete)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidTransition { .. }));
        assert_eq!(appointment_status(&state, &pending).await, "pending");

        let done =
            insert_appointment(&state.db, &service, "2024-06-01", "10:00", "completed").await;
        let err = apply_appointment_action(&state, &admin(), &done, AppointmentAction::Cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidTransition { .. }));
        assert_eq!(appointment_status(&state, &done).await, "completed");

        let err = reschedule_appointment(&state, &admin(), &done, "2024-06-02", "11:00")
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidTransition { .. }));
    }

    #[actix_web::test]
    async fn missing_appointment_is_not_found() {
        let state = test_state().await;
        let err =
            apply_appointment_action(&state, &admin(), "nope", AppointmentAction::Confirm)
                .await
                .unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound));
    }

    #[actix_web::test]
    async fn reschedule_moves_the_slot_and_forces_confirmed() {
        let state = test_state().await;
        let service = insert_service(&state.db, "Gel Manicure", 4000).await;
        let id = insert_appointment(&state.db, &service, "2024-06-01", "10:00", "pending").await;

        reschedule_appointment(&state, &admin(), &id, "2024-06-03", "15:30")
            .await
            .unwrap();

        let (date, time, status): (String, String, String) = sqlx::query_as(
            "SELECT scheduled_date, scheduled_time, status FROM appointments WHERE id = ?",
        )
        .bind(&id)
        .fetch_one(&state.db)
        .await
        .unwrap();
        assert_eq!(date, "2024-06-03");
        assert_eq!(time, "15:30");
        assert_eq!(status, "confirmed");
    }

    #[test]
    fn reschedule_notice_names_the_original_slot() {
        let message = reschedule_message("2024-06-01", "10:00", "2024-06-03", "15:30");
        assert!(message.contains("2024-06-01"));
        assert!(message.contains("10:00"));
        assert!(message.contains("2024-06-03"));
        assert!(message.contains("15:30"));
    }

    #[actix_web::test]
    async fn reschedule_onto_a_taken_slot_is_a_conflict() {
        let state = test_state().await;
        let service = insert_service(&state.db, "Gel Manicure", 4000).await;
        let id = insert_appointment(&state.db, &service, "2024-06-01", "10:00", "pending").await;
        insert_appointment(&state.db, &service, "2024-06-02", "11:00", "confirmed").await;

        let err = reschedule_appointment(&state, &admin(), &id, "2024-06-02", "11:00")
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::SlotTaken));
        assert_eq!(appointment_status(&state, &id).await, "pending");
    }

    #[actix_web::test]
    async fn reschedule_to_its_own_slot_still_confirms() {
        let state = test_state().await;
        let service = insert_service(&state.db, "Gel Manicure", 4000).await;
        let id = insert_appointment(&state.db, &service, "2024-06-01", "10:00", "pending").await;

        reschedule_appointment(&state, &admin(), &id, "2024-06-01", "10:00")
            .await
            .unwrap();
        assert_eq!(appointment_status(&state, &id).await, "confirmed");
    }

    #[actix_web::test]
    async fn failed_notification_never_blocks_the_status_change() {
        let mut state = test_state().await;
        // Keys present (so dispatch runs) but unusable: signature building
        // fails before any network activity, and the failure is only logged.
        state.push = PushConfig {
            public_key: "not-a-key".to_string(),
            private_key: "!!definitely not base64!!".to_string(),
            subject: "mailto:test@example.com".to_string(),
        };
        let service = insert_service(&state.db, "Radiance Facial", 6500).await;
        let id = insert_appointment(&state.db, &service, "2024-06-01", "10:00", "pending").await;
        notify::store_subscription(
            &state.db,
            &id,
            r#"{"endpoint":"https://push.example/sub","keys":{"p256dh":"k","auth":"a"}}"#,
        )
        .await
        .unwrap();

        let next = apply_appointment_action(&state, &admin(), &id, AppointmentAction::Confirm)
            .await
            .unwrap();
        assert_eq!(next, AppointmentStatus::Confirmed);
        assert_eq!(appointment_status(&state, &id).await, "confirmed");
    }

    #[actix_web::test]
    async fn shipping_updates_append_history_and_stamp_once() {
        let state = test_state().await;
        let order = insert_order(&state).await;

        update_shipping(
            &state,
            &admin(),
            &order,
            &ShippingUpdateInput {
                status: Some(ShippingStatus::Shipped),
                message: Some("Left the warehouse".to_string()),
                location: Some("Portland, OR".to_string()),
                tracking_number: Some("TRK-123".to_string()),
            },
        )
        .await
        .unwrap();

        let row = fetch_order(&state.db, &order).await.unwrap();
        assert_eq!(row.shipping_status, "shipped");
        assert_eq!(row.tracking_number.as_deref(), Some("TRK-123"));
        let first_shipped_at = row.shipped_at.clone().unwrap();

        // Any status may follow any other; the shipped stamp is kept.
        update_shipping(
            &state,
            &admin(),
            &order,
            &ShippingUpdateInput {
                status: Some(ShippingStatus::Delivered),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        update_shipping(
            &state,
            &admin(),
            &order,
            &ShippingUpdateInput {
                status: Some(ShippingStatus::Shipped),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let row = fetch_order(&state.db, &order).await.unwrap();
        assert_eq!(row.shipping_status, "shipped");
        assert_eq!(row.shipped_at.as_deref(), Some(first_shipped_at.as_str()));
        assert!(row.delivered_at.is_some());

        let history = crate::db::fetch_shipping_history(&state.db, &order).await;
        assert_eq!(history.len(), 3);
        assert!(history.iter().any(|entry| entry.message == "Left the warehouse"));
    }

    #[actix_web::test]
    async fn non_admin_shipping_update_changes_nothing() {
        let state = test_state().await;
        let order = insert_order(&state).await;

        let err = update_shipping(
            &state,
            &customer(),
            &order,
            &ShippingUpdateInput {
                status: Some(ShippingStatus::Delivered),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, WorkflowError::Unauthorized));

        let row = fetch_order(&state.db, &order).await.unwrap();
        assert_eq!(row.shipping_status, "pending");
        assert!(crate::db::fetch_shipping_history(&state.db, &order)
            .await
            .is_empty());
    }

    #[actix_web::test]
    async fn order_status_is_admin_settable() {
        let state = test_state().await;
        let order = insert_order(&state).await;

        update_order_status(&state, &admin(), &order, OrderStatus::Processing)
            .await
            .unwrap();
        let row = fetch_order(&state.db, &order).await.unwrap();
        assert_eq!(row.status, "processing");

        let err = update_order_status(&state, &customer(), &order, OrderStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Unauthorized));
    }
}
