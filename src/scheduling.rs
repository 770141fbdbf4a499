//! Booking availability and conflict-checked appointment creation.
//!
//! The calendar is a flat grid of half-hour labels shared by every service:
//! one appointment per slot per day, no staff or room capacity. Availability
//! is the grid minus the slots held by pending or confirmed appointments.
//! A booking is re-checked against the calendar just before insert, and the
//! partial unique index on `(scheduled_date, scheduled_time)` catches the
//! writer that loses a race anyway; both paths surface as [`BookingError::SlotTaken`].

use std::collections::HashSet;

use chrono::{NaiveDate, Utc};
use sqlx::SqlitePool;
use thiserror::Error;

use crate::{
    auth::new_id,
    models::{AppointmentStatus, ServiceRow},
};

/// Ordered list of bookable time-of-day labels. Injected from configuration;
/// the scheduling functions never reach for a global.
#[derive(Clone, Debug)]
pub struct SlotGrid {
    labels: Vec<String>,
}

impl SlotGrid {
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }

    /// Half-hour slots from 09:00 through 17:00 inclusive.
    pub fn business_hours() -> Self {
        let mut labels = Vec::new();
        for hour in 9..=17 {
            labels.push(format!("{hour:02}:00"));
            if hour < 17 {
                labels.push(format!("{hour:02}:30"));
            }
        }
        Self { labels }
    }

    /// Parse a comma-separated `HH:MM` list. Returns `None` when no entry
    /// survives, so callers can fall back to the default grid.
    pub fn from_spec(spec: &str) -> Option<Self> {
        let labels: Vec<String> = spec
            .split(',')
            .map(str::trim)
            .filter(|label| !label.is_empty())
            .map(str::to_string)
            .collect();
        if labels.is_empty() {
            None
        } else {
            Some(Self { labels })
        }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn contains(&self, label: &str) -> bool {
        self.labels.iter().any(|entry| entry == label)
    }
}

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("{0}")]
    Validation(String),
    #[error("This time slot was just booked by someone else. Please pick another time.")]
    SlotTaken,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Default)]
pub struct BookingRequest {
    pub service_id: String,
    pub date: String,
    pub time: String,
    pub client_name: String,
    pub client_phone: String,
    pub client_email: Option<String>,
    pub notes: Option<String>,
}

/// Slots currently held on `date` by active appointments.
pub async fn booked_slots(pool: &SqlitePool, date: &str) -> Result<HashSet<String>, sqlx::Error> {
    booked_slots_excluding(pool, date, None).await
}

/// Same as [`booked_slots`], optionally ignoring one appointment id. Used by
/// reschedule so an appointment does not collide with its own slot.
pub async fn booked_slots_excluding(
    pool: &SqlitePool,
    date: &str,
    skip_id: Option<&str>,
) -> Result<HashSet<String>, sqlx::Error> {
    let rows: Vec<(String,)> = sqlx::query_as(
        r#"SELECT scheduled_time FROM appointments
           WHERE scheduled_date = ? AND status IN (?, ?) AND id != ?"#,
    )
    .bind(date)
    .bind(AppointmentStatus::Pending.as_str())
    .bind(AppointmentStatus::Confirmed.as_str())
    .bind(skip_id.unwrap_or(""))
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|(time,)| time).collect())
}

/// The grid minus the booked set, preserving grid order. An empty day yields
/// the whole grid; a fully booked day yields an empty list.
pub async fn available_slots(
    pool: &SqlitePool,
    grid: &SlotGrid,
    date: &str,
) -> Result<Vec<String>, sqlx::Error> {
    let booked = booked_slots(pool, date).await?;
    Ok(grid
        .labels()
        .iter()
        .filter(|label| !booked.contains(label.as_str()))
        .cloned()
        .collect())
}

/// Field checks that run before any write. `date` must be a real calendar
/// date and `time` must be one of the grid labels.
pub fn validate_request(grid: &SlotGrid, request: &BookingRequest) -> Result<(), BookingError> {
    if request.client_name.trim().is_empty() {
        return Err(BookingError::Validation("Full name is required.".into()));
    }
    if request.client_phone.trim().is_empty() {
        return Err(BookingError::Validation("Phone number is required.".into()));
    }
    if request.service_id.trim().is_empty() {
        return Err(BookingError::Validation("Please select a service.".into()));
    }
    if request.date.trim().is_empty() || request.time.trim().is_empty() {
        return Err(BookingError::Validation(
            "Please pick a date and a time slot.".into(),
        ));
    }
    if NaiveDate::parse_from_str(&request.date, "%Y-%m-%d").is_err() {
        return Err(BookingError::Validation(
            "The appointment date is not a valid calendar date.".into(),
        ));
    }
    if !grid.contains(&request.time) {
        return Err(BookingError::Validation(
            "The selected time is not a bookable slot.".into(),
        ));
    }
    Ok(())
}

/// Create a pending appointment for the requested slot.
///
/// Runs validation, re-queries the booked set to catch bookings that landed
/// since the caller's availability snapshot, then inserts. A competing write
/// that sneaks in between the re-check and the insert trips the unique slot
/// index and is reported as [`BookingError::SlotTaken`] as well.
pub async fn submit_booking(
    pool: &SqlitePool,
    grid: &SlotGrid,
    request: &BookingRequest,
) -> Result<String, BookingError> {
    validate_request(grid, request)?;

    let service = sqlx::query_as::<_, ServiceRow>(
        r#"SELECT id, name, description, duration_minutes, price_cents, active
           FROM services WHERE id = ? AND active = 1 LIMIT 1"#,
    )
    .bind(&request.service_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| BookingError::Validation("The selected service is not available.".into()))?;

    let booked = booked_slots(pool, &request.date).await?;
    if booked.contains(&request.time) {
        return Err(BookingError::SlotTaken);
    }

    let appointment_id = new_id();
    let result = sqlx::query(
        r#"INSERT INTO appointments
           (id, service_id, scheduled_date, scheduled_time, duration_minutes, status,
            client_name, client_phone, client_email, notes, total_cents, payment_status, requested_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'unpaid', ?)"#,
    )
    .bind(&appointment_id)
    .bind(&service.id)
    .bind(&request.date)
    .bind(&request.time)
    .bind(service.duration_minutes)
    .bind(AppointmentStatus::Pending.as_str())
    .bind(request.client_name.trim())
    .bind(request.client_phone.trim())
    .bind(&request.client_email)
    .bind(&request.notes)
    .bind(service.price_cents)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await;

    match result {
        Ok(_) => Ok(appointment_id),
        Err(err) if is_slot_conflict(&err) => Err(BookingError::SlotTaken),
        Err(err) => Err(err.into()),
    }
}

/// True when the error is the unique-index violation raised by two active
/// appointments landing on the same (date, time).
pub fn is_slot_conflict(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}


#[cfg(test)]
mod tests {
    use super::test_support::{insert_appointment, insert_service, memory_pool};
    use super::*;

    fn request(service_id: &str, date: &str, time: &str) -> BookingRequest {
        BookingRequest {
            service_id: service_id.to_string(),
            date: date.to_string(),
            time: time.to_string(),
            client_name: "Ava Moreno".to_string(),
            client_phone: "555-0134".to_string(),
            client_email: Some("ava@example.com".to_string()),
            notes: None,
        }
    }

    #[test]
    fn business_hours_grid_shape() {
        let grid = SlotGrid::business_hours();
        assert_eq!(grid.labels().len(), 17);
        assert_eq!(grid.labels().first().unwrap(), "09:00");
        assert_eq!(grid.labels().last().unwrap(), "17:00");
        assert!(grid.contains("12:30"));
        assert!(!grid.contains("17:30"));
    }

    #[test]
    fn grid_spec_parsing() {
        let grid = SlotGrid::from_spec("10:00, 10:30 ,11:00").unwrap();
        assert_eq!(grid.labels(), ["10:00", "10:30", "11:00"]);
        assert!(SlotGrid::from_spec("  ,  ").is_none());
        assert!(SlotGrid::from_spec("").is_none());
    }

    #[actix_web::test]
    async fn empty_day_yields_full_grid() {
        let pool = memory_pool().await;
        let grid = SlotGrid::business_hours();

        let slots = available_slots(&pool, &grid, "2024-06-01").await.unwrap();
        assert_eq!(slots, grid.labels());
    }

    #[actix_web::test]
    async fn active_appointments_reduce_availability_in_order() {
        let pool = memory_pool().await;
        let grid = SlotGrid::business_hours();
        let service = insert_service(&pool, "Radiance Facial", 6500).await;

        insert_appointment(&pool, &service, "2024-06-01", "10:00", "confirmed").await;
        insert_appointment(&pool, &service, "2024-06-01", "14:30", "pending").await;
        // Other days never bleed through.
        insert_appointment(&pool, &service, "2024-06-02", "09:00", "confirmed").await;

        let slots = available_slots(&pool, &grid, "2024-06-01").await.unwrap();
        assert_eq!(slots.len(), 15);
        assert!(!slots.contains(&"10:00".to_string()));
        assert!(!slots.contains(&"14:30".to_string()));

        // Order of the remaining labels matches the grid.
        let expected: Vec<String> = grid
            .labels()
            .iter()
            .filter(|label| *label != "10:00" && *label != "14:30")
            .cloned()
            .collect();
        assert_eq!(slots, expected);
    }

    #[actix_web::test]
    async fn terminal_appointments_release_their_slot() {
        let pool = memory_pool().await;
        let grid = SlotGrid::business_hours();
        let service = insert_service(&pool, "Brow Shaping", 2500).await;

        insert_appointment(&pool, &service, "2024-06-01", "11:00", "cancelled").await;
        insert_appointment(&pool, &service, "2024-06-01", "11:30", "completed").await;

        let slots = available_slots(&pool, &grid, "2024-06-01").await.unwrap();
        assert_eq!(slots, grid.labels());
    }

    #[actix_web::test]
    async fn availability_reads_are_idempotent() {
        let pool = memory_pool().await;
        let grid = SlotGrid::business_hours();
        let service = insert_service(&pool, "Gel Manicure", 4000).await;
        insert_appointment(&pool, &service, "2024-06-01", "09:30", "pending").await;

        let first = available_slots(&pool, &grid, "2024-06-01").await.unwrap();
        let second = available_slots(&pool, &grid, "2024-06-01").await.unwrap();
        assert_eq!(first, second);
    }

    #[actix_web::test]
    async fn booking_requires_date_and_time() {
        let pool = memory_pool().await;
        let grid = SlotGrid::business_hours();
        let service = insert_service(&pool, "Radiance Facial", 6500).await;

        let missing_time = request(&service, "2024-06-01", "");
        let err = submit_booking(&pool, &grid, &missing_time).await.unwrap_err();
        assert!(matches!(err, BookingError::Validation(_)));

        let bad_date = request(&service, "2024-13-40", "10:00");
        let err = submit_booking(&pool, &grid, &bad_date).await.unwrap_err();
        assert!(matches!(err, BookingError::Validation(_)));

        let off_grid = request(&service, "2024-06-01", "17:45");
        let err = submit_booking(&pool, &grid, &off_grid).await.unwrap_err();
        assert!(matches!(err, BookingError::Validation(_)));

        // Nothing was written by any of the rejected attempts.
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM appointments")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[actix_web::test]
    async fn booking_captures_service_price_and_duration() {
        let pool = memory_pool().await;
        let grid = SlotGrid::business_hours();
        let service = insert_service(&pool, "Radiance Facial", 6500).await;

        let id = submit_booking(&pool, &grid, &request(&service, "2024-06-01", "10:00"))
            .await
            .unwrap();

        let (status, total, duration): (String, i64, i64) = sqlx::query_as(
            "SELECT status, total_cents, duration_minutes FROM appointments WHERE id = ?",
        )
        .bind(&id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(status, "pending");
        assert_eq!(total, 6500);
        assert_eq!(duration, 45);
    }

    #[actix_web::test]
    async fn booked_slot_is_rejected_on_fresh_check() {
        let pool = memory_pool().await;
        let grid = SlotGrid::business_hours();
        let service = insert_service(&pool, "Radiance Facial", 6500).await;
        insert_appointment(&pool, &service, "2024-06-01", "10:00", "confirmed").await;

        let err = submit_booking(&pool, &grid, &request(&service, "2024-06-01", "10:00"))
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::SlotTaken));
    }

    #[actix_web::test]
    async fn race_past_the_precheck_hits_the_unique_index() {
        let pool = memory_pool().await;
        let service = insert_service(&pool, "Radiance Facial", 6500).await;

        // Two writers both passed their pre-check for the same slot; the
        // second insert must fail on the partial unique index and classify
        // as a slot conflict.
        insert_appointment(&pool, &service, "2024-06-01", "10:00", "pending").await;
        let second = sqlx::query(
            r#"INSERT INTO appointments
               (id, service_id, scheduled_date, scheduled_time, duration_minutes, status,
                client_name, client_phone, total_cents, payment_status, requested_at)
               VALUES ('race-loser', ?, '2024-06-01', '10:00', 45, 'pending',
                       'Second Writer', '555-0199', 6500, 'unpaid', '2024-01-01T00:00:00Z')"#,
        )
        .bind(&service)
        .execute(&pool)
        .await;

        let err = second.unwrap_err();
        assert!(is_slot_conflict(&err));

        // A cancelled row does not hold the slot, so re-booking works.
        sqlx::query("UPDATE appointments SET status = 'cancelled' WHERE scheduled_time = '10:00'")
            .execute(&pool)
            .await
            .unwrap();
        let grid = SlotGrid::business_hours();
        submit_booking(&pool, &grid, &request(&service, "2024-06-01", "10:00"))
            .await
            .unwrap();
    }

    #[actix_web::test]
    async fn unknown_service_is_a_validation_error() {
        let pool = memory_pool().await;
        let grid = SlotGrid::business_hours();

        let err = submit_booking(&pool, &grid, &request("missing", "2024-06-01", "10:00"))
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::Validation(_)));
    }
}
