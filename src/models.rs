use std::fmt;

use serde::Serialize;

pub const ROLE_ADMIN: &str = "admin";

/// Lifecycle of a booked appointment. `Pending` and `Confirmed` hold their
/// time slot; `Completed` and `Cancelled` are terminal and release it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(AppointmentStatus::Pending),
            "confirmed" => Some(AppointmentStatus::Confirmed),
            "completed" => Some(AppointmentStatus::Completed),
            "cancelled" => Some(AppointmentStatus::Cancelled),
            _ => None,
        }
    }

    /// Active appointments are the ones that occupy a slot on the calendar.
    pub fn is_active(self) -> bool {
        matches!(self, AppointmentStatus::Pending | AppointmentStatus::Confirmed)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, AppointmentStatus::Completed | AppointmentStatus::Cancelled)
    }

    /// The admin transition table. Returns the next status, or `None` when
    /// the action is not allowed from the current status.
    pub fn apply(self, action: AppointmentAction) -> Option<Self> {
        match (self, action) {
            (AppointmentStatus::Pending, AppointmentAction::Confirm) => {
                Some(AppointmentStatus::Confirmed)
            }
            (AppointmentStatus::Pending, AppointmentAction::Cancel)
            | (AppointmentStatus::Confirmed, AppointmentAction::Cancel) => {
                Some(AppointmentStatus::Cancelled)
            }
            (AppointmentStatus::Confirmed, AppointmentAction::Complete) => {
                Some(AppointmentStatus::Completed)
            }
            // A successful reschedule implies acceptance, whatever the prior
            // active status was.
            (AppointmentStatus::Pending, AppointmentAction::Reschedule)
            | (AppointmentStatus::Confirmed, AppointmentAction::Reschedule) => {
                Some(AppointmentStatus::Confirmed)
            }
            _ => None,
        }
    }

    /// Actions an admin may take from this status, in display order.
    pub fn allowed_actions(self) -> Vec<AppointmentAction> {
        [
            AppointmentAction::Confirm,
            AppointmentAction::Complete,
            AppointmentAction::Cancel,
        ]
        .into_iter()
        .filter(|action| self.apply(*action).is_some())
        .collect()
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppointmentAction {
    Confirm,
    Cancel,
    Complete,
    Reschedule,
}

impl AppointmentAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentAction::Confirm => "confirm",
            AppointmentAction::Cancel => "cancel",
            AppointmentAction::Complete => "complete",
            AppointmentAction::Reschedule => "reschedule",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "confirm" => Some(AppointmentAction::Confirm),
            "cancel" => Some(AppointmentAction::Cancel),
            "complete" => Some(AppointmentAction::Complete),
            "reschedule" => Some(AppointmentAction::Reschedule),
            _ => None,
        }
    }
}

impl fmt::Display for AppointmentAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Business-level order status. Admin-settable, not a strict machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OrderStatus {
    Pending,
    Processing,
    Completed,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(OrderStatus::Pending),
            "processing" => Some(OrderStatus::Processing),
            "completed" => Some(OrderStatus::Completed),
            _ => None,
        }
    }

    pub fn all() -> [OrderStatus; 3] {
        [
            OrderStatus::Pending,
            OrderStatus::Processing,
            OrderStatus::Completed,
        ]
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shipping progress label. Deliberately permissive: any value may be set
/// from any other; the stored string is what the progress view renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ShippingStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
}

impl ShippingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ShippingStatus::Pending => "pending",
            ShippingStatus::Processing => "processing",
            ShippingStatus::Shipped => "shipped",
            ShippingStatus::Delivered => "delivered",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(ShippingStatus::Pending),
            "processing" => Some(ShippingStatus::Processing),
            "shipped" => Some(ShippingStatus::Shipped),
            "delivered" => Some(ShippingStatus::Delivered),
            _ => None,
        }
    }

    pub fn all() -> [ShippingStatus; 4] {
        [
            ShippingStatus::Pending,
            ShippingStatus::Processing,
            ShippingStatus::Shipped,
            ShippingStatus::Delivered,
        ]
    }
}

impl fmt::Display for ShippingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[allow(dead_code)]
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub role: String,
    pub password_hash: String,
    pub active: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ServiceRow {
    pub id: String,
    pub name: String,
    pub description: String,
    pub duration_minutes: i64,
    pub price_cents: i64,
    pub active: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CategoryRow {
    pub id: String,
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProductRow {
    pub id: String,
    pub category_id: Option<String>,
    pub name: String,
    pub description: String,
    pub price_cents: i64,
    pub stock: i64,
    pub active: i64,
}

#[allow(dead_code)]
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AppointmentRow {
    pub id: String,
    pub service_id: String,
    pub service_name: Option<String>,
    pub scheduled_date: String,
    pub scheduled_time: String,
    pub duration_minutes: i64,
    pub status: String,
    pub client_name: String,
    pub client_phone: String,
    pub client_email: Option<String>,
    pub notes: Option<String>,
    pub total_cents: i64,
    pub payment_status: String,
    pub requested_at: String,
}

#[allow(dead_code)]
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OrderRow {
    pub id: String,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub shipping_address: String,
    pub total_cents: i64,
    pub shipping_cents: i64,
    pub status: String,
    pub shipping_status: String,
    pub tracking_number: Option<String>,
    pub shipped_at: Option<String>,
    pub delivered_at: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OrderItemRow {
    pub id: String,
    pub order_id: String,
    pub product_id: String,
    pub product_name: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ShippingUpdateRow {
    pub id: String,
    pub order_id: String,
    pub status: String,
    pub message: String,
    pub location: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ActivityRow {
    pub message: String,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_transitions() {
        let pending = AppointmentStatus::Pending;
        assert_eq!(
            pending.apply(AppointmentAction::Confirm),
            Some(AppointmentStatus::Confirmed)
        );
        assert_eq!(
            pending.apply(AppointmentAction::Cancel),
            Some(AppointmentStatus::Cancelled)
        );
        assert_eq!(pending.apply(AppointmentAction::Complete), None);
        assert_eq!(
            pending.apply(AppointmentAction::Reschedule),
            Some(AppointmentStatus::Confirmed)
        );
    }

    #[test]
    fn confirmed_transitions() {
        let confirmed = AppointmentStatus::Confirmed;
        assert_eq!(
            confirmed.apply(AppointmentAction::Complete),
            Some(AppointmentStatus::Completed)
        );
        assert_eq!(
            confirmed.apply(AppointmentAction::Cancel),
            Some(AppointmentStatus::Cancelled)
        );
        assert_eq!(confirmed.apply(AppointmentAction::Confirm), None);
    }

    #[test]
    fn terminal_statuses_allow_nothing() {
        for status in [AppointmentStatus::Completed, AppointmentStatus::Cancelled] {
            assert!(status.is_terminal());
            assert!(status.allowed_actions().is_empty());
            assert_eq!(status.apply(AppointmentAction::Reschedule), None);
        }
    }

    #[test]
    fn only_active_statuses_hold_slots() {
        assert!(AppointmentStatus::Pending.is_active());
        assert!(AppointmentStatus::Confirmed.is_active());
        assert!(!AppointmentStatus::Completed.is_active());
        assert!(!AppointmentStatus::Cancelled.is_active());
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [
            AppointmentStatus::Pending,
            AppointmentStatus::Confirmed,
            AppointmentStatus::Completed,
            AppointmentStatus::Cancelled,
        ] {
            assert_eq!(AppointmentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(AppointmentStatus::parse("declined"), None);
    }
}
