use std::env;

use crate::{scheduling::SlotGrid, state::PushConfig};

/// Process configuration, read once at startup. Every value has a default so
/// a bare `cargo run` comes up on a local SQLite file.
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub slots: SlotGrid,
    pub push: PushConfig,
}

impl Config {
    pub fn load() -> Self {
        Self {
            port: parse_or("PORT", 8080),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://./data/lumea.db".to_string()),
            slots: slot_grid(),
            push: PushConfig {
                public_key: env::var("VAPID_PUBLIC_KEY").unwrap_or_default(),
                private_key: env::var("VAPID_PRIVATE_KEY").unwrap_or_default(),
                subject: env::var("VAPID_SUBJECT")
                    .unwrap_or_else(|_| "mailto:hello@lumea.example".to_string()),
            },
        }
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(value) => value.parse().unwrap_or_else(|_| {
            log::warn!("Invalid {key} value, using default");
            default
        }),
        Err(_) => default,
    }
}

/// Booking grid override, e.g. `BOOKING_SLOTS="10:00,10:30,11:00"`. Falls
/// back to the standard business-hours grid when unset or unparsable.
fn slot_grid() -> SlotGrid {
    match env::var("BOOKING_SLOTS") {
        Ok(spec) => match SlotGrid::from_spec(&spec) {
            Some(grid) => grid,
            None => {
                log::warn!("BOOKING_SLOTS is empty or malformed, using default grid");
                SlotGrid::business_hours()
            }
        },
        Err(_) => SlotGrid::business_hours(),
    }
}
