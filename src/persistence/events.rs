use rusqlite::params;

use super::Store;
use crate::error::StoreError;
use crate::models::PaymentEvent;

impl Store {
    pub fn insert_event(&self, event: &PaymentEvent) -> Result<(), StoreError> {
        let payload_json = serde_json::to_string(event)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO payment_events (event_id, idempotency_key, event_type, payload_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(event_id) DO NOTHING",
            params![
                event.event_id,
                event.idempotency_key,
                event_type_str(event.event_type),
                payload_json,
                event.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Consumer-side dedup, spec.md §4.8: "Consumer-side idempotency is by
    /// eventId." Returns `true` (and records the id) only the first time a
    /// given event is seen.
    pub fn mark_event_processed_if_new(&self, event_id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO processed_events (event_id, processed_at) VALUES (?1, ?2)",
            params![event_id, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(inserted > 0)
    }
}

fn event_type_str(event_type: crate::models::EventType) -> &'static str {
    use crate::models::EventType::*;
    match event_type {
        PaymentRequested => "PAYMENT_REQUESTED",
        PaymentCompleted => "PAYMENT_COMPLETED",
        PaymentFailed => "PAYMENT_FAILED",
    }
}
