use rusqlite::params;

use super::Store;
use crate::error::StoreError;
use crate::models::{AlertLevel, RiskAlert};

impl Store {
    pub fn insert_alert(&self, alert: &RiskAlert) -> Result<(), StoreError> {
        let payload_json = serde_json::to_string(alert)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO risk_alerts (alert_id, entity_id, entity_type, level, risk_score, payload_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(alert_id) DO NOTHING",
            params![
                alert.alert_id,
                alert.entity_id,
                alert.entity_type.to_string(),
                level_str(alert.level),
                alert.risk_score,
                payload_json,
                alert.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// `GET /risk/alerts?limit=N`: last N alerts, reverse chronological
    /// (spec.md §6).
    pub fn recent_alerts(&self, limit: usize) -> Result<Vec<RiskAlert>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT payload_json FROM risk_alerts ORDER BY created_at DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.iter()
            .map(|json| serde_json::from_str(json).map_err(StoreError::from))
            .collect()
    }

    pub fn subscribe_webhook(&self, entity_id: &str, webhook_url: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO webhook_subscriptions (entity_id, webhook_url, created_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(entity_id, webhook_url) DO NOTHING",
            params![entity_id, webhook_url, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn unsubscribe_webhook(&self, entity_id: &str, webhook_url: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM webhook_subscriptions WHERE entity_id = ?1 AND webhook_url = ?2",
            params![entity_id, webhook_url],
        )?;
        Ok(())
    }

    pub fn list_webhooks(&self, entity_id: &str) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT webhook_url FROM webhook_subscriptions WHERE entity_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt
            .query_map(params![entity_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn level_str(level: AlertLevel) -> &'static str {
    match level {
        AlertLevel::Low => "LOW",
        AlertLevel::Medium => "MEDIUM",
        AlertLevel::High => "HIGH",
        AlertLevel::Critical => "CRITICAL",
    }
}
