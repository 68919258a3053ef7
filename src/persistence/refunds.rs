use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};

use super::Store;
use crate::error::StoreError;
use crate::idempotency::DurableRefundLookup;
use crate::models::{Amount, RefundResult, RefundStatus};

/// Outcome of attempting to reserve a refund's amount against the
/// cumulative bound (spec.md §4.7 step 5 / invariant I2).
pub enum ReserveOutcome {
    /// The amount fit; a PENDING row was inserted and must be finalized via
    /// `finalize_refund` once the adapter call returns.
    Reserved,
    /// `reserve_refund` is idempotent on `idempotency_key`: a row for this
    /// refund key already existed (concurrent duplicate submission raced
    /// the orchestrator's own cache check).
    AlreadyReserved,
    /// Reserving this amount on top of what's already refunded/pending
    /// would exceed the payment's amount.
    WouldExceedBound { already_refunded: Amount },
}

impl Store {
    /// Atomically checks the cumulative bound and reserves `amount` for
    /// `idempotency_key` in one transaction, so the read (sum of
    /// successful-or-pending refunds) and the write (the new row) are
    /// serialized per payment key — spec.md §4.7: "a row lock on the
    /// payment key, or an equivalent compare-and-set, is required." PENDING
    /// rows count toward the sum so two concurrent refund requests can't
    /// both reserve past the bound while their adapter calls are in flight.
    pub fn reserve_refund(
        &self,
        idempotency_key: &str,
        payment_idempotency_key: &str,
        amount: Amount,
        currency_code: &str,
        payment_amount: Amount,
    ) -> Result<ReserveOutcome, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT status FROM refunds WHERE idempotency_key = ?1",
                params![idempotency_key],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            tx.rollback()?;
            return Ok(ReserveOutcome::AlreadyReserved);
        }

        let already_refunded: i64 = tx.query_row(
            "SELECT COALESCE(SUM(amount_minor_units), 0) FROM refunds
             WHERE payment_idempotency_key = ?1 AND status IN ('SUCCESS', 'PENDING')",
            params![payment_idempotency_key],
            |row| row.get(0),
        )?;

        let projected = already_refunded.saturating_add(amount.minor_units());
        if projected > payment_amount.minor_units() {
            tx.rollback()?;
            return Ok(ReserveOutcome::WouldExceedBound {
                already_refunded: Amount::from_minor_units(already_refunded),
            });
        }

        tx.execute(
            "INSERT INTO refunds (
                idempotency_key, payment_idempotency_key, status, amount_minor_units,
                currency_code, created_at
            ) VALUES (?1, ?2, 'PENDING', ?3, ?4, ?5)",
            params![
                idempotency_key,
                payment_idempotency_key,
                amount.minor_units(),
                currency_code,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        tx.commit()?;
        Ok(ReserveOutcome::Reserved)
    }

    /// Persists a refund that never reached `reserve_refund` — rejected
    /// before the cumulative-bound check (payment not found, not
    /// refundable, single-refund bound exceeded, adapter unresolved/
    /// unsupported). These don't occupy headroom against the bound, so a
    /// plain idempotent insert is enough; `ON CONFLICT DO NOTHING` keeps it
    /// safe against a racing duplicate submission.
    pub fn insert_terminal_refund(&self, result: &RefundResult) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO refunds (
                idempotency_key, payment_idempotency_key, status, amount_minor_units,
                currency_code, provider_transaction_id, failure_code, message, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(idempotency_key) DO NOTHING",
            params![
                result.idempotency_key,
                result.payment_idempotency_key,
                status_str(result.status),
                result.amount.minor_units(),
                result.currency_code.0,
                result.provider_transaction_id,
                result.failure_code,
                result.message,
                result.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Updates a PENDING row (from `reserve_refund`) to its terminal status
    /// once the adapter call has returned.
    pub fn finalize_refund(&self, result: &RefundResult) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE refunds SET
                status = ?2,
                provider_transaction_id = ?3,
                failure_code = ?4,
                message = ?5,
                created_at = ?6
             WHERE idempotency_key = ?1",
            params![
                result.idempotency_key,
                status_str(result.status),
                result.provider_transaction_id,
                result.failure_code,
                result.message,
                result.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn find_refund(&self, idempotency_key: &str) -> Result<Option<RefundResult>, StoreError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT payment_idempotency_key, status, amount_minor_units, currency_code,
                    provider_transaction_id, failure_code, message, created_at
             FROM refunds WHERE idempotency_key = ?1",
            params![idempotency_key],
            |row| {
                Ok(RefundResult {
                    idempotency_key: idempotency_key.to_string(),
                    payment_idempotency_key: row.get(0)?,
                    status: parse_status(&row.get::<_, String>(1)?),
                    amount: Amount::from_minor_units(row.get(2)?),
                    currency_code: row.get::<_, String>(3)?.as_str().into(),
                    provider_transaction_id: row.get(4)?,
                    failure_code: row.get(5)?,
                    message: row.get(6)?,
                    timestamp: chrono::DateTime::parse_from_rfc3339(&row.get::<_, String>(7)?)
                        .map(|dt| dt.with_timezone(&chrono::Utc))
                        .unwrap_or_else(|_| chrono::Utc::now()),
                })
            },
        )
        .optional()
        .map_err(StoreError::from)
    }
}

fn status_str(status: RefundStatus) -> &'static str {
    match status {
        RefundStatus::Success => "SUCCESS",
        RefundStatus::Failed => "FAILED",
        RefundStatus::Pending => "PENDING",
    }
}

fn parse_status(s: &str) -> RefundStatus {
    match s {
        "SUCCESS" => RefundStatus::Success,
        "PENDING" => RefundStatus::Pending,
        _ => RefundStatus::Failed,
    }
}

#[async_trait]
impl DurableRefundLookup for Store {
    async fn find_refund_result(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<RefundResult>, StoreError> {
        self.find_refund(idempotency_key)
    }
}
