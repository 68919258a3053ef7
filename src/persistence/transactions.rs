use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};

use super::Store;
use crate::error::StoreError;
use crate::idempotency::DurablePaymentLookup;
use crate::models::{
    Amount, CardIdentity, PaymentRequest, PaymentResult, PaymentStatus, ProviderType,
};

impl Store {
    /// Inserts a transaction record on first outcome, or updates it on a
    /// later outcome for the same key (spec.md §3 lifecycle: "updated on
    /// later adapter outcomes for the same key, never deleted").
    pub fn upsert_transaction(
        &self,
        request: &PaymentRequest,
        result: &PaymentResult,
    ) -> Result<(), StoreError> {
        let card_identity_json = serde_json::to_string(&result.card_identity)?;
        let metadata_json = serde_json::to_string(&result.metadata)?;
        let now = result.timestamp.to_rfc3339();
        let transaction_id = uuid::Uuid::new_v4().to_string();

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO transactions (
                idempotency_key, transaction_id, provider_type, status, amount_minor_units,
                currency_code, provider_transaction_id, failure_code, message,
                merchant_reference, customer_id, email, client_ip, card_identity_json,
                metadata_json, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?16)
            ON CONFLICT(idempotency_key) DO UPDATE SET
                status = excluded.status,
                provider_transaction_id = excluded.provider_transaction_id,
                failure_code = excluded.failure_code,
                message = excluded.message,
                card_identity_json = excluded.card_identity_json,
                metadata_json = excluded.metadata_json,
                updated_at = excluded.updated_at",
            params![
                result.idempotency_key,
                transaction_id,
                request.provider_type.to_string(),
                status_str(result.status),
                result.amount.minor_units(),
                result.currency_code.0,
                result.provider_transaction_id,
                result.failure_code,
                result.message,
                request.merchant_reference,
                request.customer_id,
                request.email,
                request.client_ip,
                card_identity_json,
                metadata_json,
                now,
            ],
        )?;
        Ok(())
    }

    pub fn find_transaction(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<PaymentResult>, StoreError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT status, amount_minor_units, currency_code, provider_transaction_id,
                    failure_code, message, card_identity_json, metadata_json, updated_at
             FROM transactions WHERE idempotency_key = ?1",
            params![idempotency_key],
            |row| {
                let status: String = row.get(0)?;
                let amount: i64 = row.get(1)?;
                let currency: String = row.get(2)?;
                let provider_transaction_id: Option<String> = row.get(3)?;
                let failure_code: Option<String> = row.get(4)?;
                let message: Option<String> = row.get(5)?;
                let card_identity_json: String = row.get(6)?;
                let metadata_json: String = row.get(7)?;
                let updated_at: String = row.get(8)?;
                Ok((
                    status,
                    amount,
                    currency,
                    provider_transaction_id,
                    failure_code,
                    message,
                    card_identity_json,
                    metadata_json,
                    updated_at,
                ))
            },
        )
        .optional()?
        .map(
            |(
                status,
                amount,
                currency,
                provider_transaction_id,
                failure_code,
                message,
                card_identity_json,
                metadata_json,
                updated_at,
            )| {
                Ok(PaymentResult {
                    idempotency_key: idempotency_key.to_string(),
                    provider_transaction_id,
                    status: parse_status(&status),
                    amount: Amount::from_minor_units(amount),
                    currency_code: currency.as_str().into(),
                    failure_code,
                    message,
                    timestamp: chrono::DateTime::parse_from_rfc3339(&updated_at)
                        .map(|dt| dt.with_timezone(&chrono::Utc))
                        .unwrap_or_else(|_| chrono::Utc::now()),
                    metadata: serde_json::from_str(&metadata_json)?,
                    card_identity: serde_json::from_str::<CardIdentity>(&card_identity_json)?,
                })
            },
        )
        .transpose()
    }

    /// Looked up by the refund orchestrator via the adapter name recorded
    /// in the original payment's metadata, falling back to the request's
    /// provider type when absent (spec.md §4.7 step 6).
    pub fn find_transaction_provider_type(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<ProviderType>, StoreError> {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row(
                "SELECT provider_type FROM transactions WHERE idempotency_key = ?1",
                params![idempotency_key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw.and_then(|s| parse_provider_type(&s)))
    }
}

fn status_str(status: PaymentStatus) -> &'static str {
    match status {
        PaymentStatus::Success => "SUCCESS",
        PaymentStatus::Captured => "CAPTURED",
        PaymentStatus::Failed => "FAILED",
        PaymentStatus::Reversed => "REVERSED",
        PaymentStatus::Pending => "PENDING",
    }
}

fn parse_status(s: &str) -> PaymentStatus {
    match s {
        "SUCCESS" => PaymentStatus::Success,
        "CAPTURED" => PaymentStatus::Captured,
        "REVERSED" => PaymentStatus::Reversed,
        "PENDING" => PaymentStatus::Pending,
        _ => PaymentStatus::Failed,
    }
}

fn parse_provider_type(s: &str) -> Option<ProviderType> {
    match s {
        "CARD" => Some(ProviderType::Card),
        "WALLET" => Some(ProviderType::Wallet),
        "BNPL" => Some(ProviderType::Bnpl),
        "BANK_TRANSFER" => Some(ProviderType::BankTransfer),
        "MOCK" => Some(ProviderType::Mock),
        _ => None,
    }
}

#[async_trait]
impl DurablePaymentLookup for Store {
    async fn find_payment_result(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<PaymentResult>, StoreError> {
        self.find_transaction(idempotency_key)
    }
}
