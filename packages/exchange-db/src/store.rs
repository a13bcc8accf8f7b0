//! Postgres implementation of [`exchange_core::store::Store`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use exchange_core::amount::{Amount, AmountArithmeticError};
use exchange_core::store::{
    ClosingRecord, Reserve, ReserveHistoryEntry, Store, StoreError, WireFee, WirePrepareRecord,
    WithdrawOutcome, WithdrawRequest,
};
use sqlx::postgres::PgPool;
use sqlx::Row;
use tracing::warn;

use crate::amount_codec;
use crate::models::{ReserveCloseRow, ReserveInRow, ReserveOutRow, ReserveRow, WireFeeRow};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Postgres signals a serializable-transaction conflict with SQLSTATE
/// `40001` and a detected deadlock with `40P01`; both are safe to retry
/// from scratch. Everything else is treated as fatal.
fn classify_db_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = err {
        if let Some(code) = db_err.code() {
            if code == "40001" || code == "40P01" {
                return StoreError::SoftError(err.to_string());
            }
        }
    }
    StoreError::HardError(err.to_string())
}

fn reserve_from_row(row: ReserveRow) -> Result<Reserve, StoreError> {
    let reserve_pub: [u8; 32] = row
        .reserve_pub
        .try_into()
        .map_err(|_| StoreError::HardError("reserve_pub column has wrong length".to_string()))?;
    let balance = amount_codec::decode(
        row.current_balance_val,
        row.current_balance_frac,
        &row.current_balance_curr,
    )
    .map_err(|e| StoreError::HardError(e.to_string()))?;
    Ok(Reserve {
        reserve_pub,
        balance,
        expiration_date: row.expiration_date,
        sender_account: row.sender_account,
    })
}

async fn fetch_credits<'e, E>(
    executor: E,
    reserve_pub: &[u8; 32],
) -> Result<Vec<ReserveHistoryEntry>, StoreError>
where
    E: sqlx::PgExecutor<'e>,
{
    let rows = sqlx::query_as::<_, ReserveInRow>(
        r#"SELECT reserve_pub, wire_reference, credit_val, credit_frac, credit_curr, execution_date
           FROM reserves_in WHERE reserve_pub = $1"#,
    )
    .bind(&reserve_pub[..])
    .fetch_all(executor)
    .await
    .map_err(classify_db_error)?;

    rows.into_iter()
        .map(|row| {
            let amount = amount_codec::decode(row.credit_val, row.credit_frac, &row.credit_curr)
                .map_err(|e| StoreError::HardError(e.to_string()))?;
            Ok(ReserveHistoryEntry::Credit {
                amount,
                wire_reference: row.wire_reference,
                timestamp: row.execution_date,
            })
        })
        .collect()
}

async fn fetch_withdrawals<'e, E>(
    executor: E,
    reserve_pub: &[u8; 32],
) -> Result<Vec<ReserveHistoryEntry>, StoreError>
where
    E: sqlx::PgExecutor<'e>,
{
    let rows = sqlx::query_as::<_, ReserveOutRow>(
        r#"SELECT h_coin_envelope, reserve_pub, denom_pub_hash, reserve_sig, blinded_coin,
                  blind_signature, amount_with_fee_val, amount_with_fee_frac,
                  amount_with_fee_curr, execution_date
           FROM reserves_out WHERE reserve_pub = $1"#,
    )
    .bind(&reserve_pub[..])
    .fetch_all(executor)
    .await
    .map_err(classify_db_error)?;

    rows.into_iter()
        .map(|row| {
            let amount_with_fee = amount_codec::decode(
                row.amount_with_fee_val,
                row.amount_with_fee_frac,
                &row.amount_with_fee_curr,
            )
            .map_err(|e| StoreError::HardError(e.to_string()))?;
            let denom_pub_hash: [u8; 64] = row
                .denom_pub_hash
                .try_into()
                .map_err(|_| StoreError::HardError("denom_pub_hash has wrong length".to_string()))?;
            let h_coin_envelope: [u8; 64] = row
                .h_coin_envelope
                .try_into()
                .map_err(|_| StoreError::HardError("h_coin_envelope has wrong length".to_string()))?;
            Ok(ReserveHistoryEntry::Withdraw {
                amount_with_fee,
                denom_pub_hash,
                h_coin_envelope,
                timestamp: row.execution_date,
            })
        })
        .collect()
}

async fn fetch_closings<'e, E>(
    executor: E,
    reserve_pub: &[u8; 32],
) -> Result<Vec<ReserveHistoryEntry>, StoreError>
where
    E: sqlx::PgExecutor<'e>,
{
    let rows = sqlx::query_as::<_, ReserveCloseRow>(
        r#"SELECT reserve_pub, wtid, amount_val, amount_frac, amount_curr,
                  closing_fee_val, closing_fee_frac, closing_fee_curr, execution_date
           FROM reserves_close WHERE reserve_pub = $1"#,
    )
    .bind(&reserve_pub[..])
    .fetch_all(executor)
    .await
    .map_err(classify_db_error)?;

    rows.into_iter()
        .map(|row| {
            let amount = amount_codec::decode(row.amount_val, row.amount_frac, &row.amount_curr)
                .map_err(|e| StoreError::HardError(e.to_string()))?;
            let closing_fee = amount_codec::decode(
                row.closing_fee_val,
                row.closing_fee_frac,
                &row.closing_fee_curr,
            )
            .map_err(|e| StoreError::HardError(e.to_string()))?;
            let wtid: [u8; 32] = row
                .wtid
                .try_into()
                .map_err(|_| StoreError::HardError("wtid has wrong length".to_string()))?;
            Ok(ReserveHistoryEntry::Closing {
                amount,
                closing_fee,
                wtid,
                timestamp: row.execution_date,
            })
        })
        .collect()
}

fn sort_history(entries: &mut [ReserveHistoryEntry]) {
    entries.sort_by_key(|e| match e {
        ReserveHistoryEntry::Credit { timestamp, .. } => *timestamp,
        ReserveHistoryEntry::Withdraw { timestamp, .. } => *timestamp,
        ReserveHistoryEntry::Closing { timestamp, .. } => *timestamp,
    });
}

#[async_trait]
impl Store for PgStore {
    async fn get_reserve(&self, reserve_pub: &[u8; 32]) -> Result<Option<Reserve>, StoreError> {
        let row = sqlx::query_as::<_, ReserveRow>(
            r#"SELECT reserve_pub, current_balance_val, current_balance_frac,
                      current_balance_curr, expiration_date, sender_account, closed_at
               FROM reserves WHERE reserve_pub = $1"#,
        )
        .bind(&reserve_pub[..])
        .fetch_optional(&self.pool)
        .await
        .map_err(classify_db_error)?;

        row.map(reserve_from_row).transpose()
    }

    async fn get_reserve_history(
        &self,
        reserve_pub: &[u8; 32],
    ) -> Result<Vec<ReserveHistoryEntry>, StoreError> {
        let mut entries = Vec::new();
        entries.extend(fetch_credits(&self.pool, reserve_pub).await?);
        entries.extend(fetch_withdrawals(&self.pool, reserve_pub).await?);
        entries.extend(fetch_closings(&self.pool, reserve_pub).await?);
        sort_history(&mut entries);
        Ok(entries)
    }

    async fn do_withdraw(
        &self,
        request: &WithdrawRequest,
        blind_signature: &[u8],
    ) -> Result<WithdrawOutcome, StoreError> {
        let mut tx = self.pool.begin().await.map_err(classify_db_error)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(classify_db_error)?;

        let existing = sqlx::query("SELECT blind_signature FROM reserves_out WHERE h_coin_envelope = $1")
            .bind(&request.h_coin_envelope[..])
            .fetch_optional(&mut *tx)
            .await
            .map_err(classify_db_error)?;
        if let Some(row) = existing {
            let blind_signature: Vec<u8> = row.get("blind_signature");
            tx.commit().await.map_err(classify_db_error)?;
            return Ok(WithdrawOutcome::AlreadyApplied { blind_signature });
        }

        let reserve_row = sqlx::query_as::<_, ReserveRow>(
            r#"SELECT reserve_pub, current_balance_val, current_balance_frac,
                      current_balance_curr, expiration_date, sender_account, closed_at
               FROM reserves WHERE reserve_pub = $1 FOR UPDATE"#,
        )
        .bind(&request.reserve_pub[..])
        .fetch_optional(&mut *tx)
        .await
        .map_err(classify_db_error)?;

        let Some(reserve_row) = reserve_row else {
            tx.rollback().await.map_err(classify_db_error)?;
            return Ok(WithdrawOutcome::ReserveUnknown);
        };
        let reserve = reserve_from_row(reserve_row)?;

        let subtracted = Amount::subtract(reserve.balance, request.amount_with_fee);
        let (new_balance, _) = match subtracted {
            Ok(ok) => ok,
            Err(AmountArithmeticError::NegativeResult) => {
                let history = self.get_reserve_history_in_tx(&mut tx, &request.reserve_pub).await?;
                tx.rollback().await.map_err(classify_db_error)?;
                return Ok(WithdrawOutcome::InsufficientFunds {
                    balance: reserve.balance,
                    history,
                });
            }
            Err(e) => {
                tx.rollback().await.map_err(classify_db_error)?;
                return Err(StoreError::HardError(format!(
                    "reserve balance arithmetic failed while withdrawing: {e}"
                )));
            }
        };

        let cols = amount_codec::encode(&new_balance);
        sqlx::query(
            r#"UPDATE reserves SET current_balance_val = $1, current_balance_frac = $2,
                      current_balance_curr = $3 WHERE reserve_pub = $4"#,
        )
        .bind(cols.value)
        .bind(cols.fraction)
        .bind(&cols.currency)
        .bind(&request.reserve_pub[..])
        .execute(&mut *tx)
        .await
        .map_err(classify_db_error)?;

        let fee_cols = amount_codec::encode(&request.amount_with_fee);
        sqlx::query(
            r#"INSERT INTO reserves_out
                 (h_coin_envelope, reserve_pub, denom_pub_hash, reserve_sig, blinded_coin,
                  blind_signature, amount_with_fee_val, amount_with_fee_frac, amount_with_fee_curr)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"#,
        )
        .bind(&request.h_coin_envelope[..])
        .bind(&request.reserve_pub[..])
        .bind(&request.denom_pub_hash[..])
        .bind(&request.reserve_sig[..])
        .bind(&request.blinded_coin)
        .bind(blind_signature)
        .bind(fee_cols.value)
        .bind(fee_cols.fraction)
        .bind(&fee_cols.currency)
        .execute(&mut *tx)
        .await
        .map_err(classify_db_error)?;

        tx.commit().await.map_err(classify_db_error)?;
        Ok(WithdrawOutcome::Applied {
            blind_signature: blind_signature.to_vec(),
        })
    }

    async fn expired_reserves(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Reserve>, StoreError> {
        let rows = sqlx::query_as::<_, ReserveRow>(
            r#"SELECT reserve_pub, current_balance_val, current_balance_frac,
                      current_balance_curr, expiration_date, sender_account, closed_at
               FROM reserves
               WHERE expiration_date < $1 AND closed_at IS NULL
               ORDER BY expiration_date ASC
               LIMIT $2"#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(classify_db_error)?;

        rows.into_iter().map(reserve_from_row).collect()
    }

    async fn commit_closure(
        &self,
        closing: &ClosingRecord,
        wire_prepare: Option<&WirePrepareRecord>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(classify_db_error)?;

        let amount_cols = amount_codec::encode(&closing.amount);
        let fee_cols = amount_codec::encode(&closing.closing_fee);
        sqlx::query(
            r#"INSERT INTO reserves_close
                 (reserve_pub, wtid, amount_val, amount_frac, amount_curr,
                  closing_fee_val, closing_fee_frac, closing_fee_curr, execution_date)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"#,
        )
        .bind(&closing.reserve_pub[..])
        .bind(&closing.wtid[..])
        .bind(amount_cols.value)
        .bind(amount_cols.fraction)
        .bind(&amount_cols.currency)
        .bind(fee_cols.value)
        .bind(fee_cols.fraction)
        .bind(&fee_cols.currency)
        .bind(closing.timestamp)
        .execute(&mut *tx)
        .await
        .map_err(classify_db_error)?;

        sqlx::query("UPDATE reserves SET closed_at = $1 WHERE reserve_pub = $2")
            .bind(closing.timestamp)
            .bind(&closing.reserve_pub[..])
            .execute(&mut *tx)
            .await
            .map_err(classify_db_error)?;

        if let Some(wire_prepare) = wire_prepare {
            let wire_cols = amount_codec::encode(&wire_prepare.amount);
            sqlx::query(
                r#"INSERT INTO wire_prepare (wtid, payto_uri, amount_val, amount_frac, amount_curr, exchange_base_url)
                   VALUES ($1, $2, $3, $4, $5, $6)"#,
            )
            .bind(&wire_prepare.wtid[..])
            .bind(&wire_prepare.payto_uri)
            .bind(wire_cols.value)
            .bind(wire_cols.fraction)
            .bind(&wire_cols.currency)
            .bind(&wire_prepare.exchange_base_url)
            .execute(&mut *tx)
            .await
            .map_err(classify_db_error)?;
        }

        tx.commit().await.map_err(classify_db_error)?;
        warn!(
            reserve_pub = %hex::encode(closing.reserve_pub),
            wire_transfer_staged = wire_prepare.is_some(),
            "reserve closed"
        );
        Ok(())
    }

    async fn get_wire_fee(&self, method: &str, at: DateTime<Utc>) -> Result<WireFee, StoreError> {
        let row = sqlx::query_as::<_, WireFeeRow>(
            r#"SELECT wire_fee_val, wire_fee_frac, wire_fee_curr,
                      closing_fee_val, closing_fee_frac, closing_fee_curr,
                      start_date, end_date
               FROM wire_fee
               WHERE method = $1 AND start_date <= $2 AND $2 < end_date"#,
        )
        .bind(method)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify_db_error)?;

        let row = row.ok_or_else(|| {
            StoreError::HardError(format!("no wire fee schedule covers method {method} at {at}"))
        })?;

        let wire_fee = amount_codec::decode(row.wire_fee_val, row.wire_fee_frac, &row.wire_fee_curr)
            .map_err(|e| StoreError::HardError(e.to_string()))?;
        let closing_fee = amount_codec::decode(
            row.closing_fee_val,
            row.closing_fee_frac,
            &row.closing_fee_curr,
        )
        .map_err(|e| StoreError::HardError(e.to_string()))?;

        Ok(WireFee {
            wire_fee,
            closing_fee,
            start_date: row.start_date,
            end_date: row.end_date,
        })
    }
}

impl PgStore {
    async fn get_reserve_history_in_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        reserve_pub: &[u8; 32],
    ) -> Result<Vec<ReserveHistoryEntry>, StoreError> {
        let mut entries = Vec::new();
        entries.extend(fetch_credits(&mut **tx, reserve_pub).await?);
        entries.extend(fetch_withdrawals(&mut **tx, reserve_pub).await?);
        entries.extend(fetch_closings(&mut **tx, reserve_pub).await?);
        sort_history(&mut entries);
        Ok(entries)
    }
}
