//! Transaction rows and their cancellation/refund associations.
//!
//! Every function takes the connection of an open unit of work (see
//! [`TransactionalExecutor`](super::TransactionalExecutor)) or a plain pooled
//! connection for read-only lookups.

use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{FromRow, SqliteConnection};
use uuid::Uuid;

use crate::{
    domain::{Cancellation, Order, PaymentStatus, Refund, Transaction},
    error::{AppError, Result},
    repository::order_repository,
};

#[derive(FromRow)]
struct TransactionRow {
    id: String,
    user_id: String,
    payment_method_id: String,
    admin_fee: i64,
    payment_method_fee: i64,
    total_price: i64,
    payment_status: String,
    invoice_id: Option<String>,
    payment_invoice_url: Option<String>,
    refund_amount: Option<i64>,
    refunded_at: Option<NaiveDateTime>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

#[derive(FromRow)]
struct CancellationRow {
    id: String,
    transaction_id: String,
    order_id: String,
    user_id: String,
    reason: Option<String>,
    created_at: NaiveDateTime,
}

#[derive(FromRow)]
struct RefundRow {
    id: String,
    transaction_id: String,
    idempotency_key: String,
    gateway_refund_id: String,
    amount: i64,
    created_at: NaiveDateTime,
}

/// A transaction loaded together with everything the gateway state machine
/// and the notification fan-out look at.
#[derive(Debug, Clone)]
pub struct TransactionWithRelations {
    pub transaction: Transaction,
    pub orders: Vec<Order>,
    pub cancellation: Option<Cancellation>,
    pub refund: Option<Refund>,
}

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| AppError::Database(e.to_string()))
}

pub(crate) fn to_utc(dt: NaiveDateTime) -> DateTime<Utc> {
    DateTime::from_naive_utc_and_offset(dt, Utc)
}

fn parse_payment_status(s: &str) -> Result<PaymentStatus> {
    PaymentStatus::parse(s).ok_or_else(|| AppError::Database(format!("Invalid payment status: {}", s)))
}

fn row_to_transaction(row: TransactionRow) -> Result<Transaction> {
    Ok(Transaction {
        id: parse_uuid(&row.id)?,
        user_id: parse_uuid(&row.user_id)?,
        payment_method_id: parse_uuid(&row.payment_method_id)?,
        admin_fee: row.admin_fee,
        payment_method_fee: row.payment_method_fee,
        total_price: row.total_price,
        payment_status: parse_payment_status(&row.payment_status)?,
        invoice_id: row.invoice_id,
        payment_invoice_url: row.payment_invoice_url,
        refund_amount: row.refund_amount,
        refunded_at: row.refunded_at.map(to_utc),
        created_at: to_utc(row.created_at),
        updated_at: to_utc(row.updated_at),
    })
}

fn row_to_cancellation(row: CancellationRow) -> Result<Cancellation> {
    Ok(Cancellation {
        id: parse_uuid(&row.id)?,
        transaction_id: parse_uuid(&row.transaction_id)?,
        order_id: parse_uuid(&row.order_id)?,
        user_id: parse_uuid(&row.user_id)?,
        reason: row.reason,
        created_at: to_utc(row.created_at),
    })
}

fn row_to_refund(row: RefundRow) -> Result<Refund> {
    Ok(Refund {
        id: parse_uuid(&row.id)?,
        transaction_id: parse_uuid(&row.transaction_id)?,
        idempotency_key: row.idempotency_key,
        gateway_refund_id: row.gateway_refund_id,
        amount: row.amount,
        created_at: to_utc(row.created_at),
    })
}

pub async fn insert(conn: &mut SqliteConnection, transaction: &Transaction) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO transactions (
            id, user_id, payment_method_id, admin_fee, payment_method_fee,
            total_price, payment_status, invoice_id, payment_invoice_url,
            refund_amount, refunded_at, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#
    )
    .bind(transaction.id.to_string())
    .bind(transaction.user_id.to_string())
    .bind(transaction.payment_method_id.to_string())
    .bind(transaction.admin_fee)
    .bind(transaction.payment_method_fee)
    .bind(transaction.total_price)
    .bind(transaction.payment_status.as_str())
    .bind(&transaction.invoice_id)
    .bind(&transaction.payment_invoice_url)
    .bind(transaction.refund_amount)
    .bind(transaction.refunded_at.map(|dt| dt.naive_utc()))
    .bind(transaction.created_at.naive_utc())
    .bind(transaction.updated_at.naive_utc())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn find_by_id(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<Transaction>> {
    let row = sqlx::query_as::<_, TransactionRow>(
        r#"
        SELECT id, user_id, payment_method_id, admin_fee, payment_method_fee,
               total_price, payment_status, invoice_id, payment_invoice_url,
               refund_amount, refunded_at, created_at, updated_at
        FROM transactions
        WHERE id = ?
        "#
    )
    .bind(id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    row.map(row_to_transaction).transpose()
}

/// Point lookup with the orders, latest cancellation and refund eagerly loaded.
pub async fn find_with_relations(
    conn: &mut SqliteConnection,
    id: Uuid,
) -> Result<Option<TransactionWithRelations>> {
    let Some(transaction) = find_by_id(conn, id).await? else {
        return Ok(None);
    };

    let orders = order_repository::list_by_transaction(conn, id).await?;
    let cancellation = find_cancellation(conn, id).await?;
    let refund = find_refund_by_transaction(conn, id).await?;

    Ok(Some(TransactionWithRelations {
        transaction,
        orders,
        cancellation,
        refund,
    }))
}

pub async fn update_payment_status(
    conn: &mut SqliteConnection,
    id: Uuid,
    status: PaymentStatus,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE transactions SET payment_status = ?, updated_at = ? WHERE id = ?"
    )
    .bind(status.as_str())
    .bind(Utc::now().naive_utc())
    .bind(id.to_string())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Transaction {} not found", id)));
    }
    Ok(())
}

pub async fn set_invoice(
    conn: &mut SqliteConnection,
    id: Uuid,
    invoice_id: &str,
    invoice_url: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE transactions
        SET invoice_id = ?, payment_invoice_url = ?, updated_at = ?
        WHERE id = ?
        "#
    )
    .bind(invoice_id)
    .bind(invoice_url)
    .bind(Utc::now().naive_utc())
    .bind(id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Flip a transaction to REFUNDED and record the money returned.
pub async fn mark_refunded(
    conn: &mut SqliteConnection,
    id: Uuid,
    amount: i64,
    refunded_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE transactions
        SET payment_status = ?, refund_amount = ?, refunded_at = ?, updated_at = ?
        WHERE id = ?
        "#
    )
    .bind(PaymentStatus::Refunded.as_str())
    .bind(amount)
    .bind(refunded_at.naive_utc())
    .bind(Utc::now().naive_utc())
    .bind(id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn find_cancellation(
    conn: &mut SqliteConnection,
    transaction_id: Uuid,
) -> Result<Option<Cancellation>> {
    let row = sqlx::query_as::<_, CancellationRow>(
        r#"
        SELECT id, transaction_id, order_id, user_id, reason, created_at
        FROM cancellations
        WHERE transaction_id = ?
        ORDER BY created_at DESC
        LIMIT 1
        "#
    )
    .bind(transaction_id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    row.map(row_to_cancellation).transpose()
}

pub async fn insert_cancellation(conn: &mut SqliteConnection, cancellation: &Cancellation) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO cancellations (id, transaction_id, order_id, user_id, reason, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#
    )
    .bind(cancellation.id.to_string())
    .bind(cancellation.transaction_id.to_string())
    .bind(cancellation.order_id.to_string())
    .bind(cancellation.user_id.to_string())
    .bind(&cancellation.reason)
    .bind(cancellation.created_at.naive_utc())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn find_refund_by_transaction(
    conn: &mut SqliteConnection,
    transaction_id: Uuid,
) -> Result<Option<Refund>> {
    let row = sqlx::query_as::<_, RefundRow>(
        r#"
        SELECT id, transaction_id, idempotency_key, gateway_refund_id, amount, created_at
        FROM refunds
        WHERE transaction_id = ?
        ORDER BY created_at DESC
        LIMIT 1
        "#
    )
    .bind(transaction_id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    row.map(row_to_refund).transpose()
}

pub async fn find_refund_by_key(conn: &mut SqliteConnection, key: &str) -> Result<Option<Refund>> {
    let row = sqlx::query_as::<_, RefundRow>(
        r#"
        SELECT id, transaction_id, idempotency_key, gateway_refund_id, amount, created_at
        FROM refunds
        WHERE idempotency_key = ?
        "#
    )
    .bind(key)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(row_to_refund).transpose()
}

/// Store a refund unless one with the same idempotency key already exists.
pub async fn insert_refund(conn: &mut SqliteConnection, refund: &Refund) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO refunds (id, transaction_id, idempotency_key, gateway_refund_id, amount, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(idempotency_key) DO NOTHING
        "#
    )
    .bind(refund.id.to_string())
    .bind(refund.transaction_id.to_string())
    .bind(&refund.idempotency_key)
    .bind(&refund.gateway_refund_id)
    .bind(refund.amount)
    .bind(refund.created_at.naive_utc())
    .execute(&mut *conn)
    .await?;

    Ok(())
}
