use chrono::{NaiveDateTime, Utc};
use sqlx::{FromRow, SqliteConnection};
use uuid::Uuid;

use crate::{
    domain::ETicket,
    error::Result,
    repository::transaction_repository::{parse_uuid, to_utc},
};

#[derive(FromRow)]
struct TicketRow {
    id: String,
    user_id: String,
    order_id: String,
    ticket_number: i64,
    created_at: NaiveDateTime,
}

fn row_to_ticket(row: TicketRow) -> Result<ETicket> {
    Ok(ETicket {
        id: parse_uuid(&row.id)?,
        user_id: parse_uuid(&row.user_id)?,
        order_id: parse_uuid(&row.order_id)?,
        ticket_number: row.ticket_number,
        created_at: to_utc(row.created_at),
    })
}

/// Next number of the global ticket sequence: highest issued number + 1,
/// starting at 1.
///
/// Only race-free when called inside a write unit of work, which holds the
/// database write lock from the max() read until the insert commits.
pub async fn next_ticket_number(conn: &mut SqliteConnection) -> Result<i64> {
    let last = sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(ticket_number) FROM etickets")
        .fetch_one(&mut *conn)
        .await?;

    Ok(last.unwrap_or(0) + 1)
}

/// Allocate the next number and store a ticket for `order_id`.
pub async fn issue(conn: &mut SqliteConnection, user_id: Uuid, order_id: Uuid) -> Result<ETicket> {
    let ticket = ETicket {
        id: Uuid::new_v4(),
        user_id,
        order_id,
        ticket_number: next_ticket_number(conn).await?,
        created_at: Utc::now(),
    };

    sqlx::query(
        r#"
        INSERT INTO etickets (id, user_id, order_id, ticket_number, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#
    )
    .bind(ticket.id.to_string())
    .bind(ticket.user_id.to_string())
    .bind(ticket.order_id.to_string())
    .bind(ticket.ticket_number)
    .bind(ticket.created_at.naive_utc())
    .execute(&mut *conn)
    .await?;

    tracing::debug!("Issued ticket #{} for order {}", ticket.ticket_number, order_id);

    Ok(ticket)
}

pub async fn find_by_order(conn: &mut SqliteConnection, order_id: Uuid) -> Result<Option<ETicket>> {
    let row = sqlx::query_as::<_, TicketRow>(
        "SELECT id, user_id, order_id, ticket_number, created_at FROM etickets WHERE order_id = ?"
    )
    .bind(order_id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    row.map(row_to_ticket).transpose()
}

pub async fn count(conn: &mut SqliteConnection) -> Result<i64> {
    let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM etickets")
        .fetch_one(&mut *conn)
        .await?;
    Ok(total)
}
