use chrono::{NaiveDateTime, Utc};
use sqlx::{FromRow, SqliteConnection};
use uuid::Uuid;

use crate::{
    domain::{Order, OrderServiceLine, OrderStatus, WorkStatus},
    error::{AppError, Result},
    repository::transaction_repository::{parse_uuid, to_utc},
};

#[derive(FromRow)]
struct OrderRow {
    id: String,
    user_id: String,
    user_car_id: String,
    workshop_id: String,
    transaction_id: String,
    order_status: String,
    work_status: String,
    note: Option<String>,
    total_price: i64,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

#[derive(FromRow)]
struct OrderServiceRow {
    order_id: String,
    service_id: String,
    name: String,
    price: i64,
}

/// A bookable service as listed by its workshop.
#[derive(Debug, Clone, FromRow)]
pub struct WorkshopServiceRow {
    pub id: String,
    pub workshop_id: String,
    pub name: String,
    pub price: i64,
}

fn row_to_order(row: OrderRow) -> Result<Order> {
    Ok(Order {
        id: parse_uuid(&row.id)?,
        user_id: parse_uuid(&row.user_id)?,
        user_car_id: parse_uuid(&row.user_car_id)?,
        workshop_id: parse_uuid(&row.workshop_id)?,
        transaction_id: parse_uuid(&row.transaction_id)?,
        order_status: OrderStatus::parse(&row.order_status)
            .ok_or_else(|| AppError::Database(format!("Invalid order status: {}", row.order_status)))?,
        work_status: WorkStatus::parse(&row.work_status)
            .ok_or_else(|| AppError::Database(format!("Invalid work status: {}", row.work_status)))?,
        note: row.note,
        total_price: row.total_price,
        created_at: to_utc(row.created_at),
        updated_at: to_utc(row.updated_at),
    })
}

const ORDER_COLUMNS: &str = r#"
    id, user_id, user_car_id, workshop_id, transaction_id, order_status,
    work_status, note, total_price, created_at, updated_at
"#;

pub async fn insert(conn: &mut SqliteConnection, order: &Order) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO orders (
            id, user_id, user_car_id, workshop_id, transaction_id, order_status,
            work_status, note, total_price, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#
    )
    .bind(order.id.to_string())
    .bind(order.user_id.to_string())
    .bind(order.user_car_id.to_string())
    .bind(order.workshop_id.to_string())
    .bind(order.transaction_id.to_string())
    .bind(order.order_status.as_str())
    .bind(order.work_status.as_str())
    .bind(&order.note)
    .bind(order.total_price)
    .bind(order.created_at.naive_utc())
    .bind(order.updated_at.naive_utc())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn find_by_id(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<Order>> {
    let row = sqlx::query_as::<_, OrderRow>(&format!(
        "SELECT {} FROM orders WHERE id = ?",
        ORDER_COLUMNS
    ))
    .bind(id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    row.map(row_to_order).transpose()
}

pub async fn list_by_transaction(conn: &mut SqliteConnection, transaction_id: Uuid) -> Result<Vec<Order>> {
    let rows = sqlx::query_as::<_, OrderRow>(&format!(
        "SELECT {} FROM orders WHERE transaction_id = ? ORDER BY created_at ASC, id ASC",
        ORDER_COLUMNS
    ))
    .bind(transaction_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(row_to_order).collect()
}

/// Set order and (optionally) work status on a single order.
pub async fn update_status(
    conn: &mut SqliteConnection,
    id: Uuid,
    order_status: OrderStatus,
    work_status: Option<WorkStatus>,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE orders
        SET order_status = ?,
            work_status = COALESCE(?, work_status),
            updated_at = ?
        WHERE id = ?
        "#
    )
    .bind(order_status.as_str())
    .bind(work_status.map(|w| w.as_str()))
    .bind(Utc::now().naive_utc())
    .bind(id.to_string())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Order {} not found", id)));
    }
    Ok(())
}

/// Multi-row update of every order bundled in a transaction.
pub async fn update_status_for_transaction(
    conn: &mut SqliteConnection,
    transaction_id: Uuid,
    order_status: OrderStatus,
    work_status: Option<WorkStatus>,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE orders
        SET order_status = ?,
            work_status = COALESCE(?, work_status),
            updated_at = ?
        WHERE transaction_id = ?
        "#
    )
    .bind(order_status.as_str())
    .bind(work_status.map(|w| w.as_str()))
    .bind(Utc::now().naive_utc())
    .bind(transaction_id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

pub async fn insert_service_line(conn: &mut SqliteConnection, line: &OrderServiceLine) -> Result<()> {
    sqlx::query(
        "INSERT INTO order_services (order_id, service_id, name, price) VALUES (?, ?, ?, ?)"
    )
    .bind(line.order_id.to_string())
    .bind(line.service_id.to_string())
    .bind(&line.name)
    .bind(line.price)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn list_service_lines(conn: &mut SqliteConnection, order_id: Uuid) -> Result<Vec<OrderServiceLine>> {
    let rows = sqlx::query_as::<_, OrderServiceRow>(
        "SELECT order_id, service_id, name, price FROM order_services WHERE order_id = ? ORDER BY name"
    )
    .bind(order_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter()
        .map(|row| {
            Ok(OrderServiceLine {
                order_id: parse_uuid(&row.order_id)?,
                service_id: parse_uuid(&row.service_id)?,
                name: row.name,
                price: row.price,
            })
        })
        .collect()
}

/// Active services of `workshop_id` among `service_ids`.
pub async fn find_workshop_services(
    conn: &mut SqliteConnection,
    workshop_id: Uuid,
    service_ids: &[Uuid],
) -> Result<Vec<WorkshopServiceRow>> {
    let mut services = Vec::with_capacity(service_ids.len());
    for service_id in service_ids {
        let row = sqlx::query_as::<_, WorkshopServiceRow>(
            r#"
            SELECT id, workshop_id, name, price
            FROM workshop_services
            WHERE id = ? AND workshop_id = ? AND is_active = 1
            "#
        )
        .bind(service_id.to_string())
        .bind(workshop_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

        if let Some(row) = row {
            services.push(row);
        }
    }
    Ok(services)
}

/// Fee charged for a payment method, or `None` when it is unknown or inactive.
pub async fn find_payment_method_fee(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<i64>> {
    let fee = sqlx::query_scalar::<_, i64>(
        "SELECT fee FROM payment_methods WHERE id = ? AND is_active = 1"
    )
    .bind(id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    Ok(fee)
}
