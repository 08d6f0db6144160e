#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use tempfile::TempDir;
use uuid::Uuid;

use bodyshop::{
    config::{DatabaseConfig, Settings},
    domain::{Actor, Order, OrderStatus, PaymentStatus, Role, Transaction, WorkStatus},
    error::{AppError, Result},
    notifications::BroadcastPushChannel,
    payments::{Invoice, InvoiceRequest, PaymentGateway, RefundReceipt, RefundRequest},
    repository::{order_repository, pool, transaction_repository},
    service::ServiceContext,
};

pub const CALLBACK_TOKEN: &str = "test-callback-token";

/// A migrated SQLite file that lives as long as the returned directory.
pub async fn setup_db() -> anyhow::Result<(TempDir, SqlitePool)> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("bodyshop.db");
    let config = DatabaseConfig {
        url: format!("sqlite://{}", path.display()),
        max_connections: 8,
        busy_timeout_secs: 5,
    };
    let pool = pool::connect(&config).await?;
    pool::migrate(&pool).await?;
    Ok((dir, pool))
}

pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.gateway.callback_token = CALLBACK_TOKEN.to_string();
    settings.gateway.admin_fee = 2_500;
    settings
}

/// Records every call and fails on demand.
#[derive(Default)]
pub struct FakeGateway {
    pub fail_invoices: AtomicBool,
    pub fail_refunds: AtomicBool,
    pub invoice_calls: AtomicUsize,
    pub refunds: Mutex<Vec<RefundRequest>>,
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_invoice(&self, request: InvoiceRequest) -> Result<Invoice> {
        self.invoice_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_invoices.load(Ordering::SeqCst) {
            return Err(AppError::External("gateway unavailable".to_string()));
        }
        Ok(Invoice {
            id: format!("inv-{}", request.external_id),
            invoice_url: format!("https://checkout.example/{}", request.external_id),
        })
    }

    async fn create_refund(&self, request: RefundRequest) -> Result<RefundReceipt> {
        if self.fail_refunds.load(Ordering::SeqCst) {
            return Err(AppError::External("refund rejected".to_string()));
        }
        let id = format!("rfd-{}", request.reference_id);
        self.refunds.lock().unwrap().push(request);
        Ok(RefundReceipt {
            id,
            status: "SUCCEEDED".to_string(),
        })
    }
}

pub struct TestApp {
    pub _dir: TempDir,
    pub pool: SqlitePool,
    pub gateway: Arc<FakeGateway>,
    pub channel: Arc<BroadcastPushChannel>,
    pub context: Arc<ServiceContext>,
}

pub async fn spawn_context() -> anyhow::Result<TestApp> {
    let (dir, pool) = setup_db().await?;
    let gateway = Arc::new(FakeGateway::default());
    let channel = Arc::new(BroadcastPushChannel::new(64));
    let context = Arc::new(ServiceContext::new(
        pool.clone(),
        gateway.clone(),
        Some(channel.clone()),
        &test_settings(),
    ));
    Ok(TestApp {
        _dir: dir,
        pool,
        gateway,
        channel,
        context,
    })
}

pub fn customer() -> Actor {
    Actor {
        user_id: Uuid::new_v4(),
        role: Role::User,
        workshop_id: None,
    }
}

pub fn workshop_admin(workshop_id: Uuid) -> Actor {
    Actor {
        user_id: Uuid::new_v4(),
        role: Role::WorkshopAdmin,
        workshop_id: Some(workshop_id),
    }
}

pub async fn seed_payment_method(pool: &SqlitePool, fee: i64) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO payment_methods (id, name, fee, is_active) VALUES (?, ?, ?, 1)")
        .bind(id.to_string())
        .bind("Virtual account")
        .bind(fee)
        .execute(pool)
        .await?;
    Ok(id)
}

pub async fn seed_service(pool: &SqlitePool, workshop_id: Uuid, name: &str, price: i64) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO workshop_services (id, workshop_id, name, price, is_active) VALUES (?, ?, ?, ?, 1)")
        .bind(id.to_string())
        .bind(workshop_id.to_string())
        .bind(name)
        .bind(price)
        .execute(pool)
        .await?;
    Ok(id)
}

/// A transaction in `payment_status` with one order in `order_status`.
pub async fn seed_order(
    pool: &SqlitePool,
    user_id: Uuid,
    workshop_id: Uuid,
    payment_status: PaymentStatus,
    order_status: OrderStatus,
) -> anyhow::Result<(Transaction, Order)> {
    let payment_method_id = seed_payment_method(pool, 4_000).await?;
    let now = Utc::now();
    let transaction = Transaction {
        id: Uuid::new_v4(),
        user_id,
        payment_method_id,
        admin_fee: 2_500,
        payment_method_fee: 4_000,
        total_price: 156_500,
        payment_status,
        invoice_id: Some("inv-seeded".to_string()),
        payment_invoice_url: Some("https://checkout.example/seeded".to_string()),
        refund_amount: None,
        refunded_at: None,
        created_at: now,
        updated_at: now,
    };
    let order = Order {
        id: Uuid::new_v4(),
        user_id,
        user_car_id: Uuid::new_v4(),
        workshop_id,
        transaction_id: transaction.id,
        order_status,
        work_status: WorkStatus::Inspection,
        note: None,
        total_price: 150_000,
        created_at: now,
        updated_at: now,
    };

    let mut conn = pool.acquire().await?;
    transaction_repository::insert(&mut conn, &transaction).await?;
    order_repository::insert(&mut conn, &order).await?;
    Ok((transaction, order))
}

pub async fn load(pool: &SqlitePool, transaction_id: Uuid, order_id: Uuid) -> anyhow::Result<(Transaction, Order)> {
    let mut conn = pool.acquire().await?;
    let transaction = transaction_repository::find_by_id(&mut conn, transaction_id)
        .await?
        .expect("transaction exists");
    let order = order_repository::find_by_id(&mut conn, order_id)
        .await?
        .expect("order exists");
    Ok((transaction, order))
}
