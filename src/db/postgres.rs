use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

use crate::db::repository::{
    format_invoice_number, format_payment_number, BillingStore, ClientCreditRepository,
    ClientDirectory, InvoiceRepository, PaymentRepository, UnitOfWork,
};
use crate::error::{BillingError, Result};
use crate::models::{
    ClientAccount, ClientCredit, Invoice, InvoiceRecord, Money, Payment, PaymentApplication,
    PaymentRecord,
};

const INVOICE_COLUMNS: &str = r#"
    id, invoice_number, client_id, billing_period_start, billing_period_end,
    invoice_date, due_date, active_units, unit_price, subtotal, credit_applied,
    total_amount, amount_paid, balance, status, notes, created_by,
    created_at, updated_at, deleted_at
"#;

const CLIENT_SELECT: &str = r#"
    SELECT c.id, c.name, c.unit_price, c.payment_terms_days, c.is_active AS active,
           COALESCE(SUM(b.units) FILTER (WHERE b.is_active AND b.deleted_at IS NULL), 0)::INT4
               AS active_units
    FROM clients c
    LEFT JOIN buildings b ON b.client_id = c.id
"#;

/// 发票行
#[derive(Debug, Clone, FromRow)]
struct InvoiceRow {
    id: Uuid,
    invoice_number: String,
    client_id: Uuid,
    billing_period_start: NaiveDate,
    billing_period_end: NaiveDate,
    invoice_date: NaiveDate,
    due_date: NaiveDate,
    active_units: i32,
    unit_price: BigDecimal,
    subtotal: BigDecimal,
    credit_applied: BigDecimal,
    total_amount: BigDecimal,
    amount_paid: BigDecimal,
    balance: BigDecimal,
    status: String,
    notes: Option<String>,
    created_by: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<InvoiceRow> for Invoice {
    type Error = BillingError;

    fn try_from(row: InvoiceRow) -> Result<Self> {
        Invoice::from_persistence(InvoiceRecord {
            id: row.id,
            invoice_number: row.invoice_number,
            client_id: row.client_id,
            billing_period_start: row.billing_period_start,
            billing_period_end: row.billing_period_end,
            invoice_date: row.invoice_date,
            due_date: row.due_date,
            active_units: row.active_units,
            unit_price: Money::from_decimal(&row.unit_price)?,
            subtotal: Money::from_decimal(&row.subtotal)?,
            credit_applied: Money::from_decimal(&row.credit_applied)?,
            total_amount: Money::from_decimal(&row.total_amount)?,
            amount_paid: Money::from_decimal(&row.amount_paid)?,
            balance: Money::from_decimal(&row.balance)?,
            status: row.status.parse()?,
            notes: row.notes,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        })
    }
}

/// 付款主表行
#[derive(Debug, Clone, FromRow)]
struct PaymentRow {
    id: Uuid,
    payment_number: String,
    client_id: Uuid,
    amount: BigDecimal,
    payment_method: String,
    payment_date: NaiveDate,
    reference_number: Option<String>,
    notes: Option<String>,
    created_by: Uuid,
    excess_amount: BigDecimal,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// 付款分配明细行
#[derive(Debug, Clone, FromRow)]
struct ApplicationRow {
    invoice_id: Uuid,
    invoice_number: String,
    amount_applied: BigDecimal,
}

#[derive(Debug, Clone, FromRow)]
struct CreditRow {
    id: Uuid,
    client_id: Uuid,
    balance: BigDecimal,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CreditRow> for ClientCredit {
    type Error = BillingError;

    fn try_from(row: CreditRow) -> Result<Self> {
        ClientCredit::from_persistence(
            row.id,
            row.client_id,
            Money::from_decimal(&row.balance)?,
            row.created_at,
            row.updated_at,
        )
    }
}

#[derive(Debug, Clone, FromRow)]
struct ClientRow {
    id: Uuid,
    name: String,
    unit_price: BigDecimal,
    payment_terms_days: i32,
    active: bool,
    active_units: i32,
}

impl TryFrom<ClientRow> for ClientAccount {
    type Error = BillingError;

    fn try_from(row: ClientRow) -> Result<Self> {
        Ok(ClientAccount {
            id: row.id,
            name: row.name,
            active_units: row.active_units,
            unit_price: Money::from_decimal(&row.unit_price)?,
            payment_terms_days: row.payment_terms_days,
            active: row.active,
        })
    }
}

/// 唯一约束冲突转成业务冲突, 其余保持数据库错误
fn map_write_error(err: sqlx::Error, what: &str) -> BillingError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            BillingError::conflict(format!("{} already exists", what))
        }
        _ => BillingError::Database(err),
    }
}

/// Postgres 存储
#[derive(Clone)]
pub struct PgBillingStore {
    pool: PgPool,
    statement_timeout_ms: u64,
}

impl PgBillingStore {
    pub fn new(pool: PgPool, statement_timeout_ms: u64) -> Self {
        Self {
            pool,
            statement_timeout_ms,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl BillingStore for PgBillingStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let mut tx = self.pool.begin().await?;
        // SET 不支持参数绑定
        sqlx::query(&format!(
            "SET LOCAL statement_timeout = {}",
            self.statement_timeout_ms
        ))
        .execute(&mut *tx)
        .await?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }
}

/// 单个数据库事务; drop 时未提交则回滚
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

impl PgUnitOfWork {
    async fn fetch_applications(&mut self, payment_id: Uuid) -> Result<Vec<PaymentApplication>> {
        let rows = sqlx::query_as::<_, ApplicationRow>(
            r#"
            SELECT invoice_id, invoice_number, amount_applied
            FROM payment_applications
            WHERE payment_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(payment_id)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<PaymentApplication> {
                Ok(PaymentApplication {
                    invoice_id: row.invoice_id,
                    invoice_number: row.invoice_number,
                    amount_applied: Money::from_decimal(&row.amount_applied)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl InvoiceRepository for PgUnitOfWork {
    async fn find_invoice(&mut self, id: Uuid) -> Result<Option<Invoice>> {
        let row = sqlx::query_as::<_, InvoiceRow>(&format!(
            "SELECT {} FROM invoices WHERE id = $1",
            INVOICE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(Invoice::try_from).transpose()
    }

    async fn lock_invoice(&mut self, id: Uuid) -> Result<Option<Invoice>> {
        let row = sqlx::query_as::<_, InvoiceRow>(&format!(
            "SELECT {} FROM invoices WHERE id = $1 FOR UPDATE",
            INVOICE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(Invoice::try_from).transpose()
    }

    async fn find_outstanding_by_client(&mut self, client_id: Uuid) -> Result<Vec<Invoice>> {
        let rows = sqlx::query_as::<_, InvoiceRow>(&format!(
            r#"
            SELECT {}
            FROM invoices
            WHERE client_id = $1
              AND deleted_at IS NULL
              AND status <> 'CANCELLED'
              AND balance > 0
            ORDER BY invoice_date ASC, length(invoice_number) ASC, invoice_number ASC
            FOR UPDATE
            "#,
            INVOICE_COLUMNS
        ))
        .bind(client_id)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.into_iter().map(Invoice::try_from).collect()
    }

    async fn find_invoice_for_period(
        &mut self,
        client_id: Uuid,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> Result<Option<Invoice>> {
        let row = sqlx::query_as::<_, InvoiceRow>(&format!(
            r#"
            SELECT {}
            FROM invoices
            WHERE client_id = $1
              AND billing_period_start = $2
              AND billing_period_end = $3
              AND status <> 'CANCELLED'
              AND deleted_at IS NULL
            LIMIT 1
            "#,
            INVOICE_COLUMNS
        ))
        .bind(client_id)
        .bind(period_start)
        .bind(period_end)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(Invoice::try_from).transpose()
    }

    async fn find_overdue_candidates(&mut self, today: NaiveDate) -> Result<Vec<Invoice>> {
        let rows = sqlx::query_as::<_, InvoiceRow>(&format!(
            r#"
            SELECT {}
            FROM invoices
            WHERE deleted_at IS NULL
              AND status IN ('PENDING', 'PARTIALLY_PAID')
              AND due_date < $1
              AND balance > 0
            ORDER BY client_id, invoice_date, invoice_number
            FOR UPDATE SKIP LOCKED
            "#,
            INVOICE_COLUMNS
        ))
        .bind(today)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.into_iter().map(Invoice::try_from).collect()
    }

    async fn save_invoice(&mut self, invoice: &Invoice) -> Result<()> {
        let (period_start, period_end) = invoice.billing_period();
        sqlx::query(&format!(
            r#"
            INSERT INTO invoices ({})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            "#,
            INVOICE_COLUMNS
        ))
        .bind(invoice.id())
        .bind(invoice.invoice_number())
        .bind(invoice.client_id())
        .bind(period_start)
        .bind(period_end)
        .bind(invoice.invoice_date())
        .bind(invoice.due_date())
        .bind(invoice.active_units())
        .bind(invoice.unit_price().to_decimal())
        .bind(invoice.subtotal().to_decimal())
        .bind(invoice.credit_applied().to_decimal())
        .bind(invoice.total_amount().to_decimal())
        .bind(invoice.amount_paid().to_decimal())
        .bind(invoice.balance().to_decimal())
        .bind(invoice.status().as_str())
        .bind(invoice.notes())
        .bind(invoice.created_by())
        .bind(invoice.meta().created_at)
        .bind(invoice.meta().updated_at)
        .bind(invoice.meta().record_state.deleted_at())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_write_error(e, "invoice for this client and billing period"))?;
        Ok(())
    }

    async fn update_invoice(&mut self, invoice: &Invoice) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE invoices
            SET amount_paid = $2,
                balance = $3,
                status = $4,
                notes = $5,
                updated_at = $6,
                deleted_at = $7
            WHERE id = $1
            "#,
        )
        .bind(invoice.id())
        .bind(invoice.amount_paid().to_decimal())
        .bind(invoice.balance().to_decimal())
        .bind(invoice.status().as_str())
        .bind(invoice.notes())
        .bind(invoice.meta().updated_at)
        .bind(invoice.meta().record_state.deleted_at())
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() != 1 {
            return Err(BillingError::not_found("invoice", invoice.id()));
        }
        Ok(())
    }

    async fn next_invoice_number(&mut self) -> Result<String> {
        let seq: i64 = sqlx::query_scalar("SELECT nextval('invoice_number_seq')")
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(format_invoice_number(seq))
    }
}

#[async_trait]
impl PaymentRepository for PgUnitOfWork {
    async fn find_payment(&mut self, id: Uuid) -> Result<Option<Payment>> {
        let row = sqlx::query_as::<_, PaymentRow>(
            r#"
            SELECT id, payment_number, client_id, amount, payment_method, payment_date,
                   reference_number, notes, created_by, excess_amount, created_at, updated_at
            FROM payments
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let applications = self.fetch_applications(row.id).await?;

        Payment::from_persistence(PaymentRecord {
            id: row.id,
            payment_number: row.payment_number,
            client_id: row.client_id,
            amount: Money::from_decimal(&row.amount)?,
            payment_method: row.payment_method.parse()?,
            payment_date: row.payment_date,
            reference_number: row.reference_number,
            notes: row.notes,
            created_by: row.created_by,
            applications,
            excess_amount: Money::from_decimal(&row.excess_amount)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
        .map(Some)
    }

    async fn save_payment(&mut self, payment: &Payment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (
                id, payment_number, client_id, amount, payment_method, payment_date,
                reference_number, notes, created_by, excess_amount, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(payment.id())
        .bind(payment.payment_number())
        .bind(payment.client_id())
        .bind(payment.amount().to_decimal())
        .bind(payment.payment_method().as_str())
        .bind(payment.payment_date())
        .bind(payment.reference_number())
        .bind(payment.notes())
        .bind(payment.created_by())
        .bind(payment.excess_amount().to_decimal())
        .bind(payment.meta().created_at)
        .bind(payment.meta().updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_write_error(e, "payment"))?;

        if payment.applications().is_empty() {
            return Ok(());
        }

        // 分配明细批量插入
        let mut query_builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO payment_applications (
                payment_id, position, invoice_id, invoice_number, amount_applied
            ) ",
        );
        query_builder.push_values(
            payment.applications().iter().enumerate(),
            |mut b, (position, application)| {
                b.push_bind(payment.id())
                    .push_bind(position as i32)
                    .push_bind(application.invoice_id)
                    .push_bind(application.invoice_number.clone())
                    .push_bind(application.amount_applied.to_decimal());
            },
        );
        query_builder.build().execute(&mut *self.tx).await?;

        tracing::debug!(
            payment_number = payment.payment_number(),
            applications = payment.applications().len(),
            "payment applications inserted"
        );
        Ok(())
    }

    async fn next_payment_number(&mut self) -> Result<String> {
        let seq: i64 = sqlx::query_scalar("SELECT nextval('payment_number_seq')")
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(format_payment_number(seq))
    }
}

#[async_trait]
impl ClientCreditRepository for PgUnitOfWork {
    async fn find_credit(&mut self, client_id: Uuid) -> Result<Option<ClientCredit>> {
        let row = sqlx::query_as::<_, CreditRow>(
            r#"
            SELECT id, client_id, balance, created_at, updated_at
            FROM client_credits
            WHERE client_id = $1
            "#,
        )
        .bind(client_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(ClientCredit::try_from).transpose()
    }

    async fn lock_credit(&mut self, client_id: Uuid) -> Result<ClientCredit> {
        let opened = ClientCredit::open(client_id);
        sqlx::query(
            r#"
            INSERT INTO client_credits (id, client_id, balance, created_at, updated_at)
            VALUES ($1, $2, 0, $3, $3)
            ON CONFLICT (client_id) DO NOTHING
            "#,
        )
        .bind(opened.id())
        .bind(client_id)
        .bind(opened.meta().created_at)
        .execute(&mut *self.tx)
        .await?;

        let row = sqlx::query_as::<_, CreditRow>(
            r#"
            SELECT id, client_id, balance, created_at, updated_at
            FROM client_credits
            WHERE client_id = $1
            FOR UPDATE
            "#,
        )
        .bind(client_id)
        .fetch_one(&mut *self.tx)
        .await?;
        ClientCredit::try_from(row)
    }

    async fn save_credit(&mut self, credit: &ClientCredit) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO client_credits (id, client_id, balance, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (client_id)
            DO UPDATE SET balance = EXCLUDED.balance, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(credit.id())
        .bind(credit.client_id())
        .bind(credit.balance().to_decimal())
        .bind(credit.meta().created_at)
        .bind(credit.meta().updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ClientDirectory for PgUnitOfWork {
    async fn find_client(&mut self, id: Uuid) -> Result<Option<ClientAccount>> {
        let row = sqlx::query_as::<_, ClientRow>(&format!(
            "{} WHERE c.id = $1 AND c.deleted_at IS NULL GROUP BY c.id",
            CLIENT_SELECT
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(ClientAccount::try_from).transpose()
    }

    async fn list_billable_clients(&mut self) -> Result<Vec<ClientAccount>> {
        let rows = sqlx::query_as::<_, ClientRow>(&format!(
            "{} WHERE c.is_active AND c.deleted_at IS NULL GROUP BY c.id ORDER BY c.name",
            CLIENT_SELECT
        ))
        .fetch_all(&mut *self.tx)
        .await?;
        rows.into_iter().map(ClientAccount::try_from).collect()
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
