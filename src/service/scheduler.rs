use chrono::{Datelike, Local, NaiveDate};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::config::SchedulerConfig;
use crate::service::generate_invoice::billing_month;
use crate::service::{BillingService, MonthlyRunSummary};

/// 单次调度的执行结果, 失败只记日志不中断调度
#[derive(Debug, Default)]
pub struct TickReport {
    pub overdue_marked: Option<usize>,
    pub monthly_run: Option<MonthlyRunSummary>,
}

/// 启动后台调度: 每个 tick 执行逾期扫描, 到开票日时再跑月度开票
pub fn spawn(service: BillingService, config: SchedulerConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(config.tick_secs.max(1)));
        tracing::info!(
            tick_secs = config.tick_secs,
            generation_day = config.generation_day,
            "billing scheduler started"
        );
        loop {
            interval.tick().await;
            run_tick(&service, &config, Local::now().date_naive()).await;
        }
    })
}

pub async fn run_tick(service: &BillingService, config: &SchedulerConfig, today: NaiveDate) -> TickReport {
    let mut report = TickReport::default();

    match service.mark_overdue(today).await {
        Ok(marked) => report.overdue_marked = Some(marked),
        Err(e) => tracing::error!(error = %e, retryable = e.is_retryable(), "overdue sweep failed"),
    }

    if is_generation_day(today, config.generation_day) {
        match service.run_monthly(today, config.system_actor).await {
            Ok(summary) => report.monthly_run = Some(summary),
            Err(e) => tracing::error!(error = %e, "monthly invoice run failed"),
        }
    }

    report
}

/// 开票日超过当月天数 (如 31 号遇到 2 月) 时在月末开票
fn is_generation_day(today: NaiveDate, generation_day: u32) -> bool {
    match billing_month(today) {
        Ok((_, month_end)) => today.day() == generation_day.min(month_end.day()),
        Err(e) => {
            tracing::error!(error = %e, %today, "cannot resolve billing month");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BillingConfig;
    use crate::db::InMemoryStore;
    use crate::models::{ClientAccount, Money};
    use std::sync::Arc;
    use uuid::Uuid;

    fn scheduler_config(generation_day: u32) -> SchedulerConfig {
        SchedulerConfig {
            enabled: true,
            tick_secs: 60,
            generation_day,
            system_actor: crate::config::DEFAULT_SYSTEM_ACTOR,
        }
    }

    async fn service_with_client() -> (BillingService, InMemoryStore, Uuid) {
        let store = InMemoryStore::new();
        let client_id = Uuid::new_v4();
        store
            .insert_client(ClientAccount {
                id: client_id,
                name: "Maple Court".to_string(),
                active_units: 2,
                unit_price: Money::from_minor(4_000),
                payment_terms_days: 10,
                active: true,
            })
            .await;
        let service = BillingService::new(
            Arc::new(store.clone()),
            &BillingConfig {
                transaction_timeout_ms: 1_000,
                generation_concurrency: 2,
            },
        );
        (service, store, client_id)
    }

    #[tokio::test]
    async fn tick_on_generation_day_bills_the_month() {
        let (service, store, client_id) = service_with_client().await;
        let today = NaiveDate::from_ymd_opt(2024, 7, 1).unwrap();

        let report = run_tick(&service, &scheduler_config(1), today).await;

        assert_eq!(report.overdue_marked, Some(0));
        let summary = report.monthly_run.unwrap();
        assert_eq!(summary.generated, 1);
        assert_eq!(store.invoices_for_client(client_id).await.len(), 1);
    }

    #[test]
    fn generation_day_past_month_end_falls_on_last_day() {
        let day = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap();
        assert!(is_generation_day(day(2024, 2, 29), 31));
        assert!(!is_generation_day(day(2024, 2, 28), 31));
        assert!(is_generation_day(day(2023, 2, 28), 30));
        assert!(is_generation_day(day(2024, 4, 30), 31));
        assert!(is_generation_day(day(2024, 1, 31), 31));
        assert!(!is_generation_day(day(2024, 1, 30), 31));
        assert!(is_generation_day(day(2024, 2, 15), 15));
    }

    #[tokio::test]
    async fn tick_at_end_of_short_month_bills_the_month() {
        let (service, store, client_id) = service_with_client().await;

        let skipped = run_tick(
            &service,
            &scheduler_config(31),
            NaiveDate::from_ymd_opt(2024, 2, 28).unwrap(),
        )
        .await;
        assert!(skipped.monthly_run.is_none());

        let report = run_tick(
            &service,
            &scheduler_config(31),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(),
        )
        .await;
        assert_eq!(report.monthly_run.unwrap().generated, 1);
        assert_eq!(store.invoices_for_client(client_id).await.len(), 1);
    }

    #[tokio::test]
    async fn tick_on_other_days_only_sweeps() {
        let (service, store, client_id) = service_with_client().await;
        run_tick(
            &service,
            &scheduler_config(1),
            NaiveDate::from_ymd_opt(2024, 7, 1).unwrap(),
        )
        .await;

        let report = run_tick(
            &service,
            &scheduler_config(1),
            NaiveDate::from_ymd_opt(2024, 7, 20).unwrap(),
        )
        .await;

        assert!(report.monthly_run.is_none());
        assert_eq!(report.overdue_marked, Some(1));
        assert_eq!(store.invoices_for_client(client_id).await.len(), 1);
    }
}
