use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 定时任务默认操作人, 固定值便于审计时识别
pub const DEFAULT_SYSTEM_ACTOR: Uuid = Uuid::from_u128(0x5c4e_d01e_0000_4000_8000_0000_0000_0001);

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageBackend,
    pub billing: BillingConfig,
    pub scheduler: SchedulerConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    pub slow_statement_ms: u64,
    /// 每个事务内的语句超时 (SET LOCAL statement_timeout)
    pub statement_timeout_ms: u64,
}

/// 存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    /// 单个对账/开票事务的截止时间
    pub transaction_timeout_ms: u64,
    /// 月度开票时并发处理的客户数
    pub generation_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub tick_secs: u64,
    /// 每月几号生成当月发票 (1..=31), 大于当月天数时在月末生成
    pub generation_day: u32,
    /// 定时任务记账使用的操作人
    pub system_actor: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: "postgres://localhost/billing".to_string(),
                max_connections: 20,
                acquire_timeout_secs: 10,
                slow_statement_ms: 5000,
                statement_timeout_ms: 15000,
            },
            storage: StorageBackend::Postgres,
            billing: BillingConfig {
                transaction_timeout_ms: 30000,
                generation_concurrency: 8,
            },
            scheduler: SchedulerConfig {
                enabled: true,
                tick_secs: 86400,
                generation_day: 1,
                system_actor: DEFAULT_SYSTEM_ACTOR,
            },
            log: LogConfig {
                level: "info".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// 加载顺序: 内置默认值 -> billing.toml (可选) -> BILLING__* 环境变量 -> DATABASE_URL
    pub fn load() -> Result<Self, config::ConfigError> {
        let defaults = Config::try_from(&AppConfig::default())?;

        Config::builder()
            .add_source(defaults)
            .add_source(File::with_name("billing").required(false))
            .add_source(Environment::with_prefix("BILLING").separator("__"))
            .set_override_option("database.url", std::env::var("DATABASE_URL").ok())?
            .build()?
            .try_deserialize::<AppConfig>()
            .and_then(AppConfig::validate)
    }

    pub fn validate(self) -> Result<Self, config::ConfigError> {
        if !(1..=31).contains(&self.scheduler.generation_day) {
            return Err(config::ConfigError::Message(format!(
                "scheduler.generation_day must be within 1..=31, got {}",
                self.scheduler.generation_day
            )));
        }
        if self.scheduler.system_actor.is_nil() {
            return Err(config::ConfigError::Message(
                "scheduler.system_actor must not be the nil uuid".to_string(),
            ));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_config() {
        let cfg: AppConfig = Config::builder()
            .add_source(Config::try_from(&AppConfig::default()).unwrap())
            .set_override("storage", "memory")
            .unwrap()
            .set_override("billing.generation_concurrency", 2)
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(cfg.storage, StorageBackend::Memory);
        assert_eq!(cfg.billing.generation_concurrency, 2);
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.scheduler.generation_day, 1);
        assert_eq!(cfg.scheduler.system_actor, DEFAULT_SYSTEM_ACTOR);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn generation_day_outside_month_range_is_rejected() {
        for day in [0, 32] {
            let mut cfg = AppConfig::default();
            cfg.scheduler.generation_day = day;
            let err = cfg.validate().unwrap_err();
            assert!(err.to_string().contains("generation_day"));
        }

        let mut cfg = AppConfig::default();
        cfg.scheduler.generation_day = 31;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn nil_system_actor_is_rejected() {
        let mut cfg = AppConfig::default();
        cfg.scheduler.system_actor = Uuid::nil();
        assert!(cfg.validate().is_err());
    }
}
