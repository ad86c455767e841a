//! Connection setup shared by the reader and the writer.
//!
//! Each side of a run holds exactly one connection for its whole lifetime,
//! taken from a single-slot deadpool pool.

use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use tokio_postgres::{Client, Config as PgConfig, NoTls};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{info, warn};

use super::tls::{SslMode, TlsBuilder};
use crate::config::DatabaseConfig;
use crate::error::{CopyError, Result};

/// Session settings that make text output an exact, parseable round trip.
const SESSION_SETUP: &str = "\
    SET DateStyle = 'ISO, YMD'; \
    SET IntervalStyle = 'postgres'; \
    SET TimeZone = 'UTC'; \
    SET extra_float_digits = 3; \
    SET bytea_output = 'hex'";

/// One long-lived PostgreSQL session.
pub(crate) struct PgConnection {
    // Kept so the pooled object has a live pool to return to
    _pool: Pool,
    client: Object,
    // Cancel requests open their own connection with the same TLS setup
    tls: Option<MakeRustlsConnect>,
}

impl PgConnection {
    /// Connect using `config`. `role` ("source" or "target") is used in messages.
    pub(crate) async fn open(config: &DatabaseConfig, role: &str) -> Result<Self> {
        let label = config.display_name();
        let mut pg_config = pg_config(config, role)?;

        let ssl_mode = match &config.ssl_mode {
            Some(mode) => SslMode::parse(mode)?,
            None => SslMode::from_pg(pg_config.get_ssl_mode()),
        };
        pg_config.ssl_mode(ssl_mode.to_pg());
        pg_config.application_name("pg-schema-copy");

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let tls = TlsBuilder::new(ssl_mode).build()?;
        let pool = match tls.clone() {
            None => {
                warn!(
                    "PostgreSQL {} TLS is disabled. Credentials will be transmitted in plaintext.",
                    role
                );
                let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
                Pool::builder(mgr)
                    .max_size(1)
                    .build()
                    .map_err(|e| CopyError::connection(e, format!("creating {} pool", role)))?
            }
            Some(tls) => {
                let mgr = Manager::from_config(pg_config, tls, mgr_config);
                Pool::builder(mgr)
                    .max_size(1)
                    .build()
                    .map_err(|e| CopyError::connection(e, format!("creating {} pool", role)))?
            }
        };

        let client = pool
            .get()
            .await
            .map_err(|e| CopyError::connection(e, format!("connecting to {} {}", role, label)))?;

        client
            .batch_execute(SESSION_SETUP)
            .await
            .map_err(|e| CopyError::connection(e, format!("configuring {} session", role)))?;

        info!("Connected to PostgreSQL {}: {}", role, label);

        Ok(Self {
            _pool: pool,
            client,
            tls,
        })
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    /// Send a cancel request for the statement running on this session.
    pub(crate) async fn cancel_running(&self) -> Result<()> {
        let token = self.client.cancel_token();
        match &self.tls {
            None => token.cancel_query(NoTls).await?,
            Some(tls) => token.cancel_query(tls.clone()).await?,
        }
        Ok(())
    }

    /// Round trip used by health checks.
    pub(crate) async fn ping(&self) -> Result<()> {
        self.client.simple_query("SELECT 1").await?;
        Ok(())
    }
}

fn pg_config(config: &DatabaseConfig, role: &str) -> Result<PgConfig> {
    if let Some(url) = &config.url {
        return url
            .parse::<PgConfig>()
            .map_err(|e| CopyError::Config(format!("invalid {} connection string: {}", role, e)));
    }

    let mut pg_config = PgConfig::new();
    pg_config.host(&config.host);
    pg_config.port(config.port);
    pg_config.dbname(&config.database);
    pg_config.user(&config.user);
    if !config.password.is_empty() {
        pg_config.password(&config.password);
    }
    Ok(pg_config)
}
