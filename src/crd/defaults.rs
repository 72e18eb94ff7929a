//! Effective defaults for PostgresCluster declarations
//!
//! Defaulting runs at admission (mutating webhook) and again at the start of
//! every reconciliation pass, so `normalize` must be idempotent.

use super::{PatroniSpec, PgBouncerPodSpec, PostgresClusterSpec, PostgresProxySpec};

/// Default PostgreSQL port
pub const DEFAULT_POSTGRES_PORT: i32 = 5432;

/// Default Patroni leader lock TTL in seconds
pub const DEFAULT_LEADER_LEASE_SECONDS: i32 = 30;

/// Default Patroni REST API port
pub const DEFAULT_PATRONI_PORT: i32 = 8008;

/// Default Patroni loop interval in seconds
pub const DEFAULT_SYNC_PERIOD_SECONDS: i32 = 10;

/// Default number of instances in an instance set
pub const DEFAULT_INSTANCE_REPLICAS: i32 = 1;

/// Default number of PgBouncer pods
pub const DEFAULT_PGBOUNCER_REPLICAS: i32 = 1;

/// Default PgBouncer listen port
pub const DEFAULT_PGBOUNCER_PORT: i32 = 5432;

/// Default PgBouncer pool mode
pub const DEFAULT_POOL_MODE: &str = "transaction";

/// Default PgBouncer max_client_conn
pub const DEFAULT_MAX_CLIENT_CONN: i32 = 100;

/// Default PgBouncer default_pool_size
pub const DEFAULT_POOL_SIZE: i32 = 20;

/// Supported PostgreSQL major versions
pub const MIN_POSTGRES_VERSION: i32 = 10;
pub const MAX_POSTGRES_VERSION: i32 = 13;

impl PostgresClusterSpec {
    /// Fill every unset field with its effective default, in place.
    ///
    /// Unnamed instance sets are named after their list position (`00`, `01`, ...).
    /// Duplicate user-supplied names are left alone; validation rejects them.
    pub fn normalize(&mut self) {
        if self.port.is_none() {
            self.port = Some(DEFAULT_POSTGRES_PORT);
        }

        for (i, set) in self.instance_sets.iter_mut().enumerate() {
            if set.name.is_empty() {
                set.name = format!("{:02}", i);
            }
            if set.replicas.is_none() {
                set.replicas = Some(DEFAULT_INSTANCE_REPLICAS);
            }
        }

        self.patroni
            .get_or_insert_with(PatroniSpec::default)
            .normalize();

        if let Some(proxy) = self.proxy.as_mut() {
            proxy.normalize();
        }
    }

    /// Return a defaulted copy
    pub fn normalized(&self) -> Self {
        let mut spec = self.clone();
        spec.normalize();
        spec
    }

    /// Effective PostgreSQL port
    pub fn postgres_port(&self) -> i32 {
        self.port.unwrap_or(DEFAULT_POSTGRES_PORT)
    }

    /// Effective Patroni settings, default-filled
    pub fn patroni_settings(&self) -> PatroniSpec {
        let mut patroni = self.patroni.clone().unwrap_or_default();
        patroni.normalize();
        patroni
    }

    /// Names of the declared repositories, in declaration order
    pub fn repo_names(&self) -> Vec<&str> {
        self.archive
            .pgbackrest
            .repos
            .iter()
            .map(|r| r.name.as_str())
            .collect()
    }
}

impl PatroniSpec {
    pub fn normalize(&mut self) {
        self.leader_lease_duration_seconds
            .get_or_insert(DEFAULT_LEADER_LEASE_SECONDS);
        self.port.get_or_insert(DEFAULT_PATRONI_PORT);
        self.sync_period_seconds
            .get_or_insert(DEFAULT_SYNC_PERIOD_SECONDS);
    }

    pub fn api_port(&self) -> i32 {
        self.port.unwrap_or(DEFAULT_PATRONI_PORT)
    }
}

impl PostgresProxySpec {
    pub fn normalize(&mut self) {
        if let Some(pgbouncer) = self.pg_bouncer.as_mut() {
            pgbouncer.normalize();
        }
    }
}

impl PgBouncerPodSpec {
    pub fn normalize(&mut self) {
        self.replicas.get_or_insert(DEFAULT_PGBOUNCER_REPLICAS);
        self.port.get_or_insert(DEFAULT_PGBOUNCER_PORT);
        self.pool_mode
            .get_or_insert_with(|| DEFAULT_POOL_MODE.to_string());
        self.max_client_conn.get_or_insert(DEFAULT_MAX_CLIENT_CONN);
        self.default_pool_size.get_or_insert(DEFAULT_POOL_SIZE);
    }

    pub fn desired_replicas(&self) -> i32 {
        self.replicas.unwrap_or(DEFAULT_PGBOUNCER_REPLICAS)
    }

    pub fn listen_port(&self) -> i32 {
        self.port.unwrap_or(DEFAULT_PGBOUNCER_PORT)
    }
}
