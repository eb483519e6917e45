//! Session configuration
//!
//! Built with [`SessionConfig::builder`]; every option has a default except
//! the database URL.

/// Configuration for auto-managed timestamp columns
///
/// A column is only stamped when it also exists on the table.
#[derive(Debug, Clone)]
pub struct AutoColumns {
    /// Whether to stamp `created_at` on insert
    pub created_at: bool,
    /// Whether to stamp `updated_at` on insert and update
    pub updated_at: bool,
}

impl Default for AutoColumns {
    fn default() -> Self {
        Self {
            created_at: true,
            updated_at: true,
        }
    }
}

/// Configuration for a session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Database URL (e.g. `sqlite::memory:` or `sqlite://app.db`)
    pub database_url: String,
    /// Namespace used to resolve per-table entity and query classes
    pub namespace: Option<String>,
    /// Whether executed statements are captured in the query log
    pub query_logging: bool,
    /// How many statements the query log keeps (default: 100)
    pub query_log_capacity: usize,
    /// Whether loaded rows are deduplicated through the identity cache
    pub instance_pooling: bool,
    /// Timestamp columns stamped on write
    pub auto_columns: AutoColumns,
}

impl SessionConfig {
    /// Start a builder for `database_url`
    pub fn builder(database_url: impl Into<String>) -> SessionConfigBuilder {
        SessionConfigBuilder::new(database_url)
    }
}

/// Builder for SessionConfig
#[derive(Debug)]
pub struct SessionConfigBuilder {
    database_url: String,
    namespace: Option<String>,
    query_logging: bool,
    query_log_capacity: usize,
    instance_pooling: bool,
    auto_columns: AutoColumns,
}

impl SessionConfigBuilder {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            namespace: None,
            query_logging: false,
            query_log_capacity: 100,
            instance_pooling: true,
            auto_columns: AutoColumns::default(),
        }
    }

    /// Set the class-resolution namespace (e.g. `"app::models"`)
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Enable or disable query logging (default: false)
    pub fn query_logging(mut self, enabled: bool) -> Self {
        self.query_logging = enabled;
        self
    }

    /// Set how many statements the query log retains (default: 100)
    pub fn query_log_capacity(mut self, capacity: usize) -> Self {
        self.query_log_capacity = capacity;
        self
    }

    /// Enable or disable instance pooling (default: true)
    pub fn instance_pooling(mut self, enabled: bool) -> Self {
        self.instance_pooling = enabled;
        self
    }

    /// Enable or disable auto-stamped `created_at` (default: true)
    pub fn auto_created_at(mut self, enabled: bool) -> Self {
        self.auto_columns.created_at = enabled;
        self
    }

    /// Enable or disable auto-stamped `updated_at` (default: true)
    pub fn auto_updated_at(mut self, enabled: bool) -> Self {
        self.auto_columns.updated_at = enabled;
        self
    }

    /// Stamp neither timestamp column
    pub fn without_auto_columns(mut self) -> Self {
        self.auto_columns = AutoColumns {
            created_at: false,
            updated_at: false,
        };
        self
    }

    pub fn build(self) -> SessionConfig {
        SessionConfig {
            database_url: self.database_url,
            namespace: self.namespace,
            query_logging: self.query_logging,
            query_log_capacity: self.query_log_capacity,
            instance_pooling: self.instance_pooling,
            auto_columns: self.auto_columns,
        }
    }
}
