use crate::query::Tracking;
use std::time::Duration;

/// In-memory context configuration
#[derive(Debug, Clone)]
pub struct ContextOptions {
    /// Logical database name (logs and URLs)
    pub database: String,

    /// Fail fast with `ConcurrencyViolation` when a second operation starts
    /// while one is running on the same context
    pub thread_safety_checks: bool,

    /// Tracking behaviour of queries that do not override it
    pub default_tracking: Tracking,

    /// Simulated latency inside every backend command
    pub command_latency: Option<Duration>,
}

impl ContextOptions {
    pub fn new(database: &str) -> Self {
        Self {
            database: database.to_string(),
            thread_safety_checks: true,
            default_tracking: Tracking::TrackAll,
            command_latency: None,
        }
    }

    pub fn database(mut self, database: &str) -> Self {
        self.database = database.to_string();
        self
    }

    pub fn thread_safety_checks(mut self, enabled: bool) -> Self {
        self.thread_safety_checks = enabled;
        self
    }

    pub fn default_tracking(mut self, tracking: Tracking) -> Self {
        self.default_tracking = tracking;
        self
    }

    pub fn command_latency(mut self, latency: Duration) -> Self {
        self.command_latency = Some(latency);
        self
    }

    /// Parse from a connection string
    ///
    /// Format: "memory://database?tracking=no_tracking&thread_safety_checks=false&latency_ms=5"
    ///
    /// Latency may be given as `latency_us` instead, for sub-millisecond values.
    ///
    /// # Examples
    ///
    /// ```
    /// # use guardctx::memory::ContextOptions;
    /// let options = ContextOptions::from_url("memory://shop?latency_ms=2").unwrap();
    /// assert_eq!(options.database, "shop");
    /// ```
    pub fn from_url(url: &str) -> Result<Self, String> {
        let rest = url
            .strip_prefix("memory://")
            .ok_or_else(|| "URL must start with 'memory://'".to_string())?;

        let (database, query) = match rest.split_once('?') {
            Some((database, query)) => (database, Some(query)),
            None => (rest, None),
        };

        if database.is_empty() {
            return Err("Database name is missing".to_string());
        }

        let mut options = Self::new(database);

        for pair in query.into_iter().flat_map(|q| q.split('&')).filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| format!("Invalid option '{}'", pair))?;

            match key {
                "tracking" => {
                    options.default_tracking = match value {
                        "track_all" => Tracking::TrackAll,
                        "no_tracking" => Tracking::NoTracking,
                        other => return Err(format!("Invalid tracking '{}'", other)),
                    };
                }
                "thread_safety_checks" => {
                    options.thread_safety_checks = value
                        .parse()
                        .map_err(|_| format!("Invalid thread_safety_checks '{}'", value))?;
                }
                "latency_ms" => {
                    let millis: u64 = value
                        .parse()
                        .map_err(|_| format!("Invalid latency_ms '{}'", value))?;
                    options.command_latency = Some(Duration::from_millis(millis));
                }
                "latency_us" => {
                    let micros: u64 = value
                        .parse()
                        .map_err(|_| format!("Invalid latency_us '{}'", value))?;
                    options.command_latency = Some(Duration::from_micros(micros));
                }
                other => return Err(format!("Unknown option '{}'", other)),
            }
        }

        Ok(options)
    }

    /// Convert to connection string
    pub fn to_url(&self) -> String {
        let tracking = match self.default_tracking {
            Tracking::TrackAll => "track_all",
            Tracking::NoTracking => "no_tracking",
        };
        let mut url = format!(
            "memory://{}?tracking={}&thread_safety_checks={}",
            self.database, tracking, self.thread_safety_checks
        );
        match self.command_latency {
            Some(latency) if latency.subsec_micros() % 1_000 == 0 => {
                url.push_str(&format!("&latency_ms={}", latency.as_millis()));
            }
            Some(latency) => url.push_str(&format!("&latency_us={}", latency.as_micros())),
            None => {}
        }
        url
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.database.is_empty() {
            return Err("Database name cannot be empty".to_string());
        }

        if let Some(latency) = self.command_latency
            && latency > Duration::from_secs(10)
        {
            return Err("command_latency must not exceed 10s".to_string());
        }

        Ok(())
    }
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self::new("guardctx")
    }
}
