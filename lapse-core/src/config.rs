use tokio::runtime::Handle;

/// Name used in log events when none is configured
pub const DEFAULT_QUEUE_NAME: &str = "lapse";

/// Construction options for an [`ExpiringQueue`](crate::ExpiringQueue)
///
/// # Example
///
/// ```rust
/// use lapse_core::QueueConfig;
///
/// let config = QueueConfig::default()
///     .with_name("sessions");
/// assert_eq!(config.name, "sessions");
/// ```
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Label attached to every log event emitted by the queue (default: `"lapse"`)
    pub name: String,
    /// Runtime the expiration driver is spawned on.
    ///
    /// When `None`, the queue captures the runtime it is constructed in.
    pub runtime: Option<Handle>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_QUEUE_NAME.to_string(),
            runtime: None,
        }
    }
}

impl QueueConfig {
    /// Creates a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the name used to tell queues apart in logs
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Binds the expiration driver to an explicit runtime
    ///
    /// With a handle supplied the queue can be constructed and used from
    /// threads that are not themselves inside a Tokio runtime.
    ///
    /// # Example
    ///
    /// ```rust
    /// use lapse_core::QueueConfig;
    ///
    /// let rt = tokio::runtime::Builder::new_current_thread()
    ///     .enable_time()
    ///     .build()
    ///     .unwrap();
    /// let config = QueueConfig::default().with_runtime(rt.handle().clone());
    /// assert!(config.runtime.is_some());
    /// ```
    pub fn with_runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }
}
