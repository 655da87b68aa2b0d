use std::borrow::Cow;

/// Errors surfaced by bus operations.
///
/// Conditions internal to the dispatch engine (a saturated subscriber queue, a
/// subscriber removed twice) are handled in place and never show up here.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The bus scope was cancelled; the dispatch engine no longer accepts work.
    #[error("Bus terminated{}: {message}", format_context(.context))]
    Terminated { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// The inbound queue is saturated and the caller asked not to wait.
    #[error("Inbound queue full{}: {message}", format_context(.context))]
    InboundFull { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Capacity must be greater than zero for bounded queues.
    #[error("Invalid capacity{}: {message}", format_context(.context))]
    InvalidCapacity { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// The subscription queue was closed by the dispatch engine.
    #[error("Subscription closed{}: {message}", format_context(.context))]
    SubscriptionClosed { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Layered configuration could not be built or deserialized.
    #[error("Config error{}: {source}", format_context(.context))]
    Config { source: config::ConfigError, context: Option<Cow<'static, str>> },
}

impl BusError {
    pub(crate) fn terminated(operation: &'static str) -> Self {
        Self::Terminated {
            message: format!("cannot {operation} after the bus scope was cancelled").into(),
            context: None,
        }
    }

    /// Returns `true` if the bus has shut down.
    #[must_use]
    pub const fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated { .. })
    }
}

/// Attaches a human-readable context to a failed bus operation.
pub trait BusErrorExt<T> {
    /// Wraps the error (if any) with `context`.
    ///
    /// # Errors
    /// Returns the original error converted into [`BusError`] with the context attached.
    fn context(self, context: impl Into<Cow<'static, str>>) -> Result<T, BusError>;
}

impl<T> BusErrorExt<T> for Result<T, BusError> {
    #[inline]
    fn context(self, context: impl Into<Cow<'static, str>>) -> Self {
        self.map_err(|mut e| {
            match &mut e {
                BusError::Terminated { context: c, .. }
                | BusError::InboundFull { context: c, .. }
                | BusError::InvalidCapacity { context: c, .. }
                | BusError::SubscriptionClosed { context: c, .. }
                | BusError::Config { context: c, .. } => *c = Some(context.into()),
            }
            e
        })
    }
}

impl<T> BusErrorExt<T> for Result<T, config::ConfigError> {
    #[inline]
    fn context(self, context: impl Into<Cow<'static, str>>) -> Result<T, BusError> {
        self.map_err(|source| BusError::Config { source, context: Some(context.into()) })
    }
}

impl From<config::ConfigError> for BusError {
    #[inline]
    fn from(source: config::ConfigError) -> Self {
        Self::Config { source, context: None }
    }
}

fn format_context(context: &Option<Cow<'static, str>>) -> Cow<'static, str> {
    context.as_ref().map_or(Cow::Borrowed(""), |c| Cow::Owned(format!(" ({c})")))
}
