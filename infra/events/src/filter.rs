use std::fmt;
use std::ops::Not;
use std::sync::Arc;

type Predicate<T> = dyn Fn(&T) -> bool + Send + Sync;

/// A pure predicate deciding whether an event is delivered to a subscriber.
///
/// Predicates run on the dispatch engine for every live subscriber and every
/// event, so they must be cheap and free of side effects. All filters passed
/// to a single subscription are combined with logical AND.
///
/// # Examples
/// ```rust
/// use fanout_events::Filter;
///
/// let large = Filter::new(|n: &i64| *n > 5);
/// let even = Filter::new(|n: &i64| n % 2 == 0);
///
/// assert!(large.matches(&6));
/// assert!(!large.matches(&5));
/// assert!((!even).matches(&3));
/// ```
pub struct Filter<T> {
    predicate: Arc<Predicate<T>>,
}

impl<T> Filter<T> {
    /// Wraps a predicate.
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self { predicate: Arc::new(predicate) }
    }

    /// Evaluates the predicate against `event`.
    #[inline]
    #[must_use]
    pub fn matches(&self, event: &T) -> bool {
        (self.predicate)(event)
    }
}

impl<T: 'static> Filter<T> {
    /// Matches when at least one of `filters` matches. An empty set never matches.
    pub fn any_of(filters: impl IntoIterator<Item = Self>) -> Self {
        let filters: Vec<Self> = filters.into_iter().collect();
        Self::new(move |event| filters.iter().any(|f| f.matches(event)))
    }
}

impl<T: 'static> Not for Filter<T> {
    type Output = Self;

    fn not(self) -> Self::Output {
        Self::new(move |event| !self.matches(event))
    }
}

impl<T> Clone for Filter<T> {
    fn clone(&self) -> Self {
        Self { predicate: Arc::clone(&self.predicate) }
    }
}

impl<T> fmt::Debug for Filter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter").field("event", &std::any::type_name::<T>()).finish_non_exhaustive()
    }
}

/// Returns `true` when every filter accepts `event`. An empty slice accepts everything.
#[inline]
pub(crate) fn matches_all<T>(filters: &[Filter<T>], event: &T) -> bool {
    filters.iter().all(|f| f.matches(event))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter_set_accepts_everything() {
        let filters: Vec<Filter<i64>> = Vec::new();
        assert!(matches_all(&filters, &-1));
        assert!(matches_all(&filters, &42));
    }

    #[test]
    fn test_filters_are_combined_with_and() {
        let filters = vec![Filter::new(|n: &i64| *n > 0), Filter::new(|n: &i64| n % 2 == 0)];

        assert!(matches_all(&filters, &4));
        assert!(!matches_all(&filters, &3));
        assert!(!matches_all(&filters, &-2));
    }

    #[test]
    fn test_any_of() {
        let either = Filter::any_of([Filter::new(|n: &i64| *n < 0), Filter::new(|n: &i64| *n > 10)]);

        assert!(either.matches(&-1));
        assert!(either.matches(&11));
        assert!(!either.matches(&5));
        assert!(!Filter::<i64>::any_of([]).matches(&5));
    }

    #[test]
    fn test_clone_shares_predicate() {
        let original = Filter::new(|s: &String| s.starts_with("user."));
        let cloned = original.clone();

        assert!(cloned.matches(&"user.created".to_owned()));
        assert!(!cloned.matches(&"order.created".to_owned()));
    }
}
