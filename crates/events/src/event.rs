use chrono::{DateTime, Utc};

/// A fact emitted by an aggregate when one of its state changes is accepted.
///
/// Domain crates return these from their mutating methods; the application
/// layer turns them into [`crate::ChangeNotice`]s and synchronization calls.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable name, e.g. "orders.order.status_changed".
    fn event_type(&self) -> &'static str;

    /// When the change happened (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}
