//! Core aggregate and domain event traits.

use serde::{Serialize, de::DeserializeOwned};

/// Trait for domain events.
///
/// Domain events are facts that have happened. They are appended to an
/// aggregate's history and never rewritten.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Returns the event type name stored alongside the payload.
    fn event_type(&self) -> &'static str;
}

/// Trait for aggregates whose mutations are expressed as events.
///
/// Command methods on the aggregate validate against the current state and
/// return the events they would produce; `apply` folds those events into the
/// state. The store persists the resulting state together with the events.
pub trait Aggregate: Send + Sync + Sized {
    /// The type of events this aggregate produces and consumes.
    type Event: DomainEvent;

    /// Returns the aggregate type name.
    fn aggregate_type() -> &'static str;

    /// Returns the current version.
    ///
    /// Starts at 0 and increments with each applied event.
    fn version(&self) -> u32;

    /// Applies an event to the aggregate.
    ///
    /// Must be deterministic and infallible: events are facts.
    fn apply(&mut self, event: Self::Event);

    /// Applies multiple events in sequence.
    fn apply_events(&mut self, events: impl IntoIterator<Item = Self::Event>) {
        for event in events {
            self.apply(event);
        }
    }
}
