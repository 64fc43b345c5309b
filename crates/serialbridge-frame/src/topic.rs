//! Topic identifiers.
//!
//! Topic ids are one byte on the wire. Ids 0 and 1 are reserved for the
//! mapping negotiation and never carry application traffic.

/// Wire type of a topic identifier.
pub type TopicId = u8;

/// Negotiation request (bridge -> remote), zero-length payload.
pub const NEGOTIATION_REQUEST: TopicId = 0;

/// Negotiation response (remote -> bridge), carries the topic mapping.
pub const NEGOTIATION_RESPONSE: TopicId = 1;

/// First id available to application topics.
pub const FIRST_APPLICATION_TOPIC: TopicId = 2;

/// Returns a human-readable name for a topic id class.
pub fn topic_class(id: TopicId) -> &'static str {
    match id {
        NEGOTIATION_REQUEST => "NEGOTIATION_REQUEST",
        NEGOTIATION_RESPONSE => "NEGOTIATION_RESPONSE",
        _ => "APPLICATION",
    }
}

/// Returns true if the id is reserved for negotiation.
pub fn is_reserved(id: TopicId) -> bool {
    id < FIRST_APPLICATION_TOPIC
}
