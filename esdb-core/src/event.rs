use bytes::Bytes;
use std::collections::HashMap;
use uuid::Uuid;

use crate::position::{Checkpoint, Position};

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub id: Uuid,
    pub stream_id: String,
    pub revision: u64,
    pub position: Position,
    pub event_type: String,
    pub is_json: bool,
    pub metadata: HashMap<String, String>,
    pub custom_metadata: Bytes,
    pub data: Bytes,
}

impl RecordedEvent {
    pub fn is_system_event(&self) -> bool {
        self.event_type.starts_with('$')
    }
}

/// An event as delivered to a subscriber. `link` is set when the delivered record was a link
/// that the server resolved to its target.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEvent {
    pub event: Option<RecordedEvent>,
    pub link: Option<RecordedEvent>,
    pub commit_position: Option<u64>,
}

impl ResolvedEvent {
    pub fn from_event(event: RecordedEvent) -> Self {
        let commit_position = Some(event.position.commit);
        Self {
            event: Some(event),
            link: None,
            commit_position,
        }
    }

    /// The record actually read from the subscribed stream: the link if present, otherwise the event.
    pub fn original_event(&self) -> Option<&RecordedEvent> {
        self.link.as_ref().or(self.event.as_ref())
    }

    pub fn original_stream_id(&self) -> Option<&str> {
        self.original_event().map(|e| e.stream_id.as_str())
    }

    pub fn id(&self) -> Option<Uuid> {
        self.original_event().map(|e| e.id)
    }

    pub fn revision_checkpoint(&self) -> Option<Checkpoint> {
        self.original_event().map(|e| Checkpoint::Revision(e.revision))
    }

    pub fn position_checkpoint(&self) -> Option<Checkpoint> {
        self.original_event().map(|e| Checkpoint::Position(e.position))
    }
}
