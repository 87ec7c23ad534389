//! [`reconcile`] – the pure fold from an event-log snapshot to a [`Timeline`].
//!
//! The snapshot is always the *entire* log.  Records are classified by their
//! `kind` tag and merged per kind:
//!
//! | Kind | Merge rule |
//! |---|---|
//! | `director`, `rag_select`, `prompt_debug` | last record for a turn wins |
//! | `speak` | first record wins, unless a later one adds a beat the stored one lacks |
//! | `thought` | appended, then sorted by timestamp |
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use stagehand_timeline::reconcile;
//!
//! let snapshot = json!([
//!     {"kind": "director", "turn": 1, "beat": "SETUP"},
//!     {"kind": "speak", "turn": 1, "text": "hi"},
//!     {"kind": "speak", "turn": 1, "text": "hi", "beat": "SETUP"},
//! ]);
//!
//! let timeline = reconcile(&snapshot).unwrap();
//! assert_eq!(timeline.speaks[&1].beat.as_deref(), Some("SETUP"));
//! ```

use std::collections::btree_map::Entry;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use stagehand_types::{EventRecord, SpeakEvent};
use tracing::debug;

use crate::projection::Timeline;

/// Fold `snapshot` into a [`Timeline`].
///
/// Returns `None` when `snapshot` is not a JSON array.  Individual records
/// that cannot be decoded are skipped; the remainder is still folded.
pub fn reconcile(snapshot: &Value) -> Option<Timeline> {
    let records = snapshot.as_array()?;

    let mut timeline = Timeline::default();
    let mut thoughts = Vec::new();

    for (position, raw) in records.iter().enumerate() {
        let record = match EventRecord::deserialize(raw) {
            Ok(record) => record,
            Err(e) => {
                debug!(position, error = %e, "skipping undecodable event record");
                continue;
            }
        };

        match record {
            EventRecord::Director(event) => {
                timeline.directors.insert(event.turn, event);
            }
            EventRecord::RagSelect(event) => {
                timeline.rag_selections.insert(event.turn, event);
            }
            EventRecord::PromptDebug(event) => {
                timeline.prompt_tails.insert(event.turn, event);
            }
            EventRecord::Speak(event) => match timeline.speaks.entry(event.turn) {
                Entry::Vacant(slot) => {
                    slot.insert(event);
                }
                Entry::Occupied(mut slot) => {
                    if supersedes(slot.get(), &event) {
                        slot.insert(event);
                    }
                }
            },
            EventRecord::Thought(event) => thoughts.push(event),
        }
    }

    // Stable: equal timestamps keep log order.
    thoughts.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    timeline.thoughts = Arc::new(thoughts);

    Some(timeline)
}

/// A later speak record replaces the stored one only when it carries a beat
/// the stored one lacks.
fn supersedes(stored: &SpeakEvent, incoming: &SpeakEvent) -> bool {
    incoming.has_beat() && !stored.has_beat()
}
