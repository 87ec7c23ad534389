//! The reconciled per-turn projection.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use stagehand_types::{
    DirectorEvent, PromptDebugEvent, RagSelectEvent, SpeakEvent, ThoughtEvent, TurnIndex,
};

/// Result of folding one event-log snapshot.
///
/// Every map holds at most one record per turn and iterates in turn order, so
/// two timelines built from the same snapshot serialise identically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Timeline {
    pub speaks: BTreeMap<TurnIndex, SpeakEvent>,
    pub directors: BTreeMap<TurnIndex, DirectorEvent>,
    pub rag_selections: BTreeMap<TurnIndex, RagSelectEvent>,
    pub prompt_tails: BTreeMap<TurnIndex, PromptDebugEvent>,
    /// Sorted non-decreasing by timestamp.
    pub thoughts: Arc<Vec<ThoughtEvent>>,
}

impl Timeline {
    /// `true` when the snapshot contained no usable record.
    pub fn is_empty(&self) -> bool {
        self.speaks.is_empty()
            && self.directors.is_empty()
            && self.rag_selections.is_empty()
            && self.prompt_tails.is_empty()
            && self.thoughts.is_empty()
    }

    /// Every turn that appears in at least one keyed map, ascending.
    pub fn turns(&self) -> Vec<TurnIndex> {
        let mut turns: BTreeSet<TurnIndex> = BTreeSet::new();
        turns.extend(self.speaks.keys());
        turns.extend(self.directors.keys());
        turns.extend(self.rag_selections.keys());
        turns.extend(self.prompt_tails.keys());
        turns.into_iter().collect()
    }

    /// Highest turn index seen in any keyed map.
    pub fn latest_turn(&self) -> Option<TurnIndex> {
        [
            self.speaks.keys().next_back(),
            self.directors.keys().next_back(),
            self.rag_selections.keys().next_back(),
            self.prompt_tails.keys().next_back(),
        ]
        .into_iter()
        .flatten()
        .copied()
        .max()
    }

    /// Join all keyed records for `turn`.
    pub fn turn(&self, turn: TurnIndex) -> TurnView<'_> {
        TurnView {
            turn,
            speak: self.speaks.get(&turn),
            director: self.directors.get(&turn),
            rag: self.rag_selections.get(&turn),
            prompt: self.prompt_tails.get(&turn),
        }
    }

    /// Thoughts tagged with `turn`, in timestamp order.
    pub fn thoughts_for(&self, turn: TurnIndex) -> impl Iterator<Item = &ThoughtEvent> {
        self.thoughts.iter().filter(move |t| t.turn == Some(turn))
    }
}

/// Borrowed view of everything known about one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnView<'a> {
    pub turn: TurnIndex,
    pub speak: Option<&'a SpeakEvent>,
    pub director: Option<&'a DirectorEvent>,
    pub rag: Option<&'a RagSelectEvent>,
    pub prompt: Option<&'a PromptDebugEvent>,
}

impl TurnView<'_> {
    /// The beat for this turn: the speak record's own tag when enriched,
    /// otherwise the director's.
    pub fn beat(&self) -> Option<&str> {
        self.speak
            .filter(|s| s.has_beat())
            .and_then(|s| s.beat.as_deref())
            .or_else(|| self.director.and_then(|d| d.beat.as_deref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagehand_types::TurnDebug;

    fn speak(turn: TurnIndex, beat: Option<&str>) -> SpeakEvent {
        SpeakEvent {
            turn,
            speaker: "alice".into(),
            text: "line".into(),
            beat: beat.map(str::to_string),
            debug: TurnDebug::default(),
        }
    }

    fn director(turn: TurnIndex, beat: &str) -> DirectorEvent {
        DirectorEvent {
            turn,
            beat: Some(beat.into()),
            status: None,
            reason: None,
            guidance: None,
            cut_cue: None,
        }
    }

    #[test]
    fn default_timeline_is_empty() {
        let t = Timeline::default();
        assert!(t.is_empty());
        assert!(t.turns().is_empty());
        assert_eq!(t.latest_turn(), None);
    }

    #[test]
    fn turns_is_sorted_union() {
        let mut t = Timeline::default();
        t.speaks.insert(4, speak(4, None));
        t.directors.insert(2, director(2, "SETUP"));
        t.directors.insert(4, director(4, "PAYOFF"));
        assert_eq!(t.turns(), vec![2, 4]);
        assert_eq!(t.latest_turn(), Some(4));
    }

    #[test]
    fn turn_view_prefers_speak_beat() {
        let mut t = Timeline::default();
        t.speaks.insert(1, speak(1, Some("TWIST")));
        t.directors.insert(1, director(1, "SETUP"));
        assert_eq!(t.turn(1).beat(), Some("TWIST"));
    }

    #[test]
    fn turn_view_falls_back_to_director_beat() {
        let mut t = Timeline::default();
        t.speaks.insert(1, speak(1, None));
        t.directors.insert(1, director(1, "SETUP"));
        let view = t.turn(1);
        assert_eq!(view.beat(), Some("SETUP"));
        assert!(view.rag.is_none());
        assert!(t.turn(9).speak.is_none());
    }

    #[test]
    fn thoughts_for_filters_by_turn() {
        let t = Timeline {
            thoughts: Arc::new(vec![
                ThoughtEvent {
                    timestamp: "2024-01-01T00:00:01Z".into(),
                    turn: Some(1),
                    content: "a".into(),
                },
                ThoughtEvent {
                    timestamp: "2024-01-01T00:00:02Z".into(),
                    turn: None,
                    content: "b".into(),
                },
            ]),
            ..Timeline::default()
        };
        let contents: Vec<_> = t.thoughts_for(1).map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["a"]);
    }
}
