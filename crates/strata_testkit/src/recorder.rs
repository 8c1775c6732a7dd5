//! Data-event recording for snapshot tests.
//!
//! [`EventRecorder`] captures the stream produced by
//! `generate_data_events` so tests can inspect it or compare it against a
//! JSON snapshot.

use serde::Serialize;
use strata_packed::{DataEventHandler, DataValue};

/// One recorded diagnostic event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DataEvent {
    /// A group was opened.
    StartGroup {
        /// Group name.
        name: String,
        /// Item count, if reported.
        #[serde(skip_serializing_if = "Option::is_none")]
        len: Option<usize>,
    },
    /// The innermost group was closed.
    EndGroup,
    /// A named value.
    Value {
        /// Value name.
        name: String,
        /// The value.
        value: DataValue,
    },
}

/// A [`DataEventHandler`] that stores every event.
#[derive(Debug, Default)]
pub struct EventRecorder {
    events: Vec<DataEvent>,
    depth: usize,
    max_depth: usize,
    unbalanced: bool,
}

impl EventRecorder {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded events, in order.
    #[must_use]
    pub fn events(&self) -> &[DataEvent] {
        &self.events
    }

    /// Whether every group was closed exactly once.
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        !self.unbalanced && self.depth == 0
    }

    /// Deepest group nesting seen.
    #[must_use]
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// First value named `name`, searching the whole stream.
    #[must_use]
    pub fn find_value(&self, name: &str) -> Option<&DataValue> {
        self.events.iter().find_map(|event| match event {
            DataEvent::Value { name: n, value } if n == name => Some(value),
            _ => None,
        })
    }

    /// Renders the events as pretty-printed JSON.
    ///
    /// # Panics
    ///
    /// Never in practice; every event type serializes.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(&self.events).expect("events always serialize")
    }

    /// Renders the events as a JSON value.
    ///
    /// # Panics
    ///
    /// Never in practice; every event type serializes.
    #[must_use]
    pub fn to_json_value(&self) -> serde_json::Value {
        serde_json::to_value(&self.events).expect("events always serialize")
    }
}

impl DataEventHandler for EventRecorder {
    fn start_group(&mut self, name: &str, len: Option<usize>) {
        self.depth += 1;
        self.max_depth = self.max_depth.max(self.depth);
        self.events.push(DataEvent::StartGroup {
            name: name.to_string(),
            len,
        });
    }

    fn end_group(&mut self) {
        if self.depth == 0 {
            self.unbalanced = true;
        } else {
            self.depth -= 1;
        }
        self.events.push(DataEvent::EndGroup);
    }

    fn value(&mut self, name: &str, value: DataValue) {
        self.events.push(DataEvent::Value {
            name: name.to_string(),
            value,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{fixed_page, open_fixed, small_geometry, SCENARIO_A_VALUES};
    use serde_json::json;

    #[test]
    fn records_sequence_dump() {
        let page = fixed_page(&SCENARIO_A_VALUES, small_geometry());
        let seq = open_fixed(&page, small_geometry());

        let mut recorder = EventRecorder::new();
        seq.generate_data_events(&mut recorder);

        assert!(recorder.is_balanced());
        assert_eq!(recorder.max_depth(), 3);
        assert_eq!(recorder.find_value("SIZE"), Some(&DataValue::Unsigned(8)));
        assert_eq!(recorder.find_value("INDEX_SIZE"), Some(&DataValue::Unsigned(3)));
    }

    #[test]
    fn json_snapshot_of_small_stream() {
        let mut recorder = EventRecorder::new();
        recorder.start_group("VALUES", Some(2));
        recorder.value("0", DataValue::Signed(-1));
        recorder.value("1", DataValue::from("raw"));
        recorder.end_group();

        assert_eq!(
            recorder.to_json_value(),
            json!([
                {"event": "start_group", "name": "VALUES", "len": 2},
                {"event": "value", "name": "0", "value": -1},
                {"event": "value", "name": "1", "value": "raw"},
                {"event": "end_group"}
            ])
        );
    }

    #[test]
    fn detects_unbalanced_groups() {
        let mut recorder = EventRecorder::new();
        recorder.end_group();
        assert!(!recorder.is_balanced());
    }
}
