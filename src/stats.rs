//! Per-event-id counters and the report assembled from them.

use indexmap::IndexMap;

use crate::entity::EventId;

#[cfg(feature = "serde")]
use serde::Serialize;

/// Counters keyed by `(entity class name, event id)`, kept in first-seen
/// order so [`Spectrum::report_entries`] enumerates deterministically.
/// `HashMap` would scramble the order every run, and spectrum entries must
/// enumerate in insertion order.
#[derive(Default)]
pub(crate) struct Spectrum {
    counters: IndexMap<(String, EventId), u64>,
    total_events: u64,
    track: bool,
    virtual_start: Option<u64>,
    virtual_end: u64,
    simulation_start_ms: u64,
    simulation_end_ms: u64,
}

impl Spectrum {
    pub(crate) fn new(track: bool, simulation_start_ms: u64) -> Self {
        Spectrum {
            counters: IndexMap::new(),
            total_events: 0,
            track,
            virtual_start: None,
            virtual_end: 0,
            simulation_start_ms,
            simulation_end_ms: simulation_start_ms,
        }
    }

    /// Records one successful `Invoke` dispatch at virtual instant `now`.
    pub(crate) fn record_dispatch(&mut self, class_name: &str, event_id: EventId, now: u64) {
        self.virtual_start.get_or_insert(now);
        self.virtual_end = now;
        if !self.track {
            return;
        }
        *self
            .counters
            .entry((class_name.to_string(), event_id))
            .or_insert(0) += 1;
        self.total_events += 1;
    }

    pub(crate) fn touch_wall_clock_end(&mut self, now_ms: u64) {
        self.simulation_end_ms = now_ms;
    }

    pub(crate) fn total_events(&self) -> u64 {
        self.total_events
    }

    pub(crate) fn virtual_start(&self) -> u64 {
        self.virtual_start.unwrap_or(0)
    }

    pub(crate) fn virtual_end(&self) -> u64 {
        self.virtual_end
    }

    pub(crate) fn simulation_start_ms(&self) -> u64 {
        self.simulation_start_ms
    }

    pub(crate) fn simulation_end_ms(&self) -> u64 {
        self.simulation_end_ms
    }

    /// A standalone snapshot of just the per-`(class_name, event_id)`
    /// counters, for callers that want the spectrum without the rest of
    /// [`Report`].
    pub(crate) fn entries(&self) -> Vec<SpectrumEntry> {
        self.counters
            .iter()
            .map(|((class_name, event_id), count)| SpectrumEntry {
                class_name: class_name.clone(),
                event_id: *event_id,
                count: *count,
            })
            .collect()
    }

    pub(crate) fn report(&self, name: &str) -> Report {
        Report {
            name: name.to_string(),
            total_events: self.total_events,
            simulation_start_ms: self.simulation_start_ms,
            simulation_end_ms: self.simulation_end_ms,
            virtual_start: self.virtual_start(),
            virtual_end: self.virtual_end,
            spectrum: self
                .counters
                .iter()
                .map(|((class_name, event_id), count)| SpectrumEntry {
                    class_name: class_name.clone(),
                    event_id: *event_id,
                    count: *count,
                })
                .collect(),
        }
    }
}

/// One row of the spectrum table in a [`Report`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct SpectrumEntry {
    pub class_name: String,
    pub event_id: EventId,
    pub count: u64,
}

/// A stable, externally consumable snapshot of a controller's statistics.
/// Safe to call `ControllerHandle::report` at any point in a run; it never
/// mutates state.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct Report {
    pub name: String,
    pub total_events: u64,
    pub simulation_start_ms: u64,
    pub simulation_end_ms: u64,
    pub virtual_start: u64,
    pub virtual_end: u64,
    pub spectrum: Vec<SpectrumEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_dispatches_per_class_and_event_id() {
        let mut spectrum = Spectrum::new(true, 0);
        spectrum.record_dispatch("A", 0, 0);
        spectrum.record_dispatch("A", 0, 0);
        spectrum.record_dispatch("A", 1, 0);
        let report = spectrum.report("sim");
        assert_eq!(report.total_events, 3);
        assert_eq!(
            report.spectrum,
            vec![
                SpectrumEntry { class_name: "A".into(), event_id: 0, count: 2 },
                SpectrumEntry { class_name: "A".into(), event_id: 1, count: 1 },
            ]
        );
    }

    #[test]
    fn entries_keep_first_seen_order() {
        let mut spectrum = Spectrum::new(true, 0);
        spectrum.record_dispatch("B", 0, 0);
        spectrum.record_dispatch("A", 0, 0);
        let report = spectrum.report("sim");
        let names: Vec<_> = report.spectrum.iter().map(|e| e.class_name.as_str()).collect();
        assert_eq!(names, vec!["B", "A"]);
    }

    #[test]
    fn entries_matches_report_spectrum_without_building_a_full_report() {
        let mut spectrum = Spectrum::new(true, 0);
        spectrum.record_dispatch("A", 0, 0);
        spectrum.record_dispatch("B", 1, 0);
        assert_eq!(spectrum.entries(), spectrum.report("sim").spectrum);
    }

    #[test]
    fn touch_wall_clock_end_updates_simulation_end_ms() {
        let mut spectrum = Spectrum::new(true, 100);
        assert_eq!(spectrum.simulation_start_ms(), 100);
        assert_eq!(spectrum.simulation_end_ms(), 100);
        spectrum.touch_wall_clock_end(250);
        assert_eq!(spectrum.simulation_end_ms(), 250);
    }

    #[test]
    fn disabled_tracking_skips_counters_but_keeps_virtual_span() {
        let mut spectrum = Spectrum::new(false, 0);
        spectrum.record_dispatch("A", 0, 5);
        let report = spectrum.report("sim");
        assert_eq!(report.total_events, 0);
        assert!(report.spectrum.is_empty());
        assert_eq!(report.virtual_end, 5);
    }
}
