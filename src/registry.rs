//! in-memory datapoint registry
//!
//! ordered like the `datapoints` array of the configuration document. every
//! entry carries its own last-sample timestamp, so adding or deleting a
//! datapoint can never put the schedule out of step with the datapoints.

use crate::domain::{Datapoint, DatapointId};

#[derive(Debug, Clone, PartialEq)]
pub struct TrackedDatapoint {
    pub datapoint: Datapoint,
    /// unix ms of the last sampling attempt (or of registration)
    pub last_sample_ms: u64,
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: Vec<TrackedDatapoint>,
}

impl Registry {
    /// start tracking `datapoints`, all considered sampled at `now_ms`
    pub fn new(datapoints: Vec<Datapoint>, now_ms: u64) -> Self {
        let entries = datapoints
            .into_iter()
            .map(|datapoint| TrackedDatapoint { datapoint, last_sample_ms: now_ms })
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedDatapoint> {
        self.entries.iter()
    }

    pub fn get(&self, index: usize) -> Option<&TrackedDatapoint> {
        self.entries.get(index)
    }

    pub fn position(&self, id: DatapointId) -> Option<usize> {
        self.entries.iter().position(|e| e.datapoint.id == Some(id))
    }

    pub fn find(&self, id: DatapointId) -> Option<&Datapoint> {
        self.position(id).map(|i| &self.entries[i].datapoint)
    }

    pub fn find_mut(&mut self, id: DatapointId) -> Option<&mut Datapoint> {
        let i = self.position(id)?;
        Some(&mut self.entries[i].datapoint)
    }

    pub fn push(&mut self, datapoint: Datapoint, now_ms: u64) {
        self.entries.push(TrackedDatapoint { datapoint, last_sample_ms: now_ms });
    }

    /// drop the datapoint with `id`, returning where it was
    pub fn remove(&mut self, id: DatapointId) -> Option<(usize, Datapoint)> {
        let i = self.position(id)?;
        Some((i, self.entries.remove(i).datapoint))
    }

    /// copy of the datapoints in order, for persisting
    pub fn datapoints(&self) -> Vec<Datapoint> {
        self.entries.iter().map(|e| e.datapoint.clone()).collect()
    }

    /// give ids to the datapoints that have none, in registry order
    ///
    /// returns how many were assigned. surplus ids are ignored.
    pub fn assign_ids(&mut self, ids: &[DatapointId]) -> usize {
        let unassigned = self.entries.iter_mut().filter(|e| e.datapoint.id.is_none());
        let mut assigned = 0;
        for (entry, id) in unassigned.zip(ids) {
            entry.datapoint.id = Some(*id);
            assigned += 1;
        }
        assigned
    }

    /// indexes whose sampling period has been exceeded at `now_ms`
    pub fn due(&self, now_ms: u64) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| match e.datapoint.sample_period_ms() {
                Some(period) => now_ms.saturating_sub(e.last_sample_ms) > period,
                None => false,
            })
            .map(|(i, _)| i)
            .collect()
    }

    pub fn mark_sampled(&mut self, index: usize, now_ms: u64) {
        if let Some(e) = self.entries.get_mut(index) {
            e.last_sample_ms = now_ms;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dp(id: Option<i64>, name: &str, rate: u64) -> Datapoint {
        let mut d: Datapoint = serde_json::from_value(json!({
            "props": {"name": name, "dataType": "numeric", "sampleRate": rate}
        }))
        .unwrap();
        d.id = id.map(DatapointId);
        d
    }

    #[test]
    fn test_assign_ids_positionally_to_unregistered() {
        let mut reg = Registry::new(
            vec![dp(None, "a", 5), dp(Some(9), "b", 5), dp(None, "c", 5)],
            0,
        );
        let n = reg.assign_ids(&[DatapointId(101), DatapointId(102), DatapointId(103)]);
        assert_eq!(n, 2);
        let ids: Vec<_> = reg.iter().map(|e| e.datapoint.id).collect();
        assert_eq!(ids, vec![Some(DatapointId(101)), Some(DatapointId(9)), Some(DatapointId(102))]);
    }

    #[test]
    fn test_assign_fewer_ids_than_needed() {
        let mut reg = Registry::new(vec![dp(None, "a", 5), dp(None, "b", 5)], 0);
        assert_eq!(reg.assign_ids(&[DatapointId(1)]), 1);
        assert_eq!(reg.get(1).unwrap().datapoint.id, None);
    }

    #[test]
    fn test_remove_keeps_schedule_attached() {
        let mut reg = Registry::new(vec![dp(Some(1), "a", 1), dp(Some(2), "b", 100)], 0);
        reg.mark_sampled(1, 500);
        let (pos, removed) = reg.remove(DatapointId(1)).unwrap();
        assert_eq!(pos, 0);
        assert_eq!(removed.name(), "a");
        assert_eq!(reg.len(), 1);
        // "b" keeps its own timestamp after the shift
        assert_eq!(reg.get(0).unwrap().last_sample_ms, 500);
        assert!(reg.remove(DatapointId(1)).is_none());
    }

    #[test]
    fn test_due_threshold_is_strict() {
        let reg = Registry::new(vec![dp(Some(1), "a", 5)], 1_000);
        assert!(reg.due(1_000).is_empty());
        assert!(reg.due(6_000).is_empty());
        assert_eq!(reg.due(6_001), vec![0]);
    }

    #[test]
    fn test_due_after_mark_sampled() {
        let mut reg = Registry::new(vec![dp(Some(1), "a", 1), dp(Some(2), "b", 3)], 0);
        assert_eq!(reg.due(1_500), vec![0]);
        reg.mark_sampled(0, 1_500);
        assert!(reg.due(2_000).is_empty());
        assert_eq!(reg.due(3_001), vec![0, 1]);
    }

    #[test]
    fn test_datapoint_without_rate_never_due() {
        let mut d = dp(Some(1), "a", 1);
        d.props.remove("sampleRate");
        let reg = Registry::new(vec![d], 0);
        assert!(reg.due(u64::MAX).is_empty());
    }
}
