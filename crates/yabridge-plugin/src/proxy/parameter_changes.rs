//! All parameter queues for one processing block.

use super::param_value_queue::{ParamValueQueue, YaParamValueQueue};
use serde::{Deserialize, Serialize};

pub trait ParameterChanges {
    fn parameter_count(&self) -> usize;
    fn parameter_data(&self, index: usize) -> Option<&dyn ParamValueQueue>;
    /// Returns the queue for `parameter_id`, creating it if this block has
    /// none yet.
    fn add_parameter_data(&mut self, parameter_id: u32) -> &mut dyn ParamValueQueue;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct YaParameterChanges {
    queues: Vec<YaParamValueQueue>,
}

impl YaParameterChanges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshots every queue of a local implementation.
    pub fn from_changes(changes: &dyn ParameterChanges) -> Self {
        let queues = (0..changes.parameter_count())
            .filter_map(|index| changes.parameter_data(index))
            .map(YaParamValueQueue::from_queue)
            .collect();

        Self { queues }
    }

    pub fn write_back_outputs(&self, destination: &mut dyn ParameterChanges) {
        for queue in &self.queues {
            let target = destination.add_parameter_data(queue.parameter_id());
            queue.write_back_outputs(target);
        }
    }

    pub fn queues(&self) -> &[YaParamValueQueue] {
        &self.queues
    }
}

impl ParameterChanges for YaParameterChanges {
    fn parameter_count(&self) -> usize {
        self.queues.len()
    }

    fn parameter_data(&self, index: usize) -> Option<&dyn ParamValueQueue> {
        self.queues
            .get(index)
            .map(|queue| queue as &dyn ParamValueQueue)
    }

    fn add_parameter_data(&mut self, parameter_id: u32) -> &mut dyn ParamValueQueue {
        let index = match self
            .queues
            .iter()
            .position(|queue| queue.parameter_id() == parameter_id)
        {
            Some(index) => index,
            None => {
                self.queues.push(YaParamValueQueue::with_id(parameter_id));
                self.queues.len() - 1
            }
        };
        &mut self.queues[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_parameter_data_reuses_queue() {
        let mut changes = YaParameterChanges::new();
        changes.add_parameter_data(5).add_point(0, 0.1);
        changes.add_parameter_data(7).add_point(0, 0.2);
        changes.add_parameter_data(5).add_point(32, 0.3);

        assert_eq!(changes.parameter_count(), 2);
        let queue = changes.parameter_data(0).unwrap();
        assert_eq!(queue.parameter_id(), 5);
        assert_eq!(queue.point_count(), 2);
        assert!(changes.parameter_data(2).is_none());
    }

    #[test]
    fn test_snapshot_and_write_back() {
        let mut host_outputs = YaParameterChanges::new();
        host_outputs.add_parameter_data(3).add_point(10, 1.0);

        let mut plugin_outputs = YaParameterChanges::new();
        plugin_outputs.add_parameter_data(3).add_point(20, 0.5);
        plugin_outputs.add_parameter_data(4).add_point(0, 0.75);

        let snapshot = YaParameterChanges::from_changes(&plugin_outputs);
        assert_eq!(snapshot, plugin_outputs);

        snapshot.write_back_outputs(&mut host_outputs);

        let queue = host_outputs.parameter_data(0).unwrap();
        assert_eq!(queue.point_count(), 2);
        assert_eq!(queue.point(1).unwrap().sample_offset, 20);
        assert_eq!(host_outputs.parameter_data(1).unwrap().parameter_id(), 4);
    }
}
