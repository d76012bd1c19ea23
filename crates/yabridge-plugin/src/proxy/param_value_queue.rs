//! One parameter's automation points within a processing block.

use crate::protocol::UniversalResult;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

const POINT_STACK_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterPoint {
    pub sample_offset: i32,
    pub value: f64,
}

pub trait ParamValueQueue {
    fn parameter_id(&self) -> u32;
    fn point_count(&self) -> usize;
    /// Fails with [`UniversalResult::InvalidArgument`] for an index past the
    /// last point.
    fn point(&self, index: usize) -> Result<ParameterPoint, UniversalResult>;
    /// Appends a point and returns its index.
    fn add_point(&mut self, sample_offset: i32, value: f64) -> usize;
}

/// Serializable snapshot of a [`ParamValueQueue`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct YaParamValueQueue {
    parameter_id: u32,
    points: SmallVec<[ParameterPoint; POINT_STACK_CAPACITY]>,
}

impl YaParamValueQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(parameter_id: u32) -> Self {
        Self {
            parameter_id,
            points: SmallVec::new(),
        }
    }

    /// Copies every point of `queue`, in order.
    pub fn from_queue(queue: &dyn ParamValueQueue) -> Self {
        let points = (0..queue.point_count())
            .filter_map(|index| queue.point(index).ok())
            .collect();

        Self {
            parameter_id: queue.parameter_id(),
            points,
        }
    }

    /// Replays all points into `destination` in their original order. Used to
    /// hand plugin generated automation back to the host.
    pub fn write_back_outputs(&self, destination: &mut dyn ParamValueQueue) {
        for point in &self.points {
            destination.add_point(point.sample_offset, point.value);
        }
    }

    pub fn points(&self) -> &[ParameterPoint] {
        &self.points
    }
}

impl ParamValueQueue for YaParamValueQueue {
    fn parameter_id(&self) -> u32 {
        self.parameter_id
    }

    fn point_count(&self) -> usize {
        self.points.len()
    }

    fn point(&self, index: usize) -> Result<ParameterPoint, UniversalResult> {
        self.points
            .get(index)
            .copied()
            .ok_or(UniversalResult::InvalidArgument)
    }

    fn add_point(&mut self, sample_offset: i32, value: f64) -> usize {
        self.points.push(ParameterPoint {
            sample_offset,
            value,
        });
        self.points.len() - 1
    }
}
