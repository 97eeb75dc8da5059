//! Transform points and targets.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::graph::{ComputationId, NodeKind};
use crate::reactive::SourceId;

/// A named extension point in the transform pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Point {
    /// A signal's initial value. May be replaced.
    Init,
    /// A tracked signal read. May be replaced; the stored value is untouched.
    Get,
    /// An untracked signal read. May be replaced; the stored value is untouched.
    Peek,
    /// A signal write, before change detection. May be replaced.
    Set,
    /// A computation is about to run its closure.
    BeforeCompute,
    /// A memo produced a value. May be replaced before it is cached.
    Compute,
    /// A computation finished running.
    AfterCompute,
    /// An effect is about to run its closure.
    BeforeEffect,
    /// An effect finished running its closure.
    AfterEffect,
    /// An outermost batch opened.
    BeforeBatch,
    /// An outermost batch closed.
    AfterBatch,
    /// A signal or computation was disposed.
    Dispose,
}

impl Point {
    /// Every point, in pipeline order.
    pub const ALL: [Point; 12] = [
        Point::Init,
        Point::Get,
        Point::Peek,
        Point::Set,
        Point::BeforeCompute,
        Point::Compute,
        Point::AfterCompute,
        Point::BeforeEffect,
        Point::AfterEffect,
        Point::BeforeBatch,
        Point::AfterBatch,
        Point::Dispose,
    ];

    /// The point's name, as used in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Point::Init => "init",
            Point::Get => "get",
            Point::Peek => "peek",
            Point::Set => "set",
            Point::BeforeCompute => "before-compute",
            Point::Compute => "compute",
            Point::AfterCompute => "after-compute",
            Point::BeforeEffect => "before-effect",
            Point::AfterEffect => "after-effect",
            Point::BeforeBatch => "before-batch",
            Point::AfterBatch => "after-batch",
            Point::Dispose => "dispose",
        }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown point name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown transform point `{0}`")]
pub struct UnknownPoint(pub String);

impl FromStr for Point {
    type Err = UnknownPoint;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Point::ALL
            .into_iter()
            .find(|point| point.as_str() == s)
            .ok_or_else(|| UnknownPoint(s.to_owned()))
    }
}

/// What a transform event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// A signal.
    Signal(SourceId),
    /// A memo or effect.
    Computation {
        /// The computation.
        id: ComputationId,
        /// Whether it is a memo or an effect.
        kind: NodeKind,
    },
    /// The outermost batch frame.
    Batch,
}
