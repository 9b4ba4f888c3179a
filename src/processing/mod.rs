//! Event decoding and position smoothing

pub mod kalman;
pub mod parser;

pub use kalman::{FilterParameters, PositionKalmanFilter};
pub use parser::{DeviceMessage, MessageParser, PingSample, RangeSample};
