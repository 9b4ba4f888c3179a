//! Ranging command protocol

pub mod controller;

pub use controller::{format_ping, format_trigger, UwbController};
