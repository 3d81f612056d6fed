//! Data organization between fetch and render.
//!
//! Submodules:
//! - `frames`: joins sensors with their series, converts readings to AQI
//!   and groups them into chronologically ordered frames.

pub mod frames;
