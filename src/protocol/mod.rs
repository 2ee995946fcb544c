//! Protocol module for decoding sensor payloads.
//!
//! The sensor has no framed protocol; each characteristic carries one raw
//! value, decoded by [`telemetry`].

pub mod telemetry;

pub use telemetry::{
    decode, decode_battery, decode_pressure, decode_temperature, is_underflow, Measurement,
};
