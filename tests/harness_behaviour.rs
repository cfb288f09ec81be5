//! Behavioural scenarios for complete harness runs.

mod harness;
