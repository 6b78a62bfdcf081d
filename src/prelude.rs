// Tally - An asynchronous UDP Statsd client for Rust!
//
// Copyright 2024-2026 The Tally Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Export commonly used parts of Tally for easy glob imports
//!
//! # Example
//!
//! ```no_run
//! use tally::prelude::*;
//! use tally::{Configuration, StatsdClient, Tags};
//!
//! let client = StatsdClient::from_config(Configuration::new("localhost", 8125));
//! let tags = Tags::new();
//!
//! client.increment_counter("some.prefix", "some.counter", &tags, 1);
//! client.timed_event("some.prefix", "some.timer", &tags, 23);
//! client.gauge_reading("some.prefix", "some.gauge", &tags, 45);
//! client.increment_sample_counter("some.prefix", "some.sampled", &tags, 1, 0.5);
//! ```

pub use crate::client::{Counted, Gauged, MetricClient, SampleCounted, Timed, UniqueCounted};
