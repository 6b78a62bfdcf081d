use crossbeam_channel::Receiver;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tally::prelude::*;
use tally::{StatsdClient, Tags};

pub const TIMEOUT: Duration = Duration::from_secs(5);

#[allow(dead_code)]
pub fn run_arc_threaded_test(client: StatsdClient, num_threads: u64, iterations: u64) -> Arc<StatsdClient> {
    let shared_client = Arc::new(client);

    let threads: Vec<_> = (0..num_threads)
        .map(|t| {
            let local_client = Arc::clone(&shared_client);

            thread::spawn(move || {
                let mut tags = Tags::new();
                tags.insert("thread".to_string(), t.to_string());

                for i in 0..iterations {
                    local_client.increment_counter("tally", "some.counter", &tags, i as i64);
                    local_client.increment_sample_counter("tally", "some.sampled", &tags, i as i64, 0.5);
                    local_client.timed_event("tally", "some.timer", &tags, i);
                    local_client.gauge_reading("tally", "some.gauge", &tags, i as i64);
                    thread::sleep(Duration::from_millis(1));
                }
            })
        })
        .collect();

    for t in threads {
        t.join().unwrap();
    }

    shared_client
}

/// Collect exactly `n` values from the channel, failing if any of them
/// takes too long to show up.
#[allow(dead_code)]
pub fn collect<T>(rx: &Receiver<T>, n: usize) -> Vec<T> {
    (0..n).map(|_| rx.recv_timeout(TIMEOUT).unwrap()).collect()
}

/// Count how many times each metric type shows up in the lines received.
#[allow(dead_code)]
pub fn count_by_type<I, S>(lines: I) -> HashMap<String, usize>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut counts = HashMap::new();
    for line in lines {
        let line = line.as_ref();
        let kind = line.rsplit('|').next().unwrap_or("");
        // Sampled counters end with `|c@<rate>`
        let kind = match kind.split_once('@') {
            Some((t, _)) => format!("{}@", t),
            None => kind.to_string(),
        };

        *counts.entry(kind).or_insert(0) += 1;
    }

    counts
}
