#![allow(unused_results)]
#![allow(clippy::print_stdout)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]

use std::time::{Duration, Instant};

#[cfg(feature = "no_metrics")]
use std::marker::PhantomData;

use once_cell::sync::Lazy;

use crate::histogram::Histogram;

/// A metric collector for all rings and buffers in this
/// process.
pub static M: Lazy<Metrics> = Lazy::new(Metrics::default);

/// Nanoseconds since the first measurement.
pub(crate) fn clock() -> f64 {
    if cfg!(feature = "no_metrics") {
        0.
    } else {
        let u = uptime();
        (u.as_secs() * 1_000_000_000) as f64 + f64::from(u.subsec_nanos())
    }
}

// not correct, since it starts counting at the first observance...
pub(crate) fn uptime() -> Duration {
    static START: Lazy<Instant> = Lazy::new(Instant::now);

    if cfg!(feature = "no_metrics") {
        Duration::new(0, 0)
    } else {
        START.elapsed()
    }
}

/// Measure the duration of an event, and call `Histogram::measure()`.
pub struct Measure<'h> {
    _start: f64,
    #[cfg(not(feature = "no_metrics"))]
    histo: &'h Histogram,
    #[cfg(feature = "no_metrics")]
    _pd: PhantomData<&'h ()>,
}

impl<'h> Measure<'h> {
    /// The time delta from ctor to dtor is recorded in `histo`.
    #[inline]
    pub fn new(_histo: &'h Histogram) -> Measure<'h> {
        Measure {
            #[cfg(feature = "no_metrics")]
            _pd: PhantomData,
            #[cfg(not(feature = "no_metrics"))]
            histo: _histo,
            _start: clock(),
        }
    }
}

impl<'h> Drop for Measure<'h> {
    #[inline]
    fn drop(&mut self) {
        #[cfg(not(feature = "no_metrics"))]
        self.histo.measure(clock() - self._start);
    }
}

/// Latency histograms, in nanoseconds, for the operations
/// worth profiling.
#[derive(Default, Debug)]
pub struct Metrics {
    /// `io_uring_enter` calls, including time spent blocked.
    pub enter: Histogram,
    /// Publishing staged submissions.
    pub flush: Histogram,
    /// `submit`, `submit_and_wait` and friends.
    pub submit: Histogram,
    /// Waiting for completions.
    pub wait: Histogram,
    /// Looking at the completion queue.
    pub peek: Histogram,
    /// Mapping fresh buffer memory.
    pub buffer_alloc: Histogram,
    /// Growing a buffer by reallocation.
    pub buffer_grow: Histogram,
    /// Taking a buffer from a pool.
    pub pool_get: Histogram,
    /// Returning a buffer to a pool.
    pub pool_put: Histogram,
}

impl Metrics {
    /// Prints a table of latency percentiles for every
    /// operation, busiest first.
    #[cfg(not(feature = "no_metrics"))]
    pub fn print_profile(&self) {
        println!(
            "ringio profile:\n\
             {0: >17} | {1: >10} | {2: >10} | {3: >10} | {4: >10} | {5: >10} | {6: >10} | {7: >10} | {8: >10} | {9: >10}",
            "op",
            "min (us)",
            "med (us)",
            "90 (us)",
            "99 (us)",
            "99.9 (us)",
            "99.99 (us)",
            "max (us)",
            "count",
            "sum (s)"
        );
        println!("{}", "-".repeat(134));

        let p = |mut tuples: Vec<(
            String,
            _,
            _,
            _,
            _,
            _,
            _,
            _,
            _,
            _,
        )>| {
            tuples.sort_by_key(|t| (t.9 * -1. * 1e3) as i64);
            for v in tuples {
                println!(
                    "{0: >17} | {1: >10.1} | {2: >10.1} | {3: >10.1} \
                     | {4: >10.1} | {5: >10.1} | {6: >10.1} | {7: >10.1} \
                     | {8: >10.1} | {9: >10.3}",
                    v.0, v.1, v.2, v.3, v.4, v.5, v.6, v.7, v.8, v.9,
                );
            }
        };

        let lat = |name: &str, histo: &Histogram| {
            (
                name.to_string(),
                histo.percentile(0.) / 1e3,
                histo.percentile(50.) / 1e3,
                histo.percentile(90.) / 1e3,
                histo.percentile(99.) / 1e3,
                histo.percentile(99.9) / 1e3,
                histo.percentile(99.99) / 1e3,
                histo.percentile(100.) / 1e3,
                histo.count(),
                histo.sum() as f64 / 1e9,
            )
        };

        println!("ring:");
        p(vec![
            lat("enter", &self.enter),
            lat("flush", &self.flush),
            lat("submit", &self.submit),
            lat("wait", &self.wait),
            lat("peek", &self.peek),
        ]);

        println!("{}", "-".repeat(134));
        println!("buffers:");
        p(vec![
            lat("alloc", &self.buffer_alloc),
            lat("grow", &self.buffer_grow),
            lat("pool get", &self.pool_get),
            lat("pool put", &self.pool_put),
        ]);

        println!("{}", "-".repeat(134));
    }

    /// Metrics are compiled out.
    #[cfg(feature = "no_metrics")]
    pub fn print_profile(&self) {}
}

#[cfg(all(test, not(feature = "no_metrics")))]
mod tests {
    use super::*;

    #[test]
    fn measure_records_on_drop() {
        let histo = Histogram::default();
        {
            let _measure = Measure::new(&histo);
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(histo.count(), 1);
        assert!(histo.percentile(100.) >= 900_000.);
    }
}
