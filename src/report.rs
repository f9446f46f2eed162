//! Aggregation and rendering of run results.
//!
//! [`summarize`] turns the buffered outcomes of a summary-mode run into
//! [`RunStatistics`] exactly once, after every worker has finished.
//! [`render_summary`] prints them; [`render_stream`] and [`CsvRow`] cover
//! the streaming CSV format.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use crate::connection_pool::ConnectionStats;
use crate::errors::ErrorCategory;
use crate::outcome::RequestOutcome;
use crate::percentiles::PercentileStats;

/// Percentiles reported in the latency distribution.
pub const PERCENTILE_LADDER: [f64; 11] = [
    10.0, 25.0, 50.0, 66.0, 75.0, 80.0, 90.0, 95.0, 98.0, 99.0, 99.9,
];

/// Number of evenly spaced histogram buckets before the closing mark.
pub const HISTOGRAM_BUCKETS: usize = 10;

/// Width of the longest histogram bar.
const BAR_WIDTH: usize = 40;
const BAR_CHAR: &str = "■";

/// CSV column names, in output order.
pub const CSV_HEADER: [&str; 9] = [
    "response-time",
    "DNS+dialup",
    "DNS",
    "Response-delay",
    "Response-read",
    "status-code",
    "size",
    "offset",
    "error",
];

/// One histogram bucket: latencies up to and including `mark`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bucket {
    pub mark: f64,
    pub count: usize,
    pub frequency: f64,
}

/// Latency statistics over successful exchanges.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencySummary {
    pub fastest: Duration,
    pub slowest: Duration,
    pub average: Duration,
    /// One entry per [`PERCENTILE_LADDER`] rung.
    pub percentiles: Vec<(f64, Duration)>,
    pub histogram: Vec<Bucket>,
}

/// Average, fastest and slowest for one phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseStat {
    pub average: Duration,
    pub fastest: Duration,
    pub slowest: Duration,
}

/// Phase breakdown over successful exchanges. Exchanges that reused a
/// connection count as zero for the connection phases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseSummary {
    pub dns_dialup: PhaseStat,
    pub dns: PhaseStat,
    pub wait: PhaseStat,
    pub read: PhaseStat,
}

/// Aggregate statistics for a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunStatistics {
    pub total_requests: usize,
    pub successes: usize,
    pub errors: usize,
    pub wall_time: Duration,
    /// All outcomes, successful or not, per second of wall time.
    pub requests_per_sec: f64,
    /// `None` when no exchange succeeded.
    pub latency: Option<LatencySummary>,
    pub phases: Option<PhaseSummary>,
    pub total_bytes: u64,
    pub bytes_per_request: u64,
    pub connections: ConnectionStats,
    pub status_codes: BTreeMap<u16, usize>,
    pub error_messages: BTreeMap<String, usize>,
    pub error_categories: BTreeMap<ErrorCategory, usize>,
}

/// Aggregate the outcomes of a run.
pub fn summarize(outcomes: &[RequestOutcome], wall_time: Duration) -> RunStatistics {
    let mut status_codes = BTreeMap::new();
    let mut error_messages = BTreeMap::new();
    let mut error_categories = BTreeMap::new();
    let mut connections = ConnectionStats::default();
    let mut latencies = Vec::with_capacity(outcomes.len());
    let mut total_bytes = 0u64;

    for outcome in outcomes {
        match outcome.error {
            Some(ref error) => {
                *error_messages.entry(error.message.clone()).or_insert(0) += 1;
                *error_categories.entry(error.category).or_insert(0) += 1;
            }
            None => {
                *status_codes.entry(outcome.status).or_insert(0) += 1;
                connections.record(outcome.new_connection());
                latencies.push(outcome.latency);
                total_bytes += outcome.size;
            }
        }
    }

    let successes = latencies.len();
    let errors = outcomes.len() - successes;
    let requests_per_sec = if wall_time.is_zero() {
        0.0
    } else {
        outcomes.len() as f64 / wall_time.as_secs_f64()
    };

    latencies.sort_unstable();
    let latency = latency_summary(&latencies);
    let phases = phase_summary(outcomes.iter().filter(|o| o.is_success()));

    RunStatistics {
        total_requests: outcomes.len(),
        successes,
        errors,
        wall_time,
        requests_per_sec,
        latency,
        phases,
        total_bytes,
        bytes_per_request: if successes > 0 {
            total_bytes / successes as u64
        } else {
            0
        },
        connections,
        status_codes,
        error_messages,
        error_categories,
    }
}

fn latency_summary(sorted: &[Duration]) -> Option<LatencySummary> {
    let fastest = *sorted.first()?;
    let slowest = *sorted.last()?;
    let total: Duration = sorted.iter().sum();
    let average = total / sorted.len() as u32;

    let percentiles = PERCENTILE_LADDER
        .iter()
        .filter_map(|&p| percentile(sorted, p).map(|value| (p, value)))
        .collect();

    Some(LatencySummary {
        fastest,
        slowest,
        average,
        percentiles,
        histogram: histogram(sorted),
    })
}

fn phase_summary<'a>(outcomes: impl Iterator<Item = &'a RequestOutcome>) -> Option<PhaseSummary> {
    let mut dns_dialup = PhaseAccumulator::default();
    let mut dns = PhaseAccumulator::default();
    let mut wait = PhaseAccumulator::default();
    let mut read = PhaseAccumulator::default();

    for outcome in outcomes {
        dns_dialup.add(outcome.phases.dial.unwrap_or_default());
        dns.add(outcome.phases.dns.unwrap_or_default());
        wait.add(outcome.phases.wait);
        read.add(outcome.phases.read);
    }

    Some(PhaseSummary {
        dns_dialup: dns_dialup.finish()?,
        dns: dns.finish()?,
        wait: wait.finish()?,
        read: read.finish()?,
    })
}

#[derive(Default)]
struct PhaseAccumulator {
    count: u32,
    total: Duration,
    fastest: Option<Duration>,
    slowest: Duration,
}

impl PhaseAccumulator {
    fn add(&mut self, value: Duration) {
        self.count += 1;
        self.total += value;
        self.fastest = Some(self.fastest.map_or(value, |f| f.min(value)));
        self.slowest = self.slowest.max(value);
    }

    fn finish(self) -> Option<PhaseStat> {
        Some(PhaseStat {
            average: self.total.checked_div(self.count)?,
            fastest: self.fastest?,
            slowest: self.slowest,
        })
    }
}

/// Nearest-rank percentile of an ascending slice: the value at index
/// `ceil(p/100 * n) - 1`, clamped to the slice.
pub fn percentile(sorted: &[Duration], p: f64) -> Option<Duration> {
    if sorted.is_empty() {
        return None;
    }
    let n = sorted.len();
    // The epsilon absorbs float error such as 99.9 * 1000 / 100 = 999.0000000000001.
    let rank = (p * n as f64 / 100.0 - 1e-9).ceil();
    let rank = if rank.is_finite() && rank > 0.0 {
        (rank as usize).min(n)
    } else {
        1
    };
    Some(sorted[rank - 1])
}

/// Histogram of an ascending slice: ten evenly spaced marks from the
/// fastest value, plus a final mark at the slowest. Each value lands in the
/// first bucket whose mark it does not exceed.
pub fn histogram(sorted: &[Duration]) -> Vec<Bucket> {
    let (Some(fastest), Some(slowest)) = (sorted.first(), sorted.last()) else {
        return Vec::new();
    };
    let fastest = fastest.as_secs_f64();
    let slowest = slowest.as_secs_f64();
    let step = (slowest - fastest) / HISTOGRAM_BUCKETS as f64;

    let mut marks: Vec<f64> = (0..HISTOGRAM_BUCKETS)
        .map(|i| fastest + step * i as f64)
        .collect();
    marks.push(slowest);

    let mut counts = vec![0usize; marks.len()];
    let mut bucket = 0;
    for latency in sorted.iter().map(Duration::as_secs_f64) {
        while latency > marks[bucket] && bucket < marks.len() - 1 {
            bucket += 1;
        }
        counts[bucket] += 1;
    }

    let total = sorted.len() as f64;
    marks
        .into_iter()
        .zip(counts)
        .map(|(mark, count)| Bucket {
            mark,
            count,
            frequency: count as f64 / total,
        })
        .collect()
}

fn render_histogram(buckets: &[Bucket], out: &mut String) {
    let max = buckets.iter().map(|b| b.count).max().unwrap_or(0);
    for bucket in buckets {
        let bar_len = if max > 0 {
            (bucket.count * BAR_WIDTH + max / 2) / max
        } else {
            0
        };
        out.push_str(&format!(
            "  {:.3} [{}]\t|{}\n",
            bucket.mark,
            bucket.count,
            BAR_CHAR.repeat(bar_len)
        ));
    }
}

fn format_percent(p: f64) -> String {
    if p.fract() == 0.0 {
        format!("{}", p as u64)
    } else {
        format!("{}", p)
    }
}

fn phase_line(label: &str, stat: &PhaseStat) -> String {
    format!(
        "  {}\t{:.4} secs, {:.4} secs, {:.4} secs\n",
        label,
        stat.average.as_secs_f64(),
        stat.fastest.as_secs_f64(),
        stat.slowest.as_secs_f64()
    )
}

/// Human-readable report for a summary-mode run.
pub fn render_summary(stats: &RunStatistics) -> String {
    let mut out = String::new();

    out.push_str("\nSummary:\n");
    out.push_str(&format!("  Total:\t{:.4} secs\n", stats.wall_time.as_secs_f64()));
    if let Some(ref latency) = stats.latency {
        out.push_str(&format!("  Slowest:\t{:.4} secs\n", latency.slowest.as_secs_f64()));
        out.push_str(&format!("  Fastest:\t{:.4} secs\n", latency.fastest.as_secs_f64()));
        out.push_str(&format!("  Average:\t{:.4} secs\n", latency.average.as_secs_f64()));
    }
    out.push_str(&format!("  Requests/sec:\t{:.4}\n", stats.requests_per_sec));
    out.push_str("  \n");
    if stats.total_bytes > 0 {
        out.push_str(&format!("  Total data:\t{} bytes\n", stats.total_bytes));
        out.push_str(&format!("  Size/request:\t{} bytes\n", stats.bytes_per_request));
    }

    if let Some(ref latency) = stats.latency {
        out.push_str("\nResponse time histogram:\n");
        render_histogram(&latency.histogram, &mut out);

        out.push_str("\n\nLatency distribution:\n");
        for (p, value) in &latency.percentiles {
            out.push_str(&format!(
                "  {}% in {:.4} secs\n",
                format_percent(*p),
                value.as_secs_f64()
            ));
        }
    }

    if let Some(ref phases) = stats.phases {
        out.push_str("\nDetails (average, fastest, slowest):\n");
        out.push_str(&phase_line("DNS+dialup:", &phases.dns_dialup));
        out.push_str(&phase_line("DNS-lookup:", &phases.dns));
        out.push_str(&phase_line("resp wait:", &phases.wait));
        out.push_str(&phase_line("resp read:", &phases.read));
        out.push_str(&format!(
            "  New connections:\t{}\n",
            stats.connections.new_connections
        ));
    }

    if !stats.status_codes.is_empty() {
        out.push_str("\nStatus code distribution:\n");
        for (code, count) in &stats.status_codes {
            out.push_str(&format!("  [{}]\t{} responses\n", code, count));
        }
    }

    if !stats.error_messages.is_empty() {
        out.push_str("\nError distribution:\n");
        for (message, count) in &stats.error_messages {
            out.push_str(&format!("  [{}]\t{}\n", count, message));
        }

        out.push_str("\nError categories:\n");
        for (category, count) in &stats.error_categories {
            out.push_str(&format!("  [{}]\t{}\n", count, category));
        }
    }

    out
}

/// One CSV row of the streaming output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CsvRow {
    #[serde(rename = "response-time")]
    pub response_time: String,
    #[serde(rename = "DNS+dialup")]
    pub dns_dialup: String,
    #[serde(rename = "DNS")]
    pub dns: String,
    #[serde(rename = "Response-delay")]
    pub response_delay: String,
    #[serde(rename = "Response-read")]
    pub response_read: String,
    #[serde(rename = "status-code")]
    pub status_code: u16,
    pub size: u64,
    pub offset: String,
    pub error: String,
}

fn secs(d: Duration) -> String {
    format!("{:.4}", d.as_secs_f64())
}

impl From<&RequestOutcome> for CsvRow {
    fn from(outcome: &RequestOutcome) -> Self {
        Self {
            response_time: secs(outcome.latency),
            dns_dialup: secs(outcome.phases.dial.unwrap_or_default()),
            dns: secs(outcome.phases.dns.unwrap_or_default()),
            response_delay: secs(outcome.phases.wait),
            response_read: secs(outcome.phases.read),
            status_code: outcome.status,
            size: outcome.size,
            offset: secs(outcome.offset),
            error: outcome
                .error
                .as_ref()
                .map(|e| e.message.clone())
                .unwrap_or_default(),
        }
    }
}

/// Render one outcome as a CSV row, without the line terminator.
pub fn render_stream(outcome: &RequestOutcome) -> Result<String, csv::Error> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.serialize(CsvRow::from(outcome))?;
    let bytes = writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))?;

    Ok(String::from_utf8_lossy(&bytes)
        .trim_end_matches(['\r', '\n'])
        .to_string())
}

/// Closing lines for a streamed run. Rows already went to the output, so
/// this is the only place the HDR latency percentiles show up.
pub fn render_stream_footer(
    records: u64,
    errors: u64,
    latency: Option<&PercentileStats>,
    connections: &ConnectionStats,
    wall_time: Duration,
) -> String {
    let mut out = format!(
        "Streamed {} results ({} errors) in {:.4} secs.\n",
        records,
        errors,
        wall_time.as_secs_f64()
    );
    if let Some(stats) = latency {
        out.push_str(&format!("Latency: {}\n", stats.format()));
    }
    out.push_str(&format!("Connections: {}\n", connections.format()));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TransportError;
    use crate::outcome::Phases;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn success(latency: Duration, status: u16) -> RequestOutcome {
        RequestOutcome {
            worker: 0,
            status,
            latency,
            phases: Phases {
                dns: None,
                dial: None,
                wait: latency,
                read: Duration::ZERO,
            },
            size: 100,
            offset: Duration::ZERO,
            error: None,
        }
    }

    fn failure(message: &str) -> RequestOutcome {
        RequestOutcome {
            worker: 0,
            status: 0,
            latency: ms(1),
            phases: Phases::default(),
            size: 0,
            offset: Duration::ZERO,
            error: Some(TransportError::new(ErrorCategory::ConnectError, message)),
        }
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let sorted: Vec<Duration> = (1..=100).map(ms).collect();
        assert_eq!(percentile(&sorted, 10.0), Some(ms(10)));
        assert_eq!(percentile(&sorted, 50.0), Some(ms(50)));
        assert_eq!(percentile(&sorted, 66.0), Some(ms(66)));
        assert_eq!(percentile(&sorted, 99.0), Some(ms(99)));
        assert_eq!(percentile(&sorted, 99.9), Some(ms(100)));

        let thousand: Vec<Duration> = (1..=1000).map(ms).collect();
        assert_eq!(percentile(&thousand, 99.9), Some(ms(999)));

        assert_eq!(percentile(&[ms(7)], 10.0), Some(ms(7)));
        assert_eq!(percentile(&[], 50.0), None);
    }

    #[test]
    fn test_percentile_ladder_is_monotonic() {
        let outcomes: Vec<_> = [5, 3, 9, 1, 7, 2, 8, 4, 6, 10, 30, 11]
            .iter()
            .map(|&n| success(ms(n), 200))
            .collect();
        let stats = summarize(&outcomes, Duration::from_secs(1));
        let latency = stats.latency.unwrap();

        assert_eq!(latency.percentiles.len(), PERCENTILE_LADDER.len());
        for pair in latency.percentiles.windows(2) {
            assert!(pair[0].1 <= pair[1].1);
        }
        assert_eq!(latency.fastest, ms(1));
        assert_eq!(latency.slowest, ms(30));
    }

    #[test]
    fn test_histogram_counts_every_value() {
        let sorted: Vec<Duration> = (1..=100).map(ms).collect();
        let buckets = histogram(&sorted);

        assert_eq!(buckets.len(), HISTOGRAM_BUCKETS + 1);
        assert_eq!(buckets.iter().map(|b| b.count).sum::<usize>(), 100);
        // The first mark is the fastest value itself.
        assert_eq!(buckets[0].count, 1);
        assert!((buckets[10].mark - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_histogram_single_value() {
        let buckets = histogram(&[ms(5), ms(5)]);
        assert_eq!(buckets.len(), HISTOGRAM_BUCKETS + 1);
        assert_eq!(buckets[0].count, 2);
        assert!(histogram(&[]).is_empty());
    }

    #[test]
    fn test_errors_are_excluded_from_latency_and_status() {
        let outcomes = vec![
            success(ms(10), 200),
            success(ms(20), 404),
            failure("connection refused"),
            failure("connection refused"),
        ];
        let stats = summarize(&outcomes, Duration::from_secs(2));

        assert_eq!(stats.total_requests, 4);
        assert_eq!(stats.successes, 2);
        assert_eq!(stats.errors, 2);
        assert_eq!(stats.requests_per_sec, 2.0);
        assert_eq!(stats.status_codes.get(&200), Some(&1));
        assert_eq!(stats.status_codes.get(&404), Some(&1));
        assert!(!stats.status_codes.contains_key(&0));
        assert_eq!(stats.error_messages.get("connection refused"), Some(&2));
        assert_eq!(
            stats.error_categories.get(&ErrorCategory::ConnectError),
            Some(&2)
        );
        assert_eq!(stats.latency.unwrap().slowest, ms(20));
        assert_eq!(stats.total_bytes, 200);
        assert_eq!(stats.bytes_per_request, 100);
    }

    #[test]
    fn test_all_errors_has_no_latency() {
        let outcomes = vec![failure("dns error"), failure("dns error")];
        let stats = summarize(&outcomes, Duration::from_secs(1));
        assert!(stats.latency.is_none());
        assert!(stats.phases.is_none());

        let rendered = render_summary(&stats);
        assert!(rendered.contains("Error distribution:"));
        assert!(rendered.contains("[2]\tdns error"));
        assert!(!rendered.contains("Latency distribution"));
    }

    #[test]
    fn test_phase_summary_counts_reuse_as_zero() {
        let mut first = success(ms(10), 200);
        first.phases.dial = Some(ms(4));
        first.phases.dns = Some(ms(1));
        let second = success(ms(2), 200);

        let stats = summarize(&[first, second], Duration::from_secs(1));
        let phases = stats.phases.unwrap();
        assert_eq!(phases.dns_dialup.slowest, ms(4));
        assert_eq!(phases.dns_dialup.fastest, Duration::ZERO);
        assert_eq!(phases.dns_dialup.average, ms(2));
        assert_eq!(stats.connections.new_connections, 1);
        assert_eq!(stats.connections.reused_connections, 1);
    }

    #[test]
    fn test_render_summary_sections() {
        let outcomes: Vec<_> = (1..=20).map(|n| success(ms(n), 200)).collect();
        let stats = summarize(&outcomes, Duration::from_secs(1));
        let rendered = render_summary(&stats);

        assert!(rendered.contains("Summary:"));
        assert!(rendered.contains("Requests/sec:\t20.0000"));
        assert!(rendered.contains("Response time histogram:"));
        assert!(rendered.contains("■"));
        assert!(rendered.contains("  99.9% in 0.0200 secs"));
        assert!(rendered.contains("  50% in 0.0100 secs"));
        assert!(rendered.contains("Details (average, fastest, slowest):"));
        assert!(rendered.contains("[200]\t20 responses"));
        assert!(!rendered.contains("Error distribution"));
    }

    #[test]
    fn test_render_stream_row() {
        let mut outcome = success(Duration::from_micros(12_345), 200);
        outcome.offset = Duration::from_millis(1500);
        assert_eq!(
            render_stream(&outcome).unwrap(),
            "0.0123,0.0000,0.0000,0.0123,0.0000,200,100,1.5000,"
        );

        let failed = failure("connect error: refused, twice");
        let row = render_stream(&failed).unwrap();
        assert!(row.ends_with(",0,0,0.0000,\"connect error: refused, twice\""));
    }

    #[test]
    fn test_stream_footer_includes_latency_percentiles() {
        let latency = PercentileStats {
            count: 4,
            min: 1_000,
            max: 9_000,
            mean: 4_000.0,
            p50: 3_000,
            p90: 8_000,
            p95: 9_000,
            p99: 9_000,
            p99_9: 9_000,
        };
        let connections = ConnectionStats {
            total_requests: 4,
            new_connections: 1,
            reused_connections: 3,
        };

        let footer = render_stream_footer(4, 1, Some(&latency), &connections, ms(1500));
        assert!(footer.starts_with("Streamed 4 results (1 errors) in 1.5000 secs."));
        assert!(footer.contains("p50=3.00ms"));
        assert!(footer.contains("p99=9.00ms"));
        assert!(footer.contains("Reused: 3"));

        let footer = render_stream_footer(0, 0, None, &ConnectionStats::default(), ms(10));
        assert!(!footer.contains("Latency:"));
        assert!(footer.contains("Connections:"));
    }
}
