// Copyright 2025 corert contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Process-wide logging setup.
//!
//! Builds on [`tracing`]/`tracing-subscriber` rather than a hand-rolled
//! mutex-serialized writer: the subscriber already guarantees
//! line-atomic, cross-thread-safe writes, so this module only supplies
//! the timestamp format and the stdout/stderr severity split this
//! crate's callers expect.

use std::fmt;
use std::io::{self, Write};

use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// `YYYY-MM-DD HH:MM:SS.mmm`, matching the original timestamp format.
struct Timestamp;

impl FormatTime for Timestamp {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        let millis = now.subsec_millis();
        let total_secs = now.as_secs();

        // Days-since-epoch civil calendar conversion (Howard Hinnant's
        // algorithm), avoiding a chrono/time dependency for one field.
        let days = (total_secs / 86_400) as i64;
        let secs_of_day = total_secs % 86_400;
        let (year, month, day) = civil_from_days(days);
        let hour = secs_of_day / 3600;
        let minute = (secs_of_day % 3600) / 60;
        let second = secs_of_day % 60;

        write!(
            w,
            "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}.{millis:03}"
        )
    }
}

fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

#[derive(Clone)]
struct SplitWriter;

struct SplitGuard(bool);

impl io::Write for SplitGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.0 {
            io::stderr().write(buf)
        } else {
            io::stdout().write(buf)
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.0 {
            io::stderr().flush()
        } else {
            io::stdout().flush()
        }
    }
}

impl<'a> MakeWriter<'a> for SplitWriter {
    type Writer = SplitGuard;

    fn make_writer(&'a self) -> Self::Writer {
        SplitGuard(false)
    }

    fn make_writer_for(&'a self, meta: &tracing::Metadata<'_>) -> Self::Writer {
        use tracing::Level;
        SplitGuard(*meta.level() <= Level::WARN)
    }
}

/// Installs the process-wide subscriber. Severity at `WARN` and above is
/// routed to stderr; everything else goes to stdout. Honors
/// `RUST_LOG` through the standard `EnvFilter` the way the rest of the
/// ecosystem does.
pub fn init() {
    tracing_subscriber::fmt()
        .with_timer(Timestamp)
        .with_writer(SplitWriter)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}
