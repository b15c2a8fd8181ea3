//! Helpers shared by the relay integration tests

#![allow(dead_code)]

use parking_lot::Mutex;
use radar_relay::{LogSinks, Logger, Severity};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Version 2, one null-prevout input, one 1000-sat output with an empty script
pub const SAMPLE_TX: &str = "02000000010000000000000000000000000000000000000000000000000000000000000000ffffffff00ffffffff01e8030000000000000000000000";

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn sample_tx() -> Vec<u8> {
    hex::decode(SAMPLE_TX).unwrap()
}

/// Every line a logger wrote, as (severity, message)
#[derive(Clone, Default)]
pub struct LogRecorder {
    lines: Arc<Mutex<Vec<(Severity, String)>>>,
}

impl LogRecorder {
    pub fn logger(&self) -> Logger {
        let lines = Arc::clone(&self.lines);
        Logger::new(
            LogSinks::uniform(Arc::new(
                move |severity: Severity, _category: &str, message: &str| {
                    lines.lock().push((severity, message.to_string()));
                },
            )),
            Severity::Debug,
        )
    }

    pub fn count(&self, severity: Severity, prefix: &str) -> usize {
        self.lines
            .lock()
            .iter()
            .filter(|(s, message)| *s == severity && message.starts_with(prefix))
            .count()
    }
}

pub fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}
