use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::thread;
use std::time::{Duration, Instant};

/// Run-wide counters with an optional heartbeat that logs them periodically.
#[derive(Clone)]
pub struct Progress {
    enabled: bool,
    stage: Arc<Mutex<String>>,
    rows_done: Arc<AtomicUsize>,
    rows_total: Arc<AtomicUsize>,
    bytes_done: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub stage: String,
    pub rows_done: usize,
    pub rows_total: usize,
    pub bytes_done: u64,
}

impl Progress {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            stage: Arc::new(Mutex::new(String::new())),
            rows_done: Arc::new(AtomicUsize::new(0)),
            rows_total: Arc::new(AtomicUsize::new(0)),
            bytes_done: Arc::new(AtomicU64::new(0)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_stage(&self, s: &str) {
        if self.enabled {
            *self.stage.lock().unwrap_or_else(|p| p.into_inner()) = s.to_string();
        }
    }
    pub fn set_rows_total(&self, n: usize) {
        self.rows_total.store(n, Ordering::Relaxed);
    }
    pub fn inc_row(&self) {
        self.rows_done.fetch_add(1, Ordering::Relaxed);
    }
    pub fn add_bytes(&self, n: u64) {
        self.bytes_done.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            stage: self.stage.lock().unwrap_or_else(|p| p.into_inner()).clone(),
            rows_done: self.rows_done.load(Ordering::Relaxed),
            rows_total: self.rows_total.load(Ordering::Relaxed),
            bytes_done: self.bytes_done.load(Ordering::Relaxed),
        }
    }

    /// Log a status line every `every` until [`Progress::stop`].
    pub fn start(&self, every: Duration) {
        if !self.enabled {
            return;
        }
        self.running.store(true, Ordering::Relaxed);
        let this = self.clone();
        thread::spawn(move || {
            let t0 = Instant::now();
            while this.running.load(Ordering::Relaxed) {
                thread::sleep(every);
                if !this.running.load(Ordering::Relaxed) {
                    break;
                }
                let s = this.snapshot();
                tracing::info!(
                    elapsed_s = t0.elapsed().as_secs(),
                    "{} | rows {}/{} | {} bytes sent",
                    s.stage,
                    s.rows_done,
                    s.rows_total,
                    s.bytes_done
                );
            }
        });
    }
    pub fn stop(&self) {
        if self.enabled {
            self.running.store(false, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_shared_between_clones() {
        let p = Progress::new(true);
        let q = p.clone();
        p.set_rows_total(3);
        q.inc_row();
        q.add_bytes(10);
        p.set_stage("uploading");
        let s = p.snapshot();
        assert_eq!((s.rows_done, s.rows_total, s.bytes_done), (1, 3, 10));
        assert_eq!(s.stage, "uploading");
    }

    #[test]
    fn disabled_progress_ignores_stage() {
        let p = Progress::new(false);
        p.set_stage("x");
        assert_eq!(p.snapshot().stage, "");
    }
}
