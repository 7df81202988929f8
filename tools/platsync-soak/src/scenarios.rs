///
/// Soak scenarios.
///
/// Each scenario drives the public platsync API from several threads and
/// checks one guarantee. Worker threads are platsync `Thread`s, so every run
/// also exercises spawn, join and handle release.
///

use std::time::{Duration, Instant};

use platsync_runtime::{
    AsyncJob, Semaphore, SyncError, Thread, ThreadBuilder, Timeout, call, sleep_ms,
};

use crate::errors::SoakError;

const STALL_LIMIT: Duration = Duration::from_secs(5);
const WAIT_OK: u32 = 0;
const WAIT_TIMED_OUT: u32 = 1;
const WAIT_DESTROYED: u32 = 2;

#[derive(Debug)]
pub struct Report {
    pub scenario: &'static str,
    pub elapsed: Duration,
    pub detail: String,
}

impl std::fmt::Display for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:<8} ok in {:>8.2?}  {}",
            self.scenario, self.elapsed, self.detail
        )
    }
}

fn wait_code(result: Result<(), SyncError>) -> u32 {
    match result {
        Ok(()) => WAIT_OK,
        Err(SyncError::Destroyed) => WAIT_DESTROYED,
        Err(_) => WAIT_TIMED_OUT,
    }
}

fn wait_for(
    scenario: &'static str,
    what: &'static str,
    mut done: impl FnMut() -> bool,
) -> Result<(), SoakError> {
    let start = Instant::now();
    while !done() {
        if start.elapsed() > STALL_LIMIT {
            return Err(SoakError::Stalled { scenario, what });
        }
        sleep_ms(1);
    }
    Ok(())
}

fn join_all(threads: Vec<Thread>) -> Result<Vec<u32>, SoakError> {
    threads
        .into_iter()
        .map(|t| t.join(Timeout::from(STALL_LIMIT)).map_err(SoakError::from))
        .collect()
}

/// `n` concurrent increments, then `n` concurrent infinite waits.
pub fn count(n: usize) -> Result<Report, SoakError> {
    const NAME: &str = "count";
    let start = Instant::now();
    let sem = Semaphore::new();

    let posters = (0..n)
        .map(|_| {
            let sem = sem.clone();
            ThreadBuilder::new().spawn(move || {
                sem.increment(1);
                0
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    join_all(posters)?;

    if sem.count() != n as i32 {
        return Err(SoakError::check(
            NAME,
            format!("expected {} units after posting, found {}", n, sem.count()),
        ));
    }

    let waiters = (0..n)
        .map(|_| {
            let sem = sem.clone();
            ThreadBuilder::new().spawn(move || wait_code(sem.wait(Timeout::Infinite)))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let codes = join_all(waiters)?;

    let acquired = codes.iter().filter(|c| **c == WAIT_OK).count();
    if acquired != n || sem.count() != 0 {
        return Err(SoakError::check(
            NAME,
            format!("{} of {} waits succeeded, {} units left", acquired, n, sem.count()),
        ));
    }

    Ok(Report {
        scenario: NAME,
        elapsed: start.elapsed(),
        detail: format!("{} units posted and taken", n),
    })
}

/// Destroy a semaphore with `k` blocked waiters; all must leave and the
/// semaphore must be released exactly once.
pub fn drain(k: usize) -> Result<Report, SoakError> {
    const NAME: &str = "drain";
    let start = Instant::now();
    let sem = Semaphore::new();

    let waiters = (0..k)
        .map(|_| {
            let sem = sem.clone();
            ThreadBuilder::new().spawn(move || wait_code(sem.wait(Timeout::Infinite)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    wait_for(NAME, "waiters to block", || sem.ref_count() == k as i32 + 1)?;
    let destroyed_at = Instant::now();
    if !sem.destroy() {
        return Err(SoakError::check(NAME, "destroy lost a race it had no rival in"));
    }

    let codes = join_all(waiters)?;
    let unblock = destroyed_at.elapsed();
    let drained = codes.iter().filter(|c| **c == WAIT_DESTROYED).count();
    if drained != k {
        return Err(SoakError::check(
            NAME,
            format!("{} of {} waiters saw the semaphore destroyed", drained, k),
        ));
    }
    if sem.release_count() != 1 {
        return Err(SoakError::check(
            NAME,
            format!("released {} times", sem.release_count()),
        ));
    }

    Ok(Report {
        scenario: NAME,
        elapsed: start.elapsed(),
        detail: format!("{} waiters drained in {:.2?}", k, unblock),
    })
}

/// Timed wait on an empty semaphore must time out no earlier than asked and
/// within `slack_ms` after.
pub fn timeout(wait_ms: u32, slack_ms: u32) -> Result<Report, SoakError> {
    const NAME: &str = "timeout";
    let sem = Semaphore::new();

    let start = Instant::now();
    let result = sem.wait(Timeout::Millis(wait_ms));
    let elapsed = start.elapsed();

    match result {
        Err(err) if err.is_timeout() => {}
        other => {
            return Err(SoakError::check(
                NAME,
                format!("expected a timeout, got {:?}", other),
            ));
        }
    }

    let low = Duration::from_millis(u64::from(wait_ms));
    let high = low + Duration::from_millis(u64::from(slack_ms));
    if elapsed < low || elapsed > high {
        return Err(SoakError::check(
            NAME,
            format!("timed out after {:?}, expected {:?}..={:?}", elapsed, low, high),
        ));
    }

    Ok(Report {
        scenario: NAME,
        elapsed,
        detail: format!("asked for {} ms", wait_ms),
    })
}

fn job_work(seed: u64) -> u64 {
    (0..=seed).fold(seed, |acc, x| acc.wrapping_mul(31).wrapping_add(x))
}

/// For each of `n` inputs the inline and background results must agree.
pub fn jobs(n: usize) -> Result<Report, SoakError> {
    const NAME: &str = "jobs";
    let start = Instant::now();

    let mut pending = Vec::with_capacity(n);
    for seed in 0..n as u64 {
        let inline = call::<u64, _>(None, move || job_work(seed))?;
        let job = AsyncJob::new();
        if call(Some(&job), move || job_work(seed))?.is_some() {
            return Err(SoakError::check(NAME, "background call returned a value"));
        }
        pending.push((seed, inline, job));
    }

    for (seed, inline, job) in pending {
        let background = job.get_result_timeout(Timeout::from(STALL_LIMIT));
        if background.is_none() || background != inline {
            return Err(SoakError::check(
                NAME,
                format!("seed {}: inline {:?}, background {:?}", seed, inline, background),
            ));
        }
        job.destroy();
    }

    Ok(Report {
        scenario: NAME,
        elapsed: start.elapsed(),
        detail: format!("{} jobs matched", n),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_scenario() {
        let report = count(16).unwrap();
        assert_eq!(report.scenario, "count");
    }

    #[test]
    fn test_drain_scenario() {
        let report = drain(8).unwrap();
        assert!(report.detail.starts_with("8 waiters"));
    }

    #[test]
    fn test_timeout_scenario() {
        let report = timeout(30, 2_000).unwrap();
        assert!(report.elapsed >= Duration::from_millis(30));
    }

    #[test]
    fn test_jobs_scenario() {
        let report = jobs(8).unwrap();
        assert_eq!(report.detail, "8 jobs matched");
    }

    #[test]
    fn test_report_display() {
        let report = Report {
            scenario: "count",
            elapsed: Duration::from_millis(3),
            detail: "3 units posted and taken".to_string(),
        };
        let line = report.to_string();
        assert!(line.starts_with("count"));
        assert!(line.contains("3 units"));
    }
}
