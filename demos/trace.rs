//! Replays allocation traces against a fresh heap.
//!
//! Each trace is a text file whose request lines read `a <id> <bytes>` or
//! `f <id>`; any other line (such as the numeric header of the classic trace
//! files) is skipped.
//!
//! ```text
//! cargo run --release --example trace -- traces/*.rep
//! ```

use std::{collections::HashMap, env, fs, process, time::Instant};

use segfit::{BlockPtr, Heap, base::Mmap};

#[derive(Debug, Clone, Copy)]
enum Request {
    Allocate { id: usize, size: usize },
    Free { id: usize },
}

fn parse(text: &str) -> Vec<Request> {
    let iter = text.lines().filter_map(|line| {
        let mut words = line.split_whitespace();
        let op = words.next()?;
        let id = words.next()?.parse().ok()?;
        match op {
            "a" => Some(Request::Allocate { id, size: words.next()?.parse().ok()? }),
            "f" => Some(Request::Free { id }),
            "r" => {
                eprintln!("skipping reallocation of {id}: not supported");
                None
            }
            _ => None,
        }
    });
    iter.collect()
}

struct Report {
    requests: usize,
    peak_payload: usize,
    peak_heap: usize,
    secs: f64,
    violations: usize,
}

fn replay(requests: &[Request]) -> Result<Report, String> {
    let mut heap = Heap::new(Mmap::new().map_err(|err| err.to_string())?)
        .map_err(|err| err.to_string())?;
    let mut live: HashMap<usize, (BlockPtr, usize)> = HashMap::new();
    let (mut payload, mut peak_payload) = (0, 0);

    let start = Instant::now();
    for &request in requests {
        match request {
            Request::Allocate { id, size } => {
                let Some(ptr) = heap.allocate(size) else {
                    return Err(format!("allocation of {size} bytes for {id} failed"));
                };
                live.insert(id, (ptr, size));
                payload += size;
                peak_payload = peak_payload.max(payload);
            }
            Request::Free { id } => {
                let (ptr, size) = live.remove(&id).ok_or_else(|| format!("{id} freed twice"))?;
                heap.free(Some(ptr));
                payload -= size;
            }
        }
    }
    let secs = start.elapsed().as_secs_f64();

    Ok(Report {
        requests: requests.len(),
        peak_payload,
        peak_heap: heap.stat().heap_size,
        secs,
        violations: heap.check(false).len(),
    })
}

fn main() {
    let paths: Vec<_> = env::args().skip(1).collect();
    if paths.is_empty() {
        eprintln!("usage: trace <file>...");
        process::exit(2);
    }

    let mut failed = false;
    for path in paths {
        let requests = match fs::read_to_string(&path) {
            Ok(text) => parse(&text),
            Err(err) => {
                eprintln!("{path}: {err}");
                failed = true;
                continue;
            }
        };
        match replay(&requests) {
            Ok(report) => {
                let util = report.peak_payload as f64 / report.peak_heap.max(1) as f64;
                println!(
                    "{path}: {} ops, util = {:.1}%, {:.0} Kops/s, {} violation(s)",
                    report.requests,
                    util * 100.,
                    report.requests as f64 / report.secs / 1e3,
                    report.violations,
                );
                failed |= report.violations != 0;
            }
            Err(err) => {
                eprintln!("{path}: {err}");
                failed = true;
            }
        }
    }
    if failed {
        process::exit(1);
    }
}
