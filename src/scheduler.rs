//! Static partitioning of outputs between workers, and the worker threads
//! that write them.

use std::any::Any;
use std::collections::BTreeMap;
use std::ops::Range;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

use itertools::Itertools;
use log::{error, info};

use crate::config::{CostModel, PartitionMode};
use crate::error::{ConformError, Result};
use crate::flow::GraphBuilder;
use crate::index::{Index, Selector};
use crate::io::{DataStore, FileSpec};

/// Split items between `workers` by the longest-processing-time rule: the
/// most costly item goes to the least loaded worker, lowest rank first.
/// Items of equal cost are taken in name order.
pub fn partition(costs: &BTreeMap<String, u64>, workers: usize) -> Vec<Vec<String>> {
    let workers = workers.max(1);
    let mut loads = vec![0u64; workers];
    let mut parts = vec![Vec::new(); workers];
    let items = costs.iter().sorted_by(|a, b| b.1.cmp(a.1));
    for (name, &cost) in items {
        let rank = (0..workers).min_by_key(|&r| (loads[r], r)).unwrap_or(0);
        loads[rank] += cost;
        parts[rank].push(name.clone());
    }
    parts
}

/// Split `n` records into `workers` contiguous ranges whose lengths differ
/// by at most one.
pub fn partition_records(n: usize, workers: usize) -> Vec<Range<usize>> {
    let workers = workers.max(1);
    let (base, extra) = (n / workers, n % workers);
    let mut start = 0;
    (0..workers)
        .map(|rank| {
            let len = base + usize::from(rank < extra);
            let range = start..start + len;
            start += len;
            range
        })
        .collect()
}

/// The work rank 0 sends to each worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub rank: usize,
    pub outputs: Vec<String>,
    /// Part of each output to write; unrestricted dimensions are written
    /// whole.
    pub domain: Index,
}

/// Per-variable outcome of a run.
#[derive(Debug, Default)]
pub struct StandardizeReport {
    pub results: BTreeMap<String, Result<()>>,
}

impl StandardizeReport {
    pub fn is_success(&self) -> bool {
        self.results.values().all(|r| r.is_ok())
    }

    pub fn failures(&self) -> Vec<(&str, &ConformError)> {
        self.results
            .iter()
            .filter_map(|(name, r)| r.as_ref().err().map(|e| (name.as_str(), e)))
            .collect()
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    fn record(&mut self, name: String, result: Result<()>) {
        match self.results.get(&name) {
            Some(Err(_)) => {}
            _ => {
                self.results.insert(name, result);
            }
        }
    }
}

struct Plan {
    assignments: Vec<Assignment>,
    files: Vec<FileSpec>,
    failed: BTreeMap<String, ConformError>,
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "worker panicked".to_string())
}

/// Runs a standardization over a fixed number of worker threads.
pub struct Scheduler<'a> {
    builder: &'a GraphBuilder,
    store: Arc<dyn DataStore>,
    workers: usize,
    chunks: &'a BTreeMap<String, usize>,
    partition: &'a PartitionMode,
    cost: CostModel,
}

impl<'a> Scheduler<'a> {
    pub fn new(builder: &'a GraphBuilder, store: Arc<dyn DataStore>) -> Self {
        let options = builder.options();
        Self {
            builder,
            store,
            workers: options.workers.max(1),
            chunks: &options.chunks,
            partition: &options.partition,
            cost: options.cost,
        }
    }

    /// Build the whole graph once for metadata, then split the outputs that
    /// built between the workers.
    fn plan(&self) -> Plan {
        let flow = self.builder.build_all(self.store.clone());
        let mut failed = flow.build_errors().clone();
        let costs: BTreeMap<String, u64> = flow
            .outputs()
            .map(|name| {
                let cost = match (self.cost, flow.output_info(name)) {
                    (CostModel::Elements, Ok(info)) => info.shape.iter().product::<usize>().max(1) as u64,
                    _ => 1,
                };
                (name.to_string(), cost)
            })
            .collect();
        let assignments = match self.partition {
            PartitionMode::Variables => partition(&costs, self.workers)
                .into_iter()
                .enumerate()
                .map(|(rank, outputs)| Assignment {
                    rank,
                    outputs,
                    domain: Index::all(),
                })
                .collect_vec(),
            PartitionMode::Records { dimension } => {
                let lengths: BTreeMap<&str, Option<usize>> = costs
                    .keys()
                    .map(|name| {
                        let n = flow
                            .output_info(name)
                            .ok()
                            .and_then(|info| info.sizes().get(dimension).copied());
                        (name.as_str(), n)
                    })
                    .collect();
                let n = match self.builder.output().dimension(dimension) {
                    Some(d) if d.size > 0 => d.size,
                    _ => lengths.values().flatten().copied().max().unwrap_or(0),
                };
                info!("splitting {} record(s) of '{}'", n, dimension);
                let mut with = Vec::new();
                let mut without = Vec::new();
                for (&name, length) in &lengths {
                    match *length {
                        Some(m) if m != n => {
                            let err = ConformError::Dimensions(format!(
                                "'{}' has {} record(s) along '{}', other outputs have {}",
                                name, m, dimension, n
                            ));
                            error!("{}", err);
                            failed.insert(name.to_string(), err);
                        }
                        Some(_) => with.push(name.to_string()),
                        None => without.push(name.to_string()),
                    }
                }
                partition_records(n, self.workers)
                    .into_iter()
                    .enumerate()
                    .map(|(rank, range)| {
                        let mut outputs = with.clone();
                        if rank == 0 {
                            outputs.extend(without.iter().cloned());
                        }
                        Assignment {
                            rank,
                            outputs,
                            domain: Index::all().with(
                                dimension.clone(),
                                Selector::range(range.start as isize, range.end as isize),
                            ),
                        }
                    })
                    .collect_vec()
            }
        };
        for a in &assignments {
            info!("rank {} assigned {} output(s)", a.rank, a.outputs.len());
        }
        Plan {
            assignments,
            files: flow.file_specs(),
            failed,
        }
    }

    fn write(&self, assignment: &Assignment, created: &BTreeMap<String, ConformError>) -> BTreeMap<String, Result<()>> {
        let mut results = BTreeMap::new();
        let mut outputs = Vec::new();
        for name in &assignment.outputs {
            let failed = self
                .builder
                .output()
                .files_for(name)
                .into_iter()
                .find_map(|f| created.get(&f.name));
            match failed {
                Some(err) => {
                    results.insert(name.clone(), Err(err.clone()));
                }
                None => outputs.push(name.clone()),
            }
        }
        let flow = self.builder.build(self.store.clone(), &outputs);
        results.extend(flow.execute(&outputs, self.chunks, &assignment.domain));
        results
    }

    fn worker(
        &self,
        rank: usize,
        receiver: Receiver<Assignment>,
        senders: Option<Vec<Sender<Assignment>>>,
        barrier: &Barrier,
        created: &Mutex<BTreeMap<String, ConformError>>,
    ) -> BTreeMap<String, Result<()>> {
        let mut results = BTreeMap::new();
        let mut files = Vec::new();
        if let Some(senders) = senders {
            match catch_unwind(AssertUnwindSafe(|| self.plan())) {
                Ok(plan) => {
                    results.extend(plan.failed.into_iter().map(|(name, err)| (name, Err(err))));
                    for (assignment, sender) in plan.assignments.into_iter().zip(&senders) {
                        // a closed receiver means that worker has already gone
                        let _ = sender.send(assignment);
                    }
                    files = plan.files;
                }
                Err(payload) => {
                    let err = ConformError::Worker {
                        rank,
                        message: panic_message(payload),
                    };
                    error!("planning failed: {}", err);
                    for name in self.builder.output_names() {
                        results.insert(name, Err(err.clone()));
                    }
                }
            }
        }

        barrier.wait();
        if rank == 0 {
            let mut failures = BTreeMap::new();
            for spec in &files {
                info!("creating {}", spec.name);
                let outcome = catch_unwind(AssertUnwindSafe(|| self.store.create_file(spec)))
                    .unwrap_or_else(|payload| {
                        Err(ConformError::Worker {
                            rank,
                            message: panic_message(payload),
                        })
                    });
                if let Err(err) = outcome {
                    error!("cannot create {}: {}", spec.name, err);
                    failures.insert(spec.name.clone(), err);
                }
            }
            if let Ok(mut created) = created.lock() {
                *created = failures;
            }
        }
        barrier.wait();

        let Ok(assignment) = receiver.recv() else {
            return results;
        };
        let created = created.lock().map(|c| c.clone()).unwrap_or_default();
        info!("rank {} writing {} output(s)", rank, assignment.outputs.len());
        let written = catch_unwind(AssertUnwindSafe(|| self.write(&assignment, &created)));
        let mut written = written.unwrap_or_else(|payload| {
            let message = panic_message(payload);
            error!("rank {} panicked: {}", rank, message);
            assignment
                .outputs
                .iter()
                .map(|name| {
                    let err = ConformError::Worker {
                        rank,
                        message: message.clone(),
                    };
                    (name.clone(), Err(err))
                })
                .collect()
        });
        for name in &assignment.outputs {
            let result = written.remove(name).unwrap_or_else(|| {
                Err(ConformError::Worker {
                    rank,
                    message: format!("no result for '{}'", name),
                })
            });
            results.insert(name.clone(), result);
        }
        results
    }

    /// Run every worker to completion.
    pub fn run(&self) -> StandardizeReport {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..self.workers).map(|_| channel()).unzip();
        let barrier = Barrier::new(self.workers);
        let created = Mutex::new(BTreeMap::new());
        info!("starting {} worker(s)", self.workers);

        let mut senders = Some(senders);
        let outcomes = thread::scope(|s| {
            let handles = receivers
                .into_iter()
                .enumerate()
                .map(|(rank, receiver)| {
                    let senders = senders.take();
                    let barrier = &barrier;
                    let created = &created;
                    s.spawn(move || self.worker(rank, receiver, senders, barrier, created))
                })
                .collect_vec();
            handles
                .into_iter()
                .enumerate()
                .map(|(rank, h)| {
                    h.join().unwrap_or_else(|payload| {
                        let mut results = BTreeMap::new();
                        results.insert(
                            format!("<rank {}>", rank),
                            Err(ConformError::Worker {
                                rank,
                                message: panic_message(payload),
                            }),
                        );
                        results
                    })
                })
                .collect_vec()
        });

        let mut report = StandardizeReport::default();
        for results in outcomes {
            for (name, result) in results {
                report.record(name, result);
            }
        }
        info!(
            "{} output(s) written, {} failed",
            report.results.values().filter(|r| r.is_ok()).count(),
            report.failures().len()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn costs(items: &[(&str, u64)]) -> BTreeMap<String, u64> {
        items.iter().map(|(n, c)| (n.to_string(), *c)).collect()
    }

    #[test]
    fn unit_costs_balance() {
        let items: BTreeMap<String, u64> = (0..7).map(|i| (format!("v{}", i), 1)).collect();
        let parts = partition(&items, 3);
        let sizes = parts.iter().map(Vec::len).collect_vec();
        assert_eq!(sizes, vec![3, 2, 2]);
        assert_eq!(parts[0], vec!["v0", "v3", "v6"]);
        assert_eq!(parts.concat().len(), 7);
    }

    #[test]
    fn costly_item_alone() {
        let mut items = costs(&[("big", 10)]);
        for i in 0..9 {
            items.insert(format!("small{}", i), 1);
        }
        let parts = partition(&items, 2);
        assert_eq!(parts[0], vec!["big"]);
        assert_eq!(parts[1].len(), 9);
    }

    #[test]
    fn more_workers_than_items() {
        let parts = partition(&costs(&[("a", 1)]), 3);
        assert_eq!(parts, vec![vec!["a".to_string()], vec![], vec![]]);
        assert_eq!(partition(&costs(&[("a", 1)]), 0).len(), 1);
    }

    #[test]
    fn record_ranges() {
        assert_eq!(partition_records(10, 3), vec![0..4, 4..7, 7..10]);
        assert_eq!(partition_records(2, 3), vec![0..1, 1..2, 2..2]);
        assert_eq!(partition_records(0, 1), vec![0..0]);
    }

    #[test]
    fn report_exit_code() {
        let mut report = StandardizeReport::default();
        report.record("a".into(), Ok(()));
        assert!(report.is_success());
        assert_eq!(report.exit_code(), 0);
        report.record("b".into(), Err(ConformError::Units("m".into())));
        report.record("b".into(), Ok(()));
        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.failures().len(), 1);
    }
}
