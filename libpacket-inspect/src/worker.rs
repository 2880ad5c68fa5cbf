//! Multi-worker frame processing
//!
//! Each worker owns a job queue and runs the inspection stage on whole frames,
//! with a private trace buffer. Completed frames come back on a shared result
//! queue, tagged with the sequence number they were submitted with.

use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::error::Error;
use crate::node::{process_frame, NextHop, NextStage, NodeRuntime, PacketBuffer};
use crate::trace::TraceEntry;

pub struct FrameJob<B> {
    pub sequence: u64,
    pub packets: Vec<B>,
}

/// A processed frame, with one decision per packet and the traces it produced
pub struct FrameResult<B> {
    pub sequence: u64,
    pub worker: usize,
    pub packets: Vec<B>,
    pub nexts: Vec<NextHop>,
    pub traces: Vec<TraceEntry>,
}

enum Job<B> {
    Exit,
    Frame(FrameJob<B>),
}

pub(crate) struct Worker {
    pub(crate) _id: usize,
    pub(crate) handler: thread::JoinHandle<()>,
}

/// Records the decisions of a frame, leaving packets with the caller
#[derive(Default)]
struct DecisionCollector {
    nexts: Vec<NextHop>,
}

impl<B> NextStage<B> for DecisionCollector {
    fn enqueue(&mut self, _frame: &[B], nexts: &[NextHop]) {
        self.nexts.extend_from_slice(nexts);
    }
}

pub struct WorkerPool<B> {
    local_jobs: Vec<Sender<Job<B>>>,
    workers: Vec<Worker>,
    results: Receiver<FrameResult<B>>,
    next_worker: usize,
}

impl<B: PacketBuffer + Send + 'static> WorkerPool<B> {
    /// Spawn `n_workers` threads (at least one)
    pub fn new(n_workers: usize, runtime: NodeRuntime) -> Result<Self, Error> {
        let n_workers = n_workers.max(1);
        let (result_sender, results) = unbounded();
        let mut local_jobs = Vec::with_capacity(n_workers);
        let mut workers = Vec::with_capacity(n_workers);
        for i in 0..n_workers {
            let (sender, receiver) = unbounded::<Job<B>>();
            let result_sender: Sender<FrameResult<B>> = result_sender.clone();
            let handler = thread::Builder::new()
                .name(format!("worker {}", i))
                .spawn(move || {
                    debug!("worker thread {} starting", i);
                    while let Ok(job) = receiver.recv() {
                        match job {
                            Job::Exit => break,
                            Job::Frame(job) => {
                                trace!("thread {}: got frame {}", i, job.sequence);
                                let mut traces = Vec::new();
                                let mut collector = DecisionCollector::default();
                                process_frame(&runtime, &job.packets, &mut traces, &mut collector);
                                let result = FrameResult {
                                    sequence: job.sequence,
                                    worker: i,
                                    packets: job.packets,
                                    nexts: collector.nexts,
                                    traces,
                                };
                                if result_sender.send(result).is_err() {
                                    warn!("thread {}: result queue closed", i);
                                    break;
                                }
                            }
                        }
                    }
                    debug!("worker thread {} exiting", i);
                })?;
            local_jobs.push(sender);
            workers.push(Worker { _id: i, handler });
        }
        Ok(WorkerPool {
            local_jobs,
            workers,
            results,
            next_worker: 0,
        })
    }

    pub fn n_workers(&self) -> usize {
        self.local_jobs.len()
    }

    /// Queue a frame on the next worker, round-robin
    pub fn submit(&mut self, job: FrameJob<B>) -> Result<(), Error> {
        let i = self.next_worker;
        self.next_worker = (i + 1) % self.local_jobs.len();
        self.local_jobs[i]
            .send(Job::Frame(job))
            .map_err(|_| Error::Config(format!("worker {} is not running", i)))
    }

    /// Completed frames, in completion order
    pub fn results(&self) -> &Receiver<FrameResult<B>> {
        &self.results
    }

    /// Stop all workers once their queues are drained, and wait for them
    pub fn shutdown(mut self) {
        for job in self.local_jobs.iter() {
            let _ = job.send(Job::Exit);
        }
        while let Some(w) = self.workers.pop() {
            if w.handler.join().is_err() {
                warn!("a worker thread panicked");
            }
        }
        debug!("main: all workers ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;
    use pnet_packet::ip::IpNextHeaderProtocols;

    struct Buf(Vec<u8>);

    impl PacketBuffer for Buf {
        fn current(&self) -> &[u8] {
            &self.0
        }
        fn sw_if_index(&self) -> u32 {
            0
        }
        fn is_traced(&self) -> bool {
            true
        }
    }

    #[test]
    fn frames_come_back_complete() {
        let runtime = NodeRuntime {
            trace_enabled: true,
        };
        let mut pool = WorkerPool::new(3, runtime).expect("pool");
        assert_eq!(pool.n_workers(), 3);
        for sequence in 0..10u64 {
            let packets = (0..=sequence as u16)
                .map(|port| {
                    let segment = tcp_segment(port, 502, 0, &[], &[0x04]);
                    Buf(ipv4_packet(IpNextHeaderProtocols::Tcp, 5, &segment))
                })
                .collect();
            pool.submit(FrameJob { sequence, packets }).expect("submit");
        }
        let mut seen = Vec::new();
        for _ in 0..10 {
            let result = pool.results().recv().expect("result");
            assert_eq!(result.packets.len(), result.sequence as usize + 1);
            assert_eq!(result.nexts.len(), result.packets.len());
            assert!(result.nexts.iter().all(|n| *n == NextHop::Forward));
            assert_eq!(result.traces.len(), result.packets.len());
            for (port, entry) in result.traces.iter().enumerate() {
                assert_eq!(entry.source_port, port as u16);
                assert_eq!(entry.function_code, Some(4));
            }
            assert!(result.worker < 3);
            seen.push(result.sequence);
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
        pool.shutdown();
    }
}
