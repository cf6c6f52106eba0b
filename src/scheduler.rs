//! Measures every instrument of a database on a bounded pool of workers.
//!
//! Each instrument becomes one task. A task first consults the duration
//! cache and only runs the analyzer, on a chip of its own, when the cache
//! has no entry for its key. Either way the durations end up in the
//! instrument record the task owns.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use log::{debug, info};

use crate::analyzer::{self, EnvelopeResult};
use crate::bank::{BankDatabase, DurationSink, LegacyDatabase, LegacyPatch, OperatorEntry};
use crate::cache::{CompactKey, DurationCache, Durations, LegacyKey};
use crate::chip::OplChip;
use crate::error::MeasureError;
use crate::instrument::InstrumentDefinition;
use crate::pool::WorkerPool;
use crate::MeasureSettings;

/// Cache key of one measurement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Task {
    Legacy(LegacyKey),
    Indexed(CompactKey),
}

const SPINNER: [char; 4] = ['-', '\\', '|', '/'];

#[derive(Debug, Default)]
pub struct Progress {
    total: AtomicUsize,
    done: AtomicUsize,
    cache_hits: AtomicUsize,
    running: AtomicUsize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub done: usize,
    pub cache_hits: usize,
    pub running: usize,
}

impl Progress {
    fn start(&self, total: usize) {
        self.total.store(total, Ordering::SeqCst);
        self.done.store(0, Ordering::SeqCst);
        self.cache_hits.store(0, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.total.load(Ordering::SeqCst),
            done: self.done.load(Ordering::SeqCst),
            cache_hits: self.cache_hits.load(Ordering::SeqCst),
            running: self.running.load(Ordering::SeqCst),
        }
    }
}

impl ProgressSnapshot {
    pub fn percent(&self) -> usize {
        if self.total == 0 {
            100
        } else {
            self.done * 100 / self.total
        }
    }

    pub fn is_complete(&self) -> bool {
        self.done >= self.total
    }

    pub fn status_line(&self) -> String {
        format!(
            "Calculating measures... [{} {:3}% {{{:4}/{:4}}} Threads {:3}, Matches {}]",
            SPINNER[self.done % SPINNER.len()],
            self.percent(),
            self.done,
            self.total,
            self.running,
            self.cache_hits
        )
    }

    pub fn final_line(&self) -> String {
        format!(
            "Calculating measures completed! [Total entries {:4} with {} cache matches]",
            self.total, self.cache_hits
        )
    }
}

/// Counts a task as running until dropped, then as done.
struct TaskGuard<'a>(&'a Progress);

impl<'a> TaskGuard<'a> {
    fn new(progress: &'a Progress) -> TaskGuard<'a> {
        progress.running.fetch_add(1, Ordering::SeqCst);
        TaskGuard(progress)
    }
}

impl Drop for TaskGuard<'_> {
    fn drop(&mut self) {
        self.0.running.fetch_sub(1, Ordering::SeqCst);
        self.0.done.fetch_add(1, Ordering::SeqCst);
    }
}

struct Job<'a, S> {
    id: usize,
    task: Task,
    def: InstrumentDefinition,
    record: &'a mut S,
}

pub struct Scheduler<F> {
    settings: MeasureSettings,
    new_chip: F,
    progress: Progress,
    compact: DurationCache<CompactKey>,
    legacy: DurationCache<LegacyKey>,
}

impl<F, C> Scheduler<F>
where
    F: Fn() -> C + Sync,
    C: OplChip,
{
    /// `new_chip` builds a fresh chip for every measurement that misses the
    /// cache.
    pub fn new(settings: MeasureSettings, new_chip: F) -> Scheduler<F> {
        Scheduler {
            settings,
            new_chip,
            progress: Progress::default(),
            compact: DurationCache::new(),
            legacy: DurationCache::new(),
        }
    }

    pub fn with_compact_cache(mut self, cache: DurationCache<CompactKey>) -> Scheduler<F> {
        self.compact = cache;
        self
    }

    pub fn with_legacy_cache(mut self, cache: DurationCache<LegacyKey>) -> Scheduler<F> {
        self.legacy = cache;
        self
    }

    pub fn compact_cache(&self) -> &DurationCache<CompactKey> {
        &self.compact
    }

    pub fn legacy_cache(&self) -> &DurationCache<LegacyKey> {
        &self.legacy
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    /// Fills in `delay_on_ms`, `delay_off_ms` and the blank flag of every
    /// instrument.
    pub fn measure_indexed(&self, db: &mut BankDatabase) -> Result<(), MeasureError> {
        let BankDatabase {
            operators,
            instruments,
        } = db;
        let operators: &[OperatorEntry] = operators;
        self.progress.start(instruments.len());
        let jobs = instruments.iter_mut().enumerate().map(|(id, entry)| {
            let def = entry.definition(id, operators)?;
            Ok::<_, MeasureError>(Job {
                id,
                task: Task::Indexed(CompactKey::from(&*entry)),
                def,
                record: entry,
            })
        });
        self.run_jobs(jobs)
    }

    /// Fills in `ms_sound_kon`, `ms_sound_koff` and `nosound` of every
    /// instrument.
    pub fn measure_legacy(&self, db: &mut LegacyDatabase) -> Result<(), MeasureError> {
        let LegacyDatabase {
            patches,
            instruments,
        } = db;
        let patches: &[LegacyPatch] = patches;
        self.progress.start(instruments.len());
        let jobs = instruments.iter_mut().enumerate().map(|(id, ins)| {
            let def = ins.definition(id, patches)?;
            Ok::<_, MeasureError>(Job {
                id,
                task: Task::Legacy(ins.key(id, patches)?),
                def,
                record: ins,
            })
        });
        self.run_jobs(jobs)
    }

    fn run_jobs<'a, S, I>(&'a self, jobs: I) -> Result<(), MeasureError>
    where
        S: DurationSink + Send + 'a,
        I: Iterator<Item = Result<Job<'a, S>, MeasureError>>,
    {
        let result = thread::scope(|s| {
            let mut pool = WorkerPool::new(s, self.settings.capacity);
            let mut submitted = Ok(());
            for job in jobs {
                let started = job.and_then(|job| pool.submit(move || self.run(job)));
                if let Err(err) = started {
                    submitted = Err(err);
                    break;
                }
            }
            let joined = pool.wait_all();
            submitted.and(joined)
        });
        info!("{}", self.progress.snapshot().final_line());
        result
    }

    fn run<S: DurationSink>(&self, mut job: Job<'_, S>) -> Result<(), MeasureError> {
        let _guard = TaskGuard::new(&self.progress);
        let cached = match &job.task {
            Task::Legacy(key) => self.legacy.lookup(key),
            Task::Indexed(key) => self.compact.lookup(key),
        };
        let durations = match cached {
            Some(durations) => {
                self.progress.cache_hits.fetch_add(1, Ordering::SeqCst);
                durations
            }
            None => self.compute(&job)?,
        };
        job.record.apply(&durations);
        Ok(())
    }

    fn compute<S>(&self, job: &Job<'_, S>) -> Result<Durations, MeasureError> {
        let mut chip = (self.new_chip)();
        let result = analyzer::measure(&mut chip, &job.def);
        if self.settings.verify_silence {
            check_silence(job.id, &job.def, &result)?;
        }
        debug!(
            "{:04} - {} measured: on {} ms, off {} ms",
            job.id,
            job.def.mode_name(),
            result.ms_sound_kon,
            result.ms_sound_koff
        );
        let durations = result.durations();
        match job.task {
            Task::Legacy(key) => self.legacy.insert(key, durations),
            Task::Indexed(key) => self.compact.insert(key, durations),
        }
        Ok(durations)
    }
}

fn sound_word(silent: bool) -> &'static str {
    if silent { "silence" } else { "sound" }
}

/// Cross-checks the emulator against the register based prediction.
fn check_silence(
    id: usize,
    def: &InstrumentDefinition,
    result: &EnvelopeResult,
) -> Result<(), MeasureError> {
    let predicted = def.predicts_silence();
    if predicted == result.nosound {
        return Ok(());
    }
    Err(MeasureError::SilenceMismatch {
        instrument: id,
        mode: def.mode_name(),
        active: def.active_voices(),
        voices: def.voice_count,
        con1: def.voices[0].fb_conn & 0x01,
        con2: def.voices[1].fb_conn & 0x01,
        predicted: sound_word(predicted),
        measured: sound_word(result.nosound),
        peak: result.peak_amplitude_value,
        min: result.sound_min,
        max: result.sound_max,
    })
}

#[cfg(test)]
#[path = "./scheduler_test.rs"]
mod scheduler_test;
