use clap::{Parser, ValueEnum};
use measure::{
    bank::{BankDatabase, LegacyDatabase},
    cache::{compact, legacy},
    dbopl_scheduler, Chip, MeasureError, MeasureSettings, Progress, Scheduler,
};
use ratatui::crossterm::{
    cursor::MoveToColumn,
    execute,
    style::Print,
    terminal::{Clear, ClearType},
};
use serde::Serialize;
use std::{
    fs,
    io::{self, IsTerminal, Write},
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::Duration,
};

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    /// Shared operator table with instruments referring to it
    Indexed,
    /// 11 byte patches referred to by index
    Legacy,
}

#[derive(Parser)]
struct Cli {
    /// Instrument database as JSON
    #[arg(short, long)]
    db: PathBuf,
    #[arg(short, long, value_enum, default_value_t = Format::Indexed)]
    format: Format,
    /// Duration cache file, read before and written after measuring
    #[arg(short, long)]
    cache: Option<PathBuf>,
    /// Where to write the measured database. Stdout if not given.
    #[arg(short, long)]
    out: Option<PathBuf>,
    /// Number of measurements running at once, twice the core count if not
    /// given
    #[arg(short, long)]
    jobs: Option<usize>,
    /// Don't fail when the emulator and the silence prediction disagree
    #[arg(long)]
    no_verify_silence: bool,
}

type DbScheduler = Scheduler<fn() -> Chip>;

pub fn main() -> Result<(), String> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = Cli::parse();

    let mut settings = MeasureSettings::default();
    if let Some(jobs) = args.jobs {
        settings.capacity = jobs;
    }
    settings.verify_silence = !args.no_verify_silence;

    let text = fs::read_to_string(&args.db).map_err(|e| e.to_string())?;
    match args.format {
        Format::Indexed => {
            let mut db: BankDatabase = serde_json::from_str(&text).map_err(|e| e.to_string())?;
            let mut scheduler = dbopl_scheduler(settings);
            if let Some(path) = &args.cache {
                scheduler = scheduler.with_compact_cache(compact::load(path));
            }
            run_with_progress(&scheduler, |s| s.measure_indexed(&mut db))?;
            if let Some(path) = &args.cache {
                compact::save(scheduler.compact_cache(), path).map_err(|e| e.to_string())?;
            }
            write_output(&db, args.out.as_deref())
        }
        Format::Legacy => {
            let mut db: LegacyDatabase = serde_json::from_str(&text).map_err(|e| e.to_string())?;
            let mut scheduler = dbopl_scheduler(settings);
            if let Some(path) = &args.cache {
                scheduler = scheduler.with_legacy_cache(legacy::load(path, &db));
            }
            run_with_progress(&scheduler, |s| s.measure_legacy(&mut db))?;
            if let Some(path) = &args.cache {
                legacy::save(scheduler.legacy_cache(), path, &db).map_err(|e| e.to_string())?;
            }
            write_output(&db, args.out.as_deref())
        }
    }
}

fn run_with_progress<F>(scheduler: &DbScheduler, run: F) -> Result<(), String>
where
    F: FnOnce(&DbScheduler) -> Result<(), MeasureError>,
{
    let finished = AtomicBool::new(false);
    let result = thread::scope(|s| {
        s.spawn(|| report_progress(scheduler.progress(), &finished));
        let result = run(scheduler);
        finished.store(true, Ordering::SeqCst);
        result
    });
    result.map_err(|e| e.to_string())
}

// Redraws the status line until the run is over
fn report_progress(progress: &Progress, finished: &AtomicBool) {
    let mut stderr = io::stderr();
    if !stderr.is_terminal() {
        return;
    }
    while !finished.load(Ordering::SeqCst) {
        let line = progress.snapshot().status_line();
        let _ = execute!(
            stderr,
            MoveToColumn(0),
            Clear(ClearType::CurrentLine),
            Print(line)
        );
        thread::sleep(Duration::from_millis(100));
    }
    let _ = execute!(stderr, MoveToColumn(0), Clear(ClearType::CurrentLine));
}

fn write_output<T: Serialize>(db: &T, out: Option<&Path>) -> Result<(), String> {
    let json = serde_json::to_string_pretty(db).map_err(|e| e.to_string())?;
    match out {
        Some(path) => fs::write(path, json).map_err(|e| e.to_string()),
        None => {
            let mut stdout = io::stdout();
            writeln!(stdout, "{}", json).map_err(|e| e.to_string())?;
            stdout.flush().map_err(|e| e.to_string())
        }
    }
}
