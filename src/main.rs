//! CLI entry point for exceptional
//!
//! Provides command-line access to the shared record buffer:
//! - `emit`: create the shared buffer and write exception reports into it from many threads
//! - `tail`: attach to the shared buffer as the external reader and print what arrives
//!   (`--store` also appends each report to the report store)
//! - `reports`: list stored reports or show one by id
//! - `stress`: in-process producers, coordinator and reader, with ordering verification
//! - `config`: print the effective configuration
//!
//! # Usage
//!
//! ```bash
//! exceptional emit --count 1000 --threads 4
//! exceptional tail --follow --store
//! exceptional reports list
//! exceptional reports get 3
//! exceptional stress --threads 8 --records 100000 --capacity 4096
//! EXCEPTIONAL_BUFFER__CAPACITY=4096 exceptional config
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use exceptional::config::ExceptionalConfig;
use exceptional::report::{ExceptionLogger, ExceptionReport, PayloadCodec, StackFrame};
use exceptional::{
    logging, NoopSignal, Record, RecordBuffer, ReferenceReader, ReportStore, WriteCoordinator,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "exceptional")]
#[command(about = "Shared-memory exception record buffer", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = exceptional::config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the shared buffer and write exception reports into it
    Emit {
        /// Total number of reports
        #[arg(long, default_value = "100")]
        count: usize,

        /// Producer threads
        #[arg(long, default_value = "4")]
        threads: usize,
    },

    /// Print reports from the shared buffer
    Tail {
        /// Keep polling for new reports until interrupted
        #[arg(long)]
        follow: bool,

        /// Also append each decoded report to the report store
        #[arg(long)]
        store: bool,
    },

    /// Inspect reports collected by `tail --store`
    Reports {
        #[command(subcommand)]
        action: ReportsAction,
    },

    /// Run producers, coordinator and reader in-process and verify ordering
    Stress {
        /// Producer threads
        #[arg(long, default_value = "4")]
        threads: usize,

        /// Records per producer
        #[arg(long, default_value = "10000")]
        records: u32,

        /// Buffer payload capacity in bytes
        #[arg(long, default_value = "4096")]
        capacity: usize,
    },

    /// Print the effective configuration (file + environment) as TOML
    Config,
}

#[derive(Subcommand)]
enum ReportsAction {
    /// List stored reports, one JSON line each
    List,

    /// Show one stored report
    Get {
        /// Report id
        id: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ExceptionalConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    config.validate()?;
    logging::init(&config.logging)?;

    match cli.command {
        Commands::Emit { count, threads } => emit(&config, count, threads),
        Commands::Tail { follow, store } => tail(&config, follow, store),
        Commands::Reports { action } => reports(&config, action),
        Commands::Stress {
            threads,
            records,
            capacity,
        } => stress(&config, threads, records, capacity),
        Commands::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn emit(config: &ExceptionalConfig, count: usize, threads: usize) -> Result<()> {
    let threads = threads.max(1);
    let buffer = Arc::new(RecordBuffer::create_shared(
        &config.buffer.path,
        config.buffer.capacity,
    )?);
    println!(
        "Writing {count} reports to {} ({} bytes)",
        config.buffer.path.display(),
        buffer.capacity()
    );

    let coordinator = WriteCoordinator::spawn(buffer, NoopSignal, config.writer.clone())?;
    let logger = Arc::new(ExceptionLogger::new(
        coordinator,
        PayloadCodec::from_config(&config.payload),
    ));

    let started = Instant::now();
    let handles: Vec<_> = (0..threads)
        .map(|producer| {
            let logger = Arc::clone(&logger);
            let share = count / threads + usize::from(producer < count % threads);
            thread::spawn(move || -> exceptional::RingResult<()> {
                for seq in 0..share {
                    let report = ExceptionReport::new(format!("producer {producer} failure {seq}"))
                        .with_frame(StackFrame::new("exceptional::emit", "produce").at(file!(), line!()))
                        .with_cause(ExceptionReport::new("simulated root cause"));
                    logger.log(&report)?;
                }
                Ok(())
            })
        })
        .collect();

    for handle in handles {
        match handle.join() {
            Ok(result) => result?,
            Err(_) => bail!("producer thread panicked"),
        }
    }

    // A reader that is not running lets the buffer fill up; don't wait forever.
    if !logger.coordinator().wait_idle(Duration::from_secs(5)) {
        warn!(
            pending = logger.coordinator().pending_len(),
            "buffer full, is a reader attached?"
        );
    }
    let stats = logger.close()?;
    println!(
        "Done in {:?}: {} written, {} dropped, {} full retries",
        started.elapsed(),
        stats.written,
        stats.dropped,
        stats.full_retries
    );
    Ok(())
}

fn open_store(config: &ExceptionalConfig) -> Result<ReportStore> {
    ReportStore::open(&config.store.path)
        .with_context(|| format!("opening {}", config.store.path.display()))
}

fn tail(config: &ExceptionalConfig, follow: bool, store: bool) -> Result<()> {
    let mut reader = ReferenceReader::open(&config.buffer.path)
        .with_context(|| format!("opening {}", config.buffer.path.display()))?;
    let codec = PayloadCodec::from_config(&config.payload);
    let mut store = if store { Some(open_store(config)?) } else { None };

    loop {
        while let Some(payload) = reader.next_record() {
            let report = match codec.decode(&payload) {
                Ok(report) => report,
                Err(e) => {
                    warn!(error = %e, len = payload.len(), "undecodable record");
                    continue;
                }
            };
            println!("{}", serde_json::to_string(&report)?);
            if let Some(store) = store.as_mut() {
                store.insert(report)?;
            }
        }
        if !follow {
            break;
        }
        thread::sleep(config.writer.idle_wait());
    }

    info!(
        records = reader.records_read(),
        bytes = reader.bytes_read(),
        "tail finished"
    );
    Ok(())
}

fn reports(config: &ExceptionalConfig, action: ReportsAction) -> Result<()> {
    let store = open_store(config)?;
    match action {
        ReportsAction::List => {
            for stored in store.list() {
                println!("{}", serde_json::to_string(stored)?);
            }
            info!(reports = store.len(), path = %store.path().display(), "listed reports");
        }
        ReportsAction::Get { id } => {
            let Some(stored) = store.get(id) else {
                bail!("no report with id {id} in {}", store.path().display());
            };
            println!("{}", serde_json::to_string_pretty(stored)?);
        }
    }
    Ok(())
}

const STRESS_HEADER: usize = 6;
const STRESS_MAX_FILL: u32 = 64;

fn stress_payload(producer: u16, seq: u32) -> Vec<u8> {
    let fill = (seq % STRESS_MAX_FILL) as usize;
    let mut payload = Vec::with_capacity(STRESS_HEADER + fill);
    payload.extend_from_slice(&producer.to_be_bytes());
    payload.extend_from_slice(&seq.to_be_bytes());
    payload.extend((0..fill).map(|i| (producer as usize + seq as usize + i) as u8));
    payload
}

fn stress(config: &ExceptionalConfig, threads: usize, records: u32, capacity: usize) -> Result<()> {
    let threads = threads.clamp(1, usize::from(u16::MAX));
    let largest = STRESS_HEADER + STRESS_MAX_FILL as usize + 1;
    if capacity <= largest + 2 {
        bail!("capacity must exceed {} bytes for stress records", largest + 2);
    }

    let buffer = Arc::new(RecordBuffer::with_capacity(capacity)?);
    let coordinator = Arc::new(WriteCoordinator::spawn(
        Arc::clone(&buffer),
        NoopSignal,
        config.writer.clone(),
    )?);
    let total = threads as u64 * u64::from(records);
    println!("Stress: {threads} producers x {records} records through {capacity} bytes");

    let started = Instant::now();
    let consumer = {
        let buffer = Arc::clone(&buffer);
        thread::spawn(move || -> Result<u64> {
            let mut reader = ReferenceReader::new(buffer);
            let mut next_seq = vec![0u32; threads];
            let mut seen = 0u64;
            let mut idle_since = Instant::now();
            while seen < total {
                let Some(payload) = reader.next_record() else {
                    if idle_since.elapsed() > Duration::from_secs(10) {
                        bail!("stalled after {seen} of {total} records");
                    }
                    thread::yield_now();
                    continue;
                };
                idle_since = Instant::now();
                if payload.len() < STRESS_HEADER {
                    bail!("short record of {} bytes", payload.len());
                }
                let producer = u16::from_be_bytes([payload[0], payload[1]]);
                let seq = u32::from_be_bytes([payload[2], payload[3], payload[4], payload[5]]);
                let expected = next_seq
                    .get_mut(usize::from(producer))
                    .context("unknown producer id")?;
                if seq != *expected {
                    bail!("producer {producer}: expected seq {expected}, got {seq}");
                }
                if payload != stress_payload(producer, seq) {
                    bail!("producer {producer} seq {seq}: payload corrupted");
                }
                *expected += 1;
                seen += 1;
            }
            Ok(reader.bytes_read())
        })
    };

    let producers: Vec<_> = (0..threads)
        .map(|producer| {
            let coordinator = Arc::clone(&coordinator);
            thread::spawn(move || -> exceptional::RingResult<()> {
                for seq in 0..records {
                    coordinator.submit(Record::new(stress_payload(producer as u16, seq))?);
                }
                Ok(())
            })
        })
        .collect();
    for producer in producers {
        match producer.join() {
            Ok(result) => result?,
            Err(_) => bail!("producer thread panicked"),
        }
    }

    let bytes = match consumer.join() {
        Ok(result) => result?,
        Err(_) => bail!("consumer thread panicked"),
    };
    let elapsed = started.elapsed();
    let stats = coordinator.close()?;

    let secs = elapsed.as_secs_f64().max(f64::EPSILON);
    println!(
        "Verified {total} records ({bytes} payload bytes) in {elapsed:?}: {:.0} records/s, {} full retries",
        total as f64 / secs,
        stats.full_retries
    );
    Ok(())
}
