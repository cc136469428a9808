use std::{
    backtrace::Backtrace,
    panic,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use clap::Parser;
use log::{error, info, warn, LevelFilter};
use strobe_capture::{load_mission, CaptureError, CaptureResult, RawFileSink, SinkStats};
use strobe_fleet::{FleetCoordinator, FleetEvent, FleetParams, NullSink, SampleSink};
use strobe_hal::{MockRadio, RadioDriver};
use strobe_types::{Direction, MissionConfig};

#[derive(Parser, Debug)]
#[command(
    name = "strobe-capture",
    version = env!("CARGO_PKG_VERSION"),
    about = "Synchronized IQ capture from a fleet of bladeRF devices",
    long_about = None,
)]
struct Cli {
    /// Файл настроек миссии
    #[arg(short, long, default_value = "settings.json")]
    config: PathBuf,
    /// Драйвер устройств: sim, bladerf
    #[arg(short, long, default_value = "sim")]
    driver: String,
    /// Каталог выходных файлов
    #[arg(short, long, default_value = ".")]
    output: PathBuf,
    /// Каталог образов FPGA
    #[arg(long, default_value = "bladeRF/fpga")]
    fpga_dir: PathBuf,
    /// Ёмкость очереди писателя (блоков)
    #[arg(long, default_value = "256")]
    writer_capacity: usize,
    /// Тихий режим (только ошибки)
    #[arg(short, long)]
    quiet: bool,
}

/// Создаёт драйвер по имени. Реальное железо требует прав
/// суперпользователя независимо от того, вкомпилирована ли привязка.
fn create_driver(name: &str, config: &MissionConfig) -> CaptureResult<Arc<dyn RadioDriver>> {
    match name {
        "sim" => {
            let radio = MockRadio::new(config.devices.max(1));
            // Темп имитатора повторяет реальный поток: одна транзакция
            // за время блока выборок.
            if config.samplerate != 0 {
                radio.set_transfer_interval(Duration::from_secs_f64(
                    config.samples_count as f64 / config.samplerate as f64,
                ));
            }
            Ok(Arc::new(radio))
        }
        "bladerf" => {
            if unsafe { libc::geteuid() } != 0 {
                return Err(CaptureError::Privilege);
            }
            bladerf_driver()
        }
        other => Err(CaptureError::Config(format!(
            "unknown driver '{other}'. Use: sim, bladerf"
        ))),
    }
}

#[cfg(feature = "libbladerf")]
fn bladerf_driver() -> CaptureResult<Arc<dyn RadioDriver>> {
    Ok(Arc::new(strobe_hal::LibbladerfDriver::default()))
}

#[cfg(not(feature = "libbladerf"))]
fn bladerf_driver() -> CaptureResult<Arc<dyn RadioDriver>> {
    Err(CaptureError::Config(
        "compiled without libbladeRF support. Rebuild with feature `libbladerf`".to_string(),
    ))
}

fn main() {
    let cli = Cli::parse();
    let level = if cli.quiet {
        LevelFilter::Error
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::new()
        .filter_level(level)
        .format_target(false)
        .format_timestamp_secs()
        .init();

    // Аварийное завершение оставляет в журнале след стека.
    panic::set_hook(Box::new(|info| {
        let trace = Backtrace::force_capture();
        error!("Unhandled panic: {info}\n{trace}");
    }));

    if let Err(e) = run(cli) {
        error!("{e}");
        std::process::exit(e.exit_code());
    }
}

fn run(cli: Cli) -> CaptureResult<()> {
    let config = load_mission(&cli.config)?;
    let driver = create_driver(&cli.driver, &config)?;

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  Driver        : {}", cli.driver);
    info!("  Direction     : {}", config.direction);
    info!("  Frequency     : {:.3} MHz", config.frequency as f64 / 1e6);
    info!("  Sample rate   : {:.3} Msps", config.samplerate as f64 / 1e6);
    info!("  Bandwidth     : {:.3} MHz", config.bandwidth as f64 / 1e6);
    info!("  Block         : {} samples", config.samples_count);
    info!("  Gain          : {} dB", config.gain);
    info!("  Devices       : {}", if config.devices == 0 {
        "all found".to_string()
    } else {
        config.devices.to_string()
    });
    info!("  Output        : {:?}", cli.output);
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // Сток по направлению миссии: приём пишет каналы в файлы, передача
    // блоков не рождает.
    let (sink, sink_stats): (Box<dyn SampleSink>, Option<Arc<SinkStats>>) = match config.direction
    {
        Direction::Rx => {
            let sink = RawFileSink::new(&cli.output, cli.writer_capacity)?;
            let stats = sink.stats();
            (Box::new(sink), Some(stats))
        }
        Direction::Tx => (Box::new(NullSink), None),
    };

    let params = FleetParams {
        open_attempts: config.open_attempts(),
        fpga_dir: cli.fpga_dir.clone(),
        ..FleetParams::default()
    };

    let mut coordinator = FleetCoordinator::new(driver, config, params, sink);
    coordinator.discover()?;

    let control = coordinator.control();
    let events = coordinator.events();
    let metrics = coordinator.metrics();

    // Первый Ctrl+C — упорядоченная остановка, второй — принудительный
    // выход.
    let stop_requested = Arc::new(AtomicBool::new(false));
    let stop_flag = stop_requested.clone();
    let stop_control = control.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        if stop_flag.swap(true, Ordering::SeqCst) {
            warn!("Force exit");
            std::process::exit(130);
        }
        warn!("Ctrl+C received — stopping fleet...");
        stop_control.stop();
    }) {
        warn!("Failed to set Ctrl+C handler: {e}");
    }

    // Наблюдатель событий: ошибка любого устройства гасит весь флот.
    let watcher_control = control.clone();
    let watcher = thread::spawn(move || {
        for event in events.iter() {
            match event {
                FleetEvent::DeviceError { role, message } => {
                    error!("Device {role} failed: {message}");
                    watcher_control.stop();
                }
                FleetEvent::UnknownDevice { serial } => {
                    warn!("Device {serial} is not part of the fleet, skipping");
                }
                FleetEvent::FleetStarted => info!("Fleet capture running. Ctrl+C to stop"),
                FleetEvent::FleetStopped => info!("Fleet capture stopped"),
                _ => {}
            }
        }
    });

    let session_start = Instant::now();
    let result = coordinator.run();
    let _ = watcher.join();

    let summary = metrics.summary(&session_start);
    info!("\n{summary}");

    if let Some(stats) = sink_stats {
        let dropped = stats.blocks_dropped.load(Ordering::Relaxed);
        if dropped > 0 {
            warn!("⚠ {dropped} blocks dropped by writer queue. Consider faster storage or larger --writer-capacity");
        }
        let write_errors = stats.write_errors.load(Ordering::Relaxed);
        if write_errors > 0 {
            warn!("⚠ {write_errors} write errors occurred. Check disk space and I/O.");
        }
        info!(
            "✓ Capture complete: {} blocks, {:.1} MB written to {:?}",
            stats.blocks_written.load(Ordering::Relaxed),
            stats.bytes_written.load(Ordering::Relaxed) as f64 / 1_048_576.0,
            cli.output
        );
    }

    result.map_err(CaptureError::Fleet)
}
