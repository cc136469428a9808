use std::fs;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{select, Receiver, Sender};
use log::{debug, error, info, warn};
use strobe_hal::{ChannelLayout, ClockSelect, DeviceHandle, RadioDriver};
use strobe_types::{
    ClockRole, DeviceDescriptor, DeviceRole, Direction, HwResult, HwStatus, MissionConfig,
    RfModule, SampleBlock, StrobeError, StrobeResult, TriggerRole,
};

use crate::hw;
use crate::metrics::CaptureMetrics;
use crate::params::FleetParams;
use crate::stream::{StreamEngine, StreamEvent};

/// Команды сессии устройства.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    /// Открыть устройство и при необходимости загрузить FPGA
    Open,
    /// Применить роль в цепочке опорной частоты
    ApplyClock(ClockRole),
    /// Настроить тракты и запустить поток обмена
    Start(MissionConfig),
    /// Остановить захват
    Stop,
    /// Выстрелить аппаратным триггером
    FireTrigger,
    /// Закрыть устройство
    Close,
    /// Завершить поток сессии
    Shutdown,
}

/// События сессии, адресованные координатору.
#[derive(Debug)]
pub enum SessionEvent {
    Opened(DeviceRole),
    Closed(DeviceRole),
    Started(DeviceRole),
    Stopped(DeviceRole),
    ClockApplied(DeviceRole),
    TriggerFired(DeviceRole),
    Block(DeviceRole, SampleBlock),
    Error(DeviceRole, StrobeError),
}

/// Ручка сессии: почтовый ящик команд и join рабочего потока.
pub struct SessionHandle {
    commands: Sender<SessionCommand>,
    worker: Option<thread::JoinHandle<()>>,
}

impl SessionHandle {
    /// Ставит команду в очередь сессии.
    pub fn send(&self, command: SessionCommand) {
        let _ = self.commands.send(command);
    }

    /// Просит сессию завершиться и дожидается выхода её потока.
    pub fn shutdown(&mut self) {
        let _ = self.commands.send(SessionCommand::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Сессия одного устройства: открытие, конфигурация, тактовая роль,
/// запуск и остановка потоков обмена.
///
/// Живёт на выделенном потоке и обслуживает два источника событий:
/// команды координатора и события собственных потоков обмена. Любая
/// ошибка устройства сперва останавливает активный захват и только
/// потом уходит наружу.
pub struct DeviceSession {
    role: DeviceRole,
    descriptor: DeviceDescriptor,
    driver: Arc<dyn RadioDriver>,
    params: FleetParams,
    events: Sender<SessionEvent>,
    metrics: Arc<CaptureMetrics>,
    commands: Receiver<SessionCommand>,
    stream_events: Receiver<StreamEvent>,
    stream_sender: Sender<StreamEvent>,
    handle: Option<DeviceHandle>,
    rx_stream: Option<StreamEngine>,
    tx_stream: Option<StreamEngine>,
    capturing: bool,
    /// Публикация событий подавлена (тихое переоткрытие)
    suppressed: bool,
}

impl DeviceSession {
    /// Запускает сессию устройства на выделенном потоке.
    pub fn spawn(
        role: DeviceRole,
        descriptor: DeviceDescriptor,
        driver: Arc<dyn RadioDriver>,
        params: FleetParams,
        events: Sender<SessionEvent>,
        metrics: Arc<CaptureMetrics>,
    ) -> StrobeResult<SessionHandle> {
        let (command_sender, command_receiver) = crossbeam_channel::unbounded();
        let (stream_sender, stream_events) = crossbeam_channel::bounded(params.stream_capacity);
        let name = format!("sdr-{}", descriptor.serial);

        let worker = thread::Builder::new()
            .name(name)
            .spawn(move || {
                let mut session = DeviceSession {
                    role,
                    descriptor,
                    driver,
                    params,
                    events,
                    metrics,
                    commands: command_receiver,
                    stream_events,
                    stream_sender,
                    handle: None,
                    rx_stream: None,
                    tx_stream: None,
                    capturing: false,
                    suppressed: false,
                };
                session.run();
            })
            .map_err(StrobeError::Io)?;

        Ok(SessionHandle {
            commands: command_sender,
            worker: Some(worker),
        })
    }

    fn run(&mut self) {
        let commands = self.commands.clone();
        let stream_events = self.stream_events.clone();

        loop {
            select! {
                recv(commands) -> command => match command {
                    Ok(command) => {
                        if !self.handle_command(command) {
                            break;
                        }
                    }
                    Err(_) => break,
                },
                recv(stream_events) -> event => {
                    if let Ok(event) = event {
                        self.on_stream_event(event);
                    }
                }
            }
        }
    }

    fn handle_command(&mut self, command: SessionCommand) -> bool {
        match command {
            SessionCommand::Open => {
                if let Err(error) = self.device_open() {
                    self.report_error(error);
                }
            }
            SessionCommand::ApplyClock(role) => self.apply_clock(role),
            SessionCommand::Start(config) => self.session_start(config),
            SessionCommand::Stop => self.session_stop(),
            SessionCommand::FireTrigger => self.trigger_fire(),
            SessionCommand::Close => self.device_close(),
            SessionCommand::Shutdown => {
                if self.capturing {
                    self.session_stop();
                }
                if self.handle.is_some() {
                    self.device_close();
                }
                return false;
            }
        }
        true
    }

    fn on_stream_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Block(block) => {
                // Хвост остановленной сессии: блоки, успевшие встать в
                // очередь до join рабочего потока, отбрасываются.
                if !self.capturing {
                    return;
                }
                self.emit(SessionEvent::Block(self.role, block));
            }
            StreamEvent::Error(error) => self.report_error(error),
        }
    }

    ////////////////////////////////////////////////////////////////////////////////
    // Устройство
    ////////////////////////////////////////////////////////////////////////////////

    /// Открывает устройство с бюджетом повторов и гарантирует, что FPGA
    /// сконфигурирована.
    fn device_open(&mut self) -> StrobeResult<()> {
        let attempts = self.params.open_attempts.max(1);
        let mut opened = None;
        let mut last = HwStatus::NODEV;

        for attempt in 1..=attempts {
            match self.driver.open(&self.descriptor) {
                Ok(handle) => {
                    opened = Some(handle);
                    break;
                }
                Err(status) => {
                    warn!(
                        "Failed to open device {} (attempt {attempt}/{attempts}): {status}",
                        self.descriptor.serial
                    );
                    last = status;
                }
            }
        }

        let handle = opened.ok_or_else(|| StrobeError::DeviceOpen {
            serial: self.descriptor.serial.clone(),
            status: last,
        })?;
        self.handle = Some(handle);

        if let Err(error) = self.ensure_fpga(handle) {
            self.device_close();
            return Err(error);
        }

        thread::sleep(self.params.open_settle);

        info!(
            "Device opened: serial {}, product {}",
            self.descriptor.serial, self.descriptor.product
        );
        self.emit(SessionEvent::Opened(self.role));
        Ok(())
    }

    /// Проверяет прошивку FPGA; если плата пустая, ищет в каталоге образ
    /// с размером, который ожидает драйвер, и загружает его.
    fn ensure_fpga(&self, handle: DeviceHandle) -> StrobeResult<()> {
        if hw("fpga_configured", self.driver.fpga_configured(handle))? {
            debug!("FPGA loaded");
            return Ok(());
        }

        let expected = hw("fpga_expected_bytes", self.driver.fpga_expected_bytes(handle))?;
        let dir = &self.params.fpga_dir;
        let entries = fs::read_dir(dir)
            .map_err(|error| StrobeError::FpgaLoad(format!("{}: {error}", dir.display())))?;

        let mut candidates: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        candidates.sort();

        let image = candidates
            .into_iter()
            .find(|path| {
                fs::metadata(path)
                    .map(|meta| meta.len() == expected)
                    .unwrap_or(false)
            })
            .ok_or_else(|| {
                StrobeError::FpgaLoad(format!(
                    "no image of {expected} bytes in {}",
                    dir.display()
                ))
            })?;

        self.driver
            .fpga_load(handle, &image)
            .map_err(|status| StrobeError::FpgaLoad(format!("{}: {status}", image.display())))?;
        info!("{} fpga loaded", image.display());

        if hw("fpga_configured", self.driver.fpga_configured(handle))? {
            Ok(())
        } else {
            Err(StrobeError::FpgaLoad("FPGA not loaded".to_string()))
        }
    }

    /// Закрывает устройство, предварительно остановив активный захват.
    fn device_close(&mut self) {
        if self.capturing {
            self.session_stop();
        }
        if let Some(handle) = self.handle.take() {
            self.driver.close(handle);
            debug!("Device {} closed", self.descriptor.serial);
        }
        self.emit(SessionEvent::Closed(self.role));
    }

    fn device_handle(&self) -> StrobeResult<DeviceHandle> {
        self.handle.ok_or_else(|| StrobeError::DeviceOpen {
            serial: self.descriptor.serial.clone(),
            status: HwStatus::NOT_INIT,
        })
    }

    ////////////////////////////////////////////////////////////////////////////////
    // Тактовая цепочка
    ////////////////////////////////////////////////////////////////////////////////

    /// Применяет роль в цепочке опорной частоты и отчитывается о
    /// готовности.
    fn apply_clock(&mut self, role: ClockRole) {
        let result = match role {
            ClockRole::Onboard => self.clock_onboard(),
            ClockRole::BroadcastMaster => self.clock_broadcast(),
            ClockRole::ListenRebroadcast { downstream } => self.clock_listen().and_then(|()| {
                if downstream {
                    self.clock_broadcast()
                } else {
                    Ok(())
                }
            }),
        };

        match result {
            Ok(()) => self.emit(SessionEvent::ClockApplied(self.role)),
            Err(error) => self.report_error(error),
        }
    }

    /// Бортовой опорный генератор плюс PLL, захваченный на 10 МГц.
    fn clock_onboard(&mut self) -> StrobeResult<()> {
        let handle = self.device_handle()?;
        hw(
            "set_clock_select",
            self.driver.set_clock_select(handle, ClockSelect::Onboard),
        )?;
        hw("set_pll_enable", self.driver.set_pll_enable(handle, true))?;
        hw("set_pll_refclk", self.driver.set_pll_refclk(handle, 10_000_000))?;
        info!("Onboard clock selected");
        Ok(())
    }

    /// Включает раздачу опорной частоты на CLK OUT. Иногда запись в gpio
    /// сбоит без видимой причины, поэтому попытки не ограничены.
    fn clock_broadcast(&mut self) -> StrobeResult<()> {
        loop {
            let handle = self.device_handle()?;
            match self.driver.set_clock_output(handle, true) {
                Ok(()) => break,
                Err(status) => {
                    warn!("Failed to set external clock output: {status}. Trying again...");
                    thread::sleep(self.params.clock_retry);
                }
            }
        }
        info!("Clock broadcast");
        Ok(())
    }

    /// Переключает вход на внешнюю опорную частоту. После каждого сбоя
    /// устройство тихо переоткрывается: без этого повторная попытка
    /// упирается в тот же отказ.
    fn clock_listen(&mut self) -> StrobeResult<()> {
        loop {
            let handle = self.device_handle()?;
            match self.driver.set_clock_select(handle, ClockSelect::External) {
                Ok(()) => break,
                Err(status) => {
                    warn!("Failed to set external clock input: {status}. Trying again...");
                    self.silent_reopen();
                    thread::sleep(self.params.clock_retry);
                }
            }
        }
        info!("Clock listening");
        Ok(())
    }

    /// Закрывает и заново открывает устройство, не публикуя события:
    /// для флота устройство всё это время остаётся открытым.
    fn silent_reopen(&mut self) {
        self.suppressed = true;
        self.device_close();
        if let Err(error) = self.device_open() {
            warn!("Silent reopen of {} failed: {error}", self.descriptor.serial);
        }
        self.suppressed = false;
    }

    ////////////////////////////////////////////////////////////////////////////////
    // Захват
    ////////////////////////////////////////////////////////////////////////////////

    fn session_start(&mut self, config: MissionConfig) {
        if let Err(error) = self.try_session_start(config) {
            self.session_stop();
            self.report_error(error);
        }
    }

    /// Настраивает тракты, взводит триггер и запускает поток обмена.
    /// Первый сбой прерывает запуск; частично созданный движок
    /// разбирается своим Drop.
    fn try_session_start(&mut self, config: MissionConfig) -> StrobeResult<()> {
        if !config.valid() {
            return Err(StrobeError::ConfigInvalid(
                "samples_count, samplerate, frequency and bandwidth must be non-zero".to_string(),
            ));
        }

        let handle = self.device_handle()?;
        let trigger_role = if self.role.is_master() {
            TriggerRole::Master
        } else {
            TriggerRole::Slave
        };

        match config.direction {
            Direction::Rx => {
                self.configure_module(&config, RfModule::Rx1)?;
                self.configure_module(&config, RfModule::Rx2)?;
                self.module_enable(RfModule::Rx1, true)?;
                self.module_enable(RfModule::Rx2, true)?;
                self.module_gain(RfModule::Rx1, config.gain)?;
                self.module_gain(RfModule::Rx2, config.gain)?;

                let mut engine = StreamEngine::new(
                    self.driver.clone(),
                    handle,
                    Direction::Rx,
                    config,
                    self.stream_sender.clone(),
                    self.metrics.clone(),
                );
                engine.arm(trigger_role)?;
                engine.init()?;
                engine.start(ChannelLayout::RxX2)?;
                self.rx_stream = Some(engine);
            }
            Direction::Tx => {
                let module = config.channel.tx_module();
                self.configure_module(&config, module)?;
                self.module_enable(module, true)?;
                self.module_gain(module, config.gain)?;

                let mut engine = StreamEngine::new(
                    self.driver.clone(),
                    handle,
                    Direction::Tx,
                    config,
                    self.stream_sender.clone(),
                    self.metrics.clone(),
                );
                engine.arm(trigger_role)?;
                engine.init()?;
                engine.start(ChannelLayout::TxX1)?;
                self.tx_stream = Some(engine);
            }
        }

        thread::sleep(self.params.start_settle);
        self.capturing = true;
        info!("Session started");
        self.emit(SessionEvent::Started(self.role));
        Ok(())
    }

    /// Останавливает захват: стоп потока, снятие триггера,
    /// деинициализация — в строгом порядке. Сбой отдельного шага
    /// журналируется и не прерывает остановку.
    fn session_stop(&mut self) {
        if let Some(engine) = self.tx_stream.as_mut() {
            engine.stop();
            if let Err(error) = engine.disarm() {
                warn!("TX trigger disarm: {error}");
            }
            engine.deinit();
        }
        self.tx_stream = None;

        if let Some(engine) = self.rx_stream.as_mut() {
            engine.stop();
            if let Err(error) = engine.disarm() {
                warn!("RX trigger disarm: {error}");
            }
            engine.deinit();
        }
        self.rx_stream = None;

        self.capturing = false;
        info!("Session stopped");
        self.emit(SessionEvent::Stopped(self.role));
    }

    /// Выстрел аппаратного триггера. Команда приходит только мастеру.
    fn trigger_fire(&mut self) {
        let engine = self.rx_stream.as_ref().or(self.tx_stream.as_ref());
        let result = match engine {
            Some(engine) => engine.fire(),
            None => Err(StrobeError::HardwareCall {
                operation: "trigger_fire",
                status: HwStatus::NOT_INIT,
            }),
        };

        match result {
            Ok(()) => {
                debug!("Trigger fired");
                self.emit(SessionEvent::TriggerFired(self.role));
            }
            Err(error) => self.report_error(error),
        }
    }

    ////////////////////////////////////////////////////////////////////////////////
    // Настройка трактов
    ////////////////////////////////////////////////////////////////////////////////

    /// Программирует частоту, частоту дискретизации, полосу, FIR фильтры
    /// и ручной режим усиления модуля. Каждый записанный параметр
    /// читается обратно для журнала.
    fn configure_module(&self, config: &MissionConfig, module: RfModule) -> StrobeResult<()> {
        let handle = self.device_handle()?;
        let step = |name: &'static str, result: HwResult<()>| -> StrobeResult<()> {
            result.map_err(|status| StrobeError::ModuleConfig {
                module,
                step: name,
                status,
            })
        };

        step(
            "frequency",
            self.driver.set_frequency(handle, module, config.frequency),
        )?;
        if let Ok(frequency) = self.driver.frequency(handle, module) {
            info!("[{module}] Frequency set to {frequency}");
        }

        step(
            "samplerate",
            self.driver.set_sample_rate(handle, module, config.samplerate),
        )?;
        if let Ok(samplerate) = self.driver.sample_rate(handle, module) {
            info!("[{module}] Samplerate set to {samplerate}");
        }

        step(
            "bandwidth",
            self.driver.set_bandwidth(handle, module, config.bandwidth),
        )?;
        if let Ok(bandwidth) = self.driver.bandwidth(handle, module) {
            info!("[{module}] Bandwidth set to {bandwidth}");
        }

        step("rx fir", self.driver.set_rx_fir_decimation(handle))?;
        step("tx fir", self.driver.set_tx_fir_interpolation(handle))?;
        step("gain mode", self.driver.set_manual_gain_mode(handle, module))?;

        info!("[{module}] Setup completed");
        Ok(())
    }

    fn module_enable(&self, module: RfModule, enabled: bool) -> StrobeResult<()> {
        let handle = self.device_handle()?;
        hw(
            "enable_module",
            self.driver.enable_module(handle, module, enabled),
        )?;
        info!("[{module}] Module set state to {enabled}");
        Ok(())
    }

    fn module_gain(&self, module: RfModule, gain: i32) -> StrobeResult<()> {
        let handle = self.device_handle()?;
        hw("set_gain", self.driver.set_gain(handle, module, gain))?;
        info!("[{module}] Gain set to {gain}");
        Ok(())
    }

    ////////////////////////////////////////////////////////////////////////////////
    // Собственные методы
    ////////////////////////////////////////////////////////////////////////////////

    fn emit(&self, event: SessionEvent) {
        if self.suppressed {
            return;
        }
        let _ = self.events.send(event);
    }

    /// Журналирует ошибку, останавливает активный захват и пробрасывает
    /// событие наружу.
    fn report_error(&mut self, error: StrobeError) {
        error!("Device {}: {error}", self.descriptor.serial);
        self.metrics.hw_errors.fetch_add(1, Ordering::Relaxed);
        if self.capturing {
            self.session_stop();
        }
        self.emit(SessionEvent::Error(self.role, error));
    }
}
