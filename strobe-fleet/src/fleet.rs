use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{select, Receiver, Sender};
use log::{debug, error, info, warn};
use strobe_hal::RadioDriver;
use strobe_types::{
    ClockRole, DeviceRole, MissionConfig, SampleBlock, StrobeError, StrobeResult,
};

use crate::hw;
use crate::metrics::CaptureMetrics;
use crate::params::FleetParams;
use crate::session::{DeviceSession, SessionCommand, SessionEvent, SessionHandle};
use crate::state::FleetState;

/// Потребитель готовых блоков. Вызывается из потока координатора,
/// поэтому обязан не блокироваться надолго.
pub trait SampleSink: Send {
    fn on_block(&mut self, role: DeviceRole, block: &SampleBlock);
}

/// Сток, отбрасывающий блоки: передающие миссии и тесты.
#[derive(Debug, Default)]
pub struct NullSink;

impl SampleSink for NullSink {
    fn on_block(&mut self, _role: DeviceRole, _block: &SampleBlock) {}
}

/// События жизненного цикла флота, публикуемые наружу.
#[derive(Debug, Clone)]
pub enum FleetEvent {
    DeviceOpened(DeviceRole),
    DeviceClosed(DeviceRole),
    /// Тактовая цепочка сошлась, устройства готовы к старту
    FleetInitialized,
    /// Триггер выстрелил, все устройства пишут синхронно
    FleetStarted,
    /// Последняя запущенная сессия остановилась
    FleetStopped,
    /// Все сессии закрыты, цикл координатора завершается
    FleetDeinitialized,
    DeviceError { role: DeviceRole, message: String },
    /// Лишнее устройство исключено из флота
    UnknownDevice { serial: String },
}

#[derive(Debug, Clone, Copy)]
enum FleetCommand {
    Stop,
}

/// Клонируемая ручка внешнего управления флотом.
#[derive(Debug, Clone)]
pub struct FleetControl {
    commands: Sender<FleetCommand>,
}

impl FleetControl {
    /// Запрашивает упорядоченную остановку и закрытие всех сессий.
    /// Повторные запросы безвредны.
    pub fn stop(&self) {
        let _ = self.commands.send(FleetCommand::Stop);
    }
}

/// Координатор флота устройств.
///
/// Перечисляет устройства, назначает роли по порядку перечисления,
/// выстраивает цепочку опорной частоты от мастера к хвосту, запускает
/// сессии и стреляет общим триггером, когда стартовали все. Владеет
/// единственным приёмником событий всех сессий.
pub struct FleetCoordinator {
    driver: Arc<dyn RadioDriver>,
    config: MissionConfig,
    params: FleetParams,
    sink: Box<dyn SampleSink>,
    metrics: Arc<CaptureMetrics>,
    state: FleetState,
    sessions: BTreeMap<DeviceRole, SessionHandle>,
    /// Роли, чьи устройства уже отчитались о закрытии
    closed: BTreeSet<DeviceRole>,
    session_sender: Sender<SessionEvent>,
    session_events: Receiver<SessionEvent>,
    fleet_sender: Sender<FleetEvent>,
    fleet_events: Receiver<FleetEvent>,
    commands: Receiver<FleetCommand>,
    control: FleetControl,
    expected: usize,
    first_error: Option<StrobeError>,
    chain_started: bool,
    sweep_requested: bool,
}

impl FleetCoordinator {
    pub fn new(
        driver: Arc<dyn RadioDriver>,
        config: MissionConfig,
        params: FleetParams,
        sink: Box<dyn SampleSink>,
    ) -> Self {
        let (session_sender, session_events) = crossbeam_channel::unbounded();
        let (fleet_sender, fleet_events) = crossbeam_channel::unbounded();
        let (command_sender, commands) = crossbeam_channel::unbounded();

        Self {
            driver,
            config,
            params,
            sink,
            metrics: CaptureMetrics::new(),
            state: FleetState::new(),
            sessions: BTreeMap::new(),
            closed: BTreeSet::new(),
            session_sender,
            session_events,
            fleet_sender,
            fleet_events,
            commands,
            control: FleetControl {
                commands: command_sender,
            },
            expected: 0,
            first_error: None,
            chain_started: false,
            sweep_requested: false,
        }
    }

    /// Ручка управления флотом из других потоков.
    pub fn control(&self) -> FleetControl {
        self.control.clone()
    }

    /// Канал событий жизненного цикла. Рассчитан на одного потребителя.
    pub fn events(&self) -> Receiver<FleetEvent> {
        self.fleet_events.clone()
    }

    pub fn metrics(&self) -> Arc<CaptureMetrics> {
        self.metrics.clone()
    }

    /// Перечисляет устройства, назначает роли и запускает сессии.
    /// Каждой сессии сразу ставится команда открытия.
    pub fn discover(&mut self) -> StrobeResult<()> {
        let descriptors = hw("enumerate", self.driver.enumerate())?;
        let expected = if self.config.devices != 0 {
            self.config.devices
        } else {
            descriptors.len()
        };

        if descriptors.is_empty() || descriptors.len() < expected {
            return Err(StrobeError::NoDevice {
                found: descriptors.len(),
                expected: expected.max(1),
            });
        }
        info!("{} bladeRF devices found", descriptors.len());

        for (index, descriptor) in descriptors.into_iter().enumerate() {
            if index >= expected {
                warn!("Unknown device: {}", descriptor.serial);
                self.publish(FleetEvent::UnknownDevice {
                    serial: descriptor.serial,
                });
                continue;
            }

            let role = DeviceRole(index as u8 + 1);
            let handle = DeviceSession::spawn(
                role,
                descriptor,
                self.driver.clone(),
                self.params.clone(),
                self.session_sender.clone(),
                self.metrics.clone(),
            )?;
            handle.send(SessionCommand::Open);
            self.sessions.insert(role, handle);
        }

        self.expected = self.sessions.len();
        Ok(())
    }

    /// Цикл событий флота. Блокируется до закрытия всех сессий и
    /// возвращает первую фатальную ошибку устройства, если она была.
    pub fn run(mut self) -> StrobeResult<()> {
        if self.sessions.is_empty() {
            return Err(StrobeError::NoDevice {
                found: 0,
                expected: self.expected.max(1),
            });
        }

        let session_events = self.session_events.clone();
        let commands = self.commands.clone();

        loop {
            select! {
                recv(session_events) -> event => match event {
                    Ok(event) => {
                        if !self.on_session_event(event) {
                            break;
                        }
                    }
                    Err(_) => break,
                },
                recv(commands) -> command => {
                    if let Ok(FleetCommand::Stop) = command {
                        self.request_stop();
                    }
                }
            }
        }

        // Потоки сессий дорабатывают после последнего Closed; ошибка,
        // отправленная следом за ним, не должна потеряться. Сначала
        // join, затем добор хвоста очереди.
        for handle in self.sessions.values_mut() {
            handle.shutdown();
        }
        while let Ok(event) = session_events.try_recv() {
            if let SessionEvent::Error(role, error) = event {
                self.record_error(role, error);
            }
        }

        match self.first_error.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    ////////////////////////////////////////////////////////////////////////////////
    // Собственные методы
    ////////////////////////////////////////////////////////////////////////////////

    /// Обрабатывает событие сессии. Возвращает false, когда цикл флота
    /// пора завершать.
    fn on_session_event(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::Opened(role) => {
                self.state.mark_opened(role);
                debug!("Device {role} opened");
                self.publish(FleetEvent::DeviceOpened(role));
                if self.state.opened_count() == self.expected && !self.chain_started {
                    self.chain_started = true;
                    self.start_clock_chain();
                }
            }
            SessionEvent::ClockApplied(role) => self.advance_clock_chain(role),
            SessionEvent::Started(role) => {
                debug!("Device {role} session started");
                if self.state.mark_started(role, self.expected) {
                    self.fire_master();
                }
            }
            SessionEvent::TriggerFired(role) => {
                debug!("Trigger fired by device {role}");
                self.publish(FleetEvent::FleetStarted);
            }
            SessionEvent::Stopped(role) => {
                debug!("Device {role} session stopped");
                if self.state.mark_stopped(role) {
                    self.publish(FleetEvent::FleetStopped);
                }
            }
            SessionEvent::Closed(role) => {
                self.state.remove(role);
                self.publish(FleetEvent::DeviceClosed(role));
                self.closed.insert(role);
                if self.closed.len() == self.sessions.len() {
                    info!("Fleet deinitialized");
                    self.publish(FleetEvent::FleetDeinitialized);
                    return false;
                }
            }
            SessionEvent::Block(role, block) => self.sink.on_block(role, &block),
            SessionEvent::Error(role, error) => self.record_error(role, error),
        }
        true
    }

    /// Запоминает первую ошибку флота и публикует её наружу.
    fn record_error(&mut self, role: DeviceRole, error: StrobeError) {
        error!("Device {role}: {error}");
        self.publish(FleetEvent::DeviceError {
            role,
            message: error.to_string(),
        });
        if self.first_error.is_none() {
            self.first_error = Some(error);
        }
    }

    /// Первое устройство раздаёт опорную частоту; одиночный флот живёт
    /// от бортового генератора.
    fn start_clock_chain(&mut self) {
        let clock = if self.expected == 1 {
            ClockRole::Onboard
        } else {
            ClockRole::BroadcastMaster
        };
        self.send_to(DeviceRole::MASTER, SessionCommand::ApplyClock(clock));
    }

    /// Цепочка сходится по порядку ролей: каждое следующее устройство
    /// слушает внешний клок и ретранслирует его дальше, пока есть кому.
    /// Когда отчитался хвост, флот инициализирован и стартует захват.
    fn advance_clock_chain(&mut self, applied: DeviceRole) {
        let last = self.expected as u8;
        if applied.0 < last {
            let next = applied.next();
            let downstream = next.0 < last;
            self.send_to(
                next,
                SessionCommand::ApplyClock(ClockRole::ListenRebroadcast { downstream }),
            );
        } else {
            info!("Fleet initialized: {} devices in sync chain", self.expected);
            self.publish(FleetEvent::FleetInitialized);
            self.start_capture();
        }
    }

    /// Рассылает старт захвата всем сессиям.
    fn start_capture(&mut self) {
        for handle in self.sessions.values() {
            handle.send(SessionCommand::Start(self.config.clone()));
        }
    }

    /// Пауза и выстрел. Пауза намеренно блокирует поток координатора:
    /// между последним стартом и фронтом триггера должно пройти время
    /// на стабилизацию потоков.
    fn fire_master(&mut self) {
        thread::sleep(self.params.fire_settle);
        info!("Trigger fire");
        self.send_to(DeviceRole::MASTER, SessionCommand::FireTrigger);
    }

    /// Упорядоченная остановка: каждой сессии стоп и закрытие.
    fn request_stop(&mut self) {
        if self.sweep_requested {
            return;
        }
        self.sweep_requested = true;
        info!("Fleet stop requested");
        for handle in self.sessions.values() {
            handle.send(SessionCommand::Stop);
            handle.send(SessionCommand::Close);
        }
    }

    fn send_to(&self, role: DeviceRole, command: SessionCommand) {
        if let Some(handle) = self.sessions.get(&role) {
            handle.send(command);
        }
    }

    fn publish(&self, event: FleetEvent) {
        let _ = self.fleet_sender.send(event);
    }
}
