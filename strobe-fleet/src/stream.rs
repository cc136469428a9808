use std::fs::File;
use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Sender, TrySendError};
use log::warn;
use strobe_hal::{
    ChannelLayout, DeviceHandle, HwTrigger, RadioDriver, StreamArena, StreamParams, StreamToken,
    TransferAction, TransferHandler, TriggerSignal,
};
use strobe_types::{
    Direction, HwStatus, MissionConfig, RfModule, SampleBlock, StrobeError, StrobeResult,
    TriggerRole, SAMPLE_SIZE_BYTES, SETTLING_SAMPLES,
};

use crate::hw;
use crate::metrics::CaptureMetrics;

/// Слотов арены приёмного потока.
pub const RX_SLOTS: usize = 32;
/// Слотов арены передающего потока.
pub const TX_SLOTS: usize = 16;

/// События потока обмена, адресованные сессии устройства.
#[derive(Debug)]
pub enum StreamEvent {
    /// Готовый блок двухканальных выборок
    Block(SampleBlock),
    /// Цикл обмена упал
    Error(StrobeError),
}

/// Состояние, разделяемое между сессией и контекстом драйвера.
///
/// Это сердце пинг-понг протокола: callback драйвера получает индекс
/// завершённого слота, а возвращает индекс следующего. Курсор
/// продвигается строго до возврата слота драйверу и мутируется только
/// из callback-а.
struct TransferShared {
    /// Поток жив. Сбрасывается с release при остановке; callback читает
    /// с acquire на каждой транзакции.
    running: AtomicBool,
    cursor: AtomicUsize,
    sequence: AtomicU64,
    slots: usize,
    samples_count: usize,
    settling: usize,
    direction: Direction,
    arena: Arc<dyn StreamArena>,
    events: Sender<StreamEvent>,
    metrics: Arc<CaptureMetrics>,
}

impl TransferHandler for TransferShared {
    fn on_transfer(&self, completed: usize) -> TransferAction {
        if !self.running.load(Ordering::Acquire) {
            return TransferAction::Shutdown;
        }

        if self.direction == Direction::Rx {
            let raw = self.arena.read(completed);
            let block = SampleBlock::from_interleaved(
                self.sequence.fetch_add(1, Ordering::Relaxed),
                &raw,
                self.samples_count,
                self.settling,
            );

            // Очередь сессии ограничена: блокироваться здесь нельзя,
            // отставший потребитель стоит блоков, а не дедлока.
            match self.events.try_send(StreamEvent::Block(block)) {
                Ok(()) => {
                    self.metrics.blocks_emitted.fetch_add(1, Ordering::Relaxed);
                    self.metrics.samples_emitted.fetch_add(
                        (self.samples_count - self.settling) as u64,
                        Ordering::Relaxed,
                    );
                }
                Err(TrySendError::Full(_)) => {
                    self.metrics.blocks_dropped.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Disconnected(_)) => return TransferAction::Shutdown,
            }
        }

        let next = (self.cursor.load(Ordering::Relaxed) + 1) % self.slots;
        self.cursor.store(next, Ordering::Relaxed);
        TransferAction::Next(next)
    }
}

/// Движок одного потока обмена с драйвером.
///
/// Владеет ареной буферов, аппаратным триггером тракта и рабочим
/// потоком, в котором крутится цикл обмена.
pub struct StreamEngine {
    driver: Arc<dyn RadioDriver>,
    handle: DeviceHandle,
    direction: Direction,
    config: MissionConfig,
    events: Sender<StreamEvent>,
    metrics: Arc<CaptureMetrics>,
    slots: usize,
    token: Option<StreamToken>,
    arena: Option<Arc<dyn StreamArena>>,
    shared: Option<Arc<TransferShared>>,
    worker: Option<thread::JoinHandle<()>>,
    trigger: Option<HwTrigger>,
}

impl StreamEngine {
    pub fn new(
        driver: Arc<dyn RadioDriver>,
        handle: DeviceHandle,
        direction: Direction,
        config: MissionConfig,
        events: Sender<StreamEvent>,
        metrics: Arc<CaptureMetrics>,
    ) -> Self {
        let slots = match direction {
            Direction::Rx => RX_SLOTS,
            Direction::Tx => TX_SLOTS,
        };

        Self {
            driver,
            handle,
            direction,
            config,
            events,
            metrics,
            slots,
            token: None,
            arena: None,
            shared: None,
            worker: None,
            trigger: None,
        }
    }

    /// Создаёт поток обмена и арену буферов у драйвера.
    ///
    /// Приёмный слот несёт выборки обоих трактов, поэтому вдвое больше
    /// передающего.
    pub fn init(&mut self) -> StrobeResult<()> {
        let samples_per_slot = match self.direction {
            Direction::Rx => self.config.samples_count as usize * 2,
            Direction::Tx => self.config.samples_count as usize,
        };
        let transfers = if self.slots > 1 { self.slots / 2 } else { 1 };

        let params = StreamParams {
            direction: self.direction,
            slots: self.slots,
            samples_per_slot,
            transfers,
        };
        let (token, arena) = self
            .driver
            .stream_init(self.handle, params)
            .map_err(|status| StrobeError::StreamInit { status })?;

        self.token = Some(token);
        self.arena = Some(arena);
        Ok(())
    }

    /// Запускает цикл обмена в выделенном потоке.
    pub fn start(&mut self, layout: ChannelLayout) -> StrobeResult<()> {
        self.stop();

        let token = self.token.ok_or(StrobeError::StreamInit {
            status: HwStatus::NOT_INIT,
        })?;
        let arena = self.arena.clone().ok_or(StrobeError::StreamInit {
            status: HwStatus::NOT_INIT,
        })?;

        if self.direction == Direction::Tx {
            self.prefill_tx(arena.as_ref())?;
        }

        let shared = Arc::new(TransferShared {
            // Флаг ставится до запуска потока: остановка сразу после
            // старта не должна разминуться с ним.
            running: AtomicBool::new(true),
            cursor: AtomicUsize::new(0),
            sequence: AtomicU64::new(0),
            slots: self.slots,
            samples_count: self.config.samples_count as usize,
            settling: SETTLING_SAMPLES,
            direction: self.direction,
            arena,
            events: self.events.clone(),
            metrics: self.metrics.clone(),
        });

        let driver = self.driver.clone();
        let events = self.events.clone();
        let worker_shared = shared.clone();
        let name = match self.direction {
            Direction::Rx => "stream-rx",
            Direction::Tx => "stream-tx",
        };

        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let handler: Arc<dyn TransferHandler> = worker_shared.clone();
                let result = driver.stream_run(token, layout, handler);
                worker_shared.running.store(false, Ordering::Release);

                if let Err(status) = result {
                    warn!("Stream failed: {status}");
                    let error = StrobeError::HardwareCall {
                        operation: "stream_run",
                        status,
                    };
                    let _ = events.try_send(StreamEvent::Error(error));
                }
            })
            .map_err(StrobeError::Io)?;

        self.shared = Some(shared);
        self.worker = Some(worker);
        Ok(())
    }

    /// Останавливает цикл обмена и дожидается выхода рабочего потока.
    /// После возврата новых событий от потока не будет.
    pub fn stop(&mut self) {
        if let Some(shared) = &self.shared {
            shared.running.store(false, Ordering::Release);
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Stream thread panicked");
            }
        }
    }

    /// Освобождает ресурсы потока на стороне драйвера.
    pub fn deinit(&mut self) {
        self.stop();
        if let Some(token) = self.token.take() {
            self.driver.stream_deinit(token);
        }
        self.arena = None;
        self.shared = None;
    }

    ////////////////////////////////////////////////////////////////////////////////
    // Аппаратный триггер
    ////////////////////////////////////////////////////////////////////////////////

    /// Инициализирует триггер тракта на линии синхронизации и взводит
    /// его с заданной ролью.
    pub fn arm(&mut self, role: TriggerRole) -> StrobeResult<()> {
        let module = self.trigger_module();
        let mut trigger = hw(
            "trigger_init",
            self.driver.trigger_init(self.handle, module, TriggerSignal::J511),
        )?;
        trigger.role = role;
        hw("trigger_arm", self.driver.trigger_arm(self.handle, &trigger, true))?;
        self.trigger = Some(trigger);
        Ok(())
    }

    /// Снимает триггер со взвода. Идемпотентна: повторный вызов и вызов
    /// без взведённого триггера ничего не делают.
    pub fn disarm(&mut self) -> StrobeResult<()> {
        if let Some(trigger) = &mut self.trigger {
            if trigger.role != TriggerRole::Disabled {
                trigger.role = TriggerRole::Disabled;
                let disabled = *trigger;
                hw(
                    "trigger_arm",
                    self.driver.trigger_arm(self.handle, &disabled, false),
                )?;
            }
        }
        Ok(())
    }

    /// Перевзводит триггер с прежней ролью.
    pub fn rearm(&mut self) -> StrobeResult<()> {
        let last = match &self.trigger {
            Some(trigger) => trigger.role,
            None => return Ok(()),
        };
        if last == TriggerRole::Disabled {
            return Ok(());
        }
        self.disarm()?;
        self.arm(last)
    }

    /// Выстрел триггера: стартуют все потоки, взведённые на линию.
    pub fn fire(&self) -> StrobeResult<()> {
        match &self.trigger {
            Some(trigger) => hw("trigger_fire", self.driver.trigger_fire(self.handle, trigger)),
            None => Err(StrobeError::HardwareCall {
                operation: "trigger_fire",
                status: HwStatus::NOT_INIT,
            }),
        }
    }

    ////////////////////////////////////////////////////////////////////////////////
    // Собственные методы
    ////////////////////////////////////////////////////////////////////////////////

    fn trigger_module(&self) -> RfModule {
        match self.direction {
            Direction::Rx => RfModule::Rx1,
            Direction::Tx => RfModule::Tx1,
        }
    }

    /// Заполняет все слоты арены первыми `samples_count` парами I/Q из
    /// файла источника: передача гоняет одно и то же кольцо буферов.
    fn prefill_tx(&self, arena: &dyn StreamArena) -> StrobeResult<()> {
        let needed = self.config.samples_count as usize * SAMPLE_SIZE_BYTES;
        let mut bytes = vec![0u8; needed];
        let mut source = File::open(&self.config.file_name)?;
        source.read_exact(&mut bytes)?;

        let samples: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        for slot in 0..self.slots {
            arena.write(slot, &samples);
        }
        Ok(())
    }
}

impl Drop for StreamEngine {
    fn drop(&mut self) {
        self.stop();
        if let Err(error) = self.disarm() {
            warn!("Trigger disarm on drop: {error}");
        }
        self.deinit();
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use crossbeam_channel::{bounded, Receiver};
    use strobe_hal::MockArena;

    use super::*;

    fn make_shared(
        direction: Direction,
        slots: usize,
        samples_count: usize,
        settling: usize,
        capacity: usize,
    ) -> (Arc<TransferShared>, Receiver<StreamEvent>, Arc<MockArena>) {
        let per_slot = match direction {
            Direction::Rx => samples_count * 2,
            Direction::Tx => samples_count,
        };
        let arena = Arc::new(MockArena::new(slots, per_slot));
        let (events, receiver) = bounded(capacity);
        let shared = Arc::new(TransferShared {
            running: AtomicBool::new(true),
            cursor: AtomicUsize::new(0),
            sequence: AtomicU64::new(0),
            slots,
            samples_count,
            settling,
            direction,
            arena: arena.clone(),
            events,
            metrics: CaptureMetrics::new(),
        });
        (shared, receiver, arena)
    }

    #[test]
    fn test_cursor_advances_mod_slots() {
        let (shared, _receiver, _arena) = make_shared(Direction::Tx, 4, 8, 0, 4);

        let mut completed = 0;
        for step in 1..=9 {
            match shared.on_transfer(completed) {
                TransferAction::Next(next) => {
                    assert_eq!(next, step % 4);
                    completed = next;
                }
                TransferAction::Shutdown => panic!("unexpected shutdown"),
            }
        }
        assert_eq!(shared.cursor.load(Ordering::Relaxed), 9 % 4);
    }

    #[test]
    fn test_shutdown_when_not_running() {
        let (shared, receiver, _arena) = make_shared(Direction::Rx, 4, 8, 0, 4);
        shared.running.store(false, Ordering::Release);

        assert_eq!(shared.on_transfer(0), TransferAction::Shutdown);
        assert!(receiver.try_recv().is_err());
        assert_eq!(shared.cursor.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_no_blocks_after_stop() {
        let (shared, receiver, _arena) = make_shared(Direction::Rx, 4, 8, 0, 4);

        assert!(matches!(shared.on_transfer(0), TransferAction::Next(1)));
        assert!(receiver.try_recv().is_ok());

        shared.running.store(false, Ordering::Release);
        assert_eq!(shared.on_transfer(1), TransferAction::Shutdown);
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn test_rx_block_contents() {
        let samples_count = 4;
        let (shared, receiver, arena) = make_shared(Direction::Rx, 2, samples_count, 1, 4);

        // Интерливленные пары: канал 1 получает (10k, 10k+1), канал 2
        // получает (20k, 20k+1).
        let mut raw = vec![0i16; samples_count * 4];
        for pair in 0..samples_count {
            raw[pair * 4] = 10 * pair as i16;
            raw[pair * 4 + 1] = 10 * pair as i16 + 1;
            raw[pair * 4 + 2] = 20 * pair as i16;
            raw[pair * 4 + 3] = 20 * pair as i16 + 1;
        }
        arena.write(0, &raw);

        shared.on_transfer(0);
        let StreamEvent::Block(block) = receiver.try_recv().unwrap() else {
            panic!("expected block");
        };

        let expected = SampleBlock::from_interleaved(0, &raw, samples_count, 1);
        assert_eq!(block, expected);
        assert_eq!(block.samples_count(), samples_count - 1);
    }

    #[test]
    fn test_block_sequence_numbers() {
        let (shared, receiver, _arena) = make_shared(Direction::Rx, 4, 4, 0, 8);

        shared.on_transfer(0);
        shared.on_transfer(1);
        shared.on_transfer(2);

        for expected in 0..3u64 {
            let StreamEvent::Block(block) = receiver.try_recv().unwrap() else {
                panic!("expected block");
            };
            assert_eq!(block.index, expected);
        }
    }

    #[test]
    fn test_full_queue_drops_block_and_advances() {
        let (shared, receiver, _arena) = make_shared(Direction::Rx, 4, 4, 0, 1);

        assert!(matches!(shared.on_transfer(0), TransferAction::Next(1)));
        // Очередь ёмкостью 1 заполнена: следующий блок отбрасывается,
        // но протокол обмена не останавливается.
        assert!(matches!(shared.on_transfer(1), TransferAction::Next(2)));

        assert_eq!(shared.metrics.blocks_dropped.load(Ordering::Relaxed), 1);
        assert_eq!(shared.metrics.blocks_emitted.load(Ordering::Relaxed), 1);

        // Отброшенный блок оставил дыру в нумерации.
        drop(shared);
        let StreamEvent::Block(first) = receiver.try_recv().unwrap() else {
            panic!("expected block");
        };
        assert_eq!(first.index, 0);
    }

    #[test]
    fn test_tx_transfers_emit_nothing() {
        let (shared, receiver, _arena) = make_shared(Direction::Tx, 4, 8, 0, 4);

        shared.on_transfer(0);
        shared.on_transfer(1);
        assert!(receiver.try_recv().is_err());
        assert_eq!(shared.metrics.blocks_emitted.load(Ordering::Relaxed), 0);
    }
}
