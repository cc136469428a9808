use std::path::Path;
use std::sync::Arc;

use strobe_types::{DeviceDescriptor, Direction, HwResult, RfModule, TriggerRole};

/// Идентификатор открытого устройства, выданный драйвером.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(pub u64);

/// Идентификатор инициализированного потока обмена.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamToken(pub u64);

/// Раскладка каналов потока обмена.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelLayout {
    /// Один приёмный тракт
    RxX1,
    /// Один передающий тракт
    TxX1,
    /// Оба приёмных тракта, выборки интерливятся попарно
    RxX2,
    /// Оба передающих тракта
    TxX2,
}

/// Источник опорной частоты устройства.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockSelect {
    /// Бортовой генератор
    Onboard,
    /// Внешний вход CLK IN
    External,
}

/// Аппаратная линия триггера.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSignal {
    /// J71-4 на x40/x115
    J714,
    /// J51-1 на 2.0 micro — линия синхронного запуска флота
    J511,
    /// mini_exp[1]
    MiniExp1,
}

/// Состояние аппаратного триггера одного тракта.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwTrigger {
    pub module: RfModule,
    pub role: TriggerRole,
    pub signal: TriggerSignal,
}

/// Параметры инициализации потока обмена буферами.
#[derive(Debug, Clone, Copy)]
pub struct StreamParams {
    pub direction: Direction,
    /// Слотов в арене
    pub slots: usize,
    /// Комплексных выборок в одном слоте
    pub samples_per_slot: usize,
    /// Транзакций в полёте
    pub transfers: usize,
}

/// Арена буферов потока: фиксированный набор слотов, адресуемых индексом.
/// Слоты принадлежат драйверу; обмен содержимым идёт только копированием.
pub trait StreamArena: Send + Sync {
    /// Количество слотов.
    fn slots(&self) -> usize;

    /// Комплексных выборок в одном слоте.
    fn samples_per_slot(&self) -> usize;

    /// Копия содержимого слота: I/Q подряд, по два i16 на выборку.
    fn read(&self, index: usize) -> Vec<i16>;

    /// Записывает выборки в начало слота.
    fn write(&self, index: usize, samples: &[i16]);
}

/// Ответ обработчика на завершённую транзакцию.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferAction {
    /// Отдать драйверу слот с этим индексом
    Next(usize),
    /// Завершить поток
    Shutdown,
}

/// Обработчик транзакций потока. Вызывается из контекста драйвера,
/// поэтому обязан быть коротким и неблокирующим.
pub trait TransferHandler: Send + Sync {
    /// `completed` — индекс слота, который драйвер только что заполнил
    /// (приём) или отправил (передача).
    fn on_transfer(&self, completed: usize) -> TransferAction;
}

/// Поверхность вызовов драйвера, используемая флотом. Потокобезопасна:
/// сессии устройств живут каждая на своём потоке и делят один экземпляр.
pub trait RadioDriver: Send + Sync {
    /// Перечисляет подключённые устройства.
    fn enumerate(&self) -> HwResult<Vec<DeviceDescriptor>>;

    /// Открывает устройство по серийному номеру дескриптора.
    fn open(&self, descriptor: &DeviceDescriptor) -> HwResult<DeviceHandle>;

    /// Закрывает устройство. Недействительный handle игнорируется.
    fn close(&self, handle: DeviceHandle);

    /// FPGA уже сконфигурирована.
    fn fpga_configured(&self, handle: DeviceHandle) -> HwResult<bool>;

    /// Размер образа FPGA, который ожидает плата, в байтах.
    fn fpga_expected_bytes(&self, handle: DeviceHandle) -> HwResult<u64>;

    /// Загружает образ FPGA из файла.
    fn fpga_load(&self, handle: DeviceHandle, image: &Path) -> HwResult<()>;

    fn set_frequency(&self, handle: DeviceHandle, module: RfModule, hz: u64) -> HwResult<()>;
    fn frequency(&self, handle: DeviceHandle, module: RfModule) -> HwResult<u64>;
    fn set_sample_rate(&self, handle: DeviceHandle, module: RfModule, hz: u64) -> HwResult<()>;
    fn sample_rate(&self, handle: DeviceHandle, module: RfModule) -> HwResult<u64>;
    fn set_bandwidth(&self, handle: DeviceHandle, module: RfModule, hz: u64) -> HwResult<()>;
    fn bandwidth(&self, handle: DeviceHandle, module: RfModule) -> HwResult<u64>;

    /// Децимация x4 на приёмном FIR фильтре RFIC.
    fn set_rx_fir_decimation(&self, handle: DeviceHandle) -> HwResult<()>;

    /// Интерполяция x4 на передающем FIR фильтре RFIC.
    fn set_tx_fir_interpolation(&self, handle: DeviceHandle) -> HwResult<()>;

    /// Ручной режим усиления модуля.
    fn set_manual_gain_mode(&self, handle: DeviceHandle, module: RfModule) -> HwResult<()>;

    fn set_gain(&self, handle: DeviceHandle, module: RfModule, db: i32) -> HwResult<()>;

    /// Включает или выключает RF модуль.
    fn enable_module(
        &self,
        handle: DeviceHandle,
        module: RfModule,
        enabled: bool,
    ) -> HwResult<()>;

    /// Раздача опорной частоты на разъём CLK OUT.
    fn set_clock_output(&self, handle: DeviceHandle, enabled: bool) -> HwResult<()>;

    /// Выбор источника опорной частоты.
    fn set_clock_select(&self, handle: DeviceHandle, select: ClockSelect) -> HwResult<()>;

    /// Включает PLL захвата внешнего опорного сигнала.
    fn set_pll_enable(&self, handle: DeviceHandle, enabled: bool) -> HwResult<()>;

    /// Частота опорного сигнала для PLL.
    fn set_pll_refclk(&self, handle: DeviceHandle, hz: u64) -> HwResult<()>;

    /// Читает состояние триггера тракта на заданной линии.
    fn trigger_init(
        &self,
        handle: DeviceHandle,
        module: RfModule,
        signal: TriggerSignal,
    ) -> HwResult<HwTrigger>;

    /// Взводит (`arm` = true) или снимает со взвода триггер.
    fn trigger_arm(&self, handle: DeviceHandle, trigger: &HwTrigger, arm: bool) -> HwResult<()>;

    /// Стреляет триггером: все взведённые на эту линию потоки стартуют.
    fn trigger_fire(&self, handle: DeviceHandle, trigger: &HwTrigger) -> HwResult<()>;

    /// Создаёт поток обмена и арену его буферов.
    fn stream_init(
        &self,
        handle: DeviceHandle,
        params: StreamParams,
    ) -> HwResult<(StreamToken, Arc<dyn StreamArena>)>;

    /// Гоняет цикл обмена. Блокирует вызывающий поток до `Shutdown` от
    /// обработчика либо до ошибки драйвера.
    fn stream_run(
        &self,
        token: StreamToken,
        layout: ChannelLayout,
        handler: Arc<dyn TransferHandler>,
    ) -> HwResult<()>;

    /// Освобождает ресурсы потока. После возврата арена мертва.
    fn stream_deinit(&self, token: StreamToken);
}
