use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use log::error;
use strobe_fleet::SampleSink;
use strobe_types::{DeviceRole, SampleBlock};

/// Счётчики записи, разделяемые с потоком писателя.
#[derive(Debug, Default)]
pub struct SinkStats {
    pub blocks_written: AtomicU64,
    pub bytes_written: AtomicU64,
    pub blocks_dropped: AtomicU64,
    pub write_errors: AtomicU64,
}

/// Сток, пишущий каналы блоков в сырые файлы.
///
/// Приём блока не блокирует координатора: блок уходит в очередь
/// выделенного потока писателя, при переполнении очереди отбрасывается
/// и считается. Каждой роли соответствует пара файлов rx1/rx2; мастер
/// пишет без суффикса, остальные с номером роли.
pub struct RawFileSink {
    sender: Option<Sender<(DeviceRole, SampleBlock)>>,
    worker: Option<thread::JoinHandle<()>>,
    stats: Arc<SinkStats>,
}

impl RawFileSink {
    /// Создаёт сток с очередью на `capacity` блоков. Каталог выходных
    /// файлов создаётся сразу, сами файлы — при первом блоке роли.
    pub fn new(dir: &Path, capacity: usize) -> std::io::Result<RawFileSink> {
        fs::create_dir_all(dir)?;

        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        let stats = Arc::new(SinkStats::default());
        let writer_stats = stats.clone();
        let dir = dir.to_path_buf();

        let worker = thread::Builder::new()
            .name("rx-writer".to_string())
            .spawn(move || writer_loop(&dir, receiver, writer_stats))?;

        Ok(RawFileSink {
            sender: Some(sender),
            worker: Some(worker),
            stats,
        })
    }

    pub fn stats(&self) -> Arc<SinkStats> {
        self.stats.clone()
    }

    /// Закрывает очередь и дожидается, пока писатель допишет хвост и
    /// сбросит буферы на диск.
    pub fn finish(&mut self) {
        self.sender = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Writer thread panicked");
            }
        }
    }
}

impl SampleSink for RawFileSink {
    fn on_block(&mut self, role: DeviceRole, block: &SampleBlock) {
        let Some(sender) = &self.sender else {
            return;
        };
        match sender.try_send((role, block.clone())) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.stats.blocks_dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

impl Drop for RawFileSink {
    fn drop(&mut self) {
        self.finish();
    }
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

/// Имена файлов каналов роли.
fn channel_paths(dir: &Path, role: DeviceRole) -> (PathBuf, PathBuf) {
    if role.is_master() {
        (dir.join("rx1.bin"), dir.join("rx2.bin"))
    } else {
        (
            dir.join(format!("rx1_{role}.bin")),
            dir.join(format!("rx2_{role}.bin")),
        )
    }
}

type ChannelWriters = (BufWriter<File>, BufWriter<File>);

fn writer_loop(
    dir: &Path,
    blocks: Receiver<(DeviceRole, SampleBlock)>,
    stats: Arc<SinkStats>,
) {
    let mut writers: BTreeMap<DeviceRole, ChannelWriters> = BTreeMap::new();

    for (role, block) in blocks.iter() {
        let pair = match writers.entry(role) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let (rx1_path, rx2_path) = channel_paths(dir, role);
                let opened = File::create(&rx1_path)
                    .and_then(|rx1| File::create(&rx2_path).map(|rx2| (rx1, rx2)));
                match opened {
                    Ok((rx1, rx2)) => entry.insert((BufWriter::new(rx1), BufWriter::new(rx2))),
                    Err(err) => {
                        error!("Failed to create output files for device {role}: {err}");
                        stats.write_errors.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                }
            }
        };

        let written = pair
            .0
            .write_all(&block.rx1)
            .and_then(|()| pair.1.write_all(&block.rx2));
        match written {
            Ok(()) => {
                stats.blocks_written.fetch_add(1, Ordering::Relaxed);
                stats
                    .bytes_written
                    .fetch_add((block.rx1.len() + block.rx2.len()) as u64, Ordering::Relaxed);
            }
            Err(err) => {
                error!("Write of device {role} block failed: {err}");
                stats.write_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    for (role, (rx1, rx2)) in writers.iter_mut() {
        if rx1.flush().and_then(|()| rx2.flush()).is_err() {
            error!("Failed to flush output of device {role}");
            stats.write_errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn block(index: u64, seed: u8) -> SampleBlock {
        SampleBlock::new(
            index,
            vec![seed, seed + 1, seed + 2, seed + 3],
            vec![seed + 10, seed + 11, seed + 12, seed + 13],
        )
    }

    #[test]
    fn test_master_channels_byte_for_byte() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = RawFileSink::new(dir.path(), 16).unwrap();

        sink.on_block(DeviceRole::MASTER, &block(0, 0));
        sink.on_block(DeviceRole::MASTER, &block(1, 100));
        sink.finish();

        let rx1 = fs::read(dir.path().join("rx1.bin")).unwrap();
        let rx2 = fs::read(dir.path().join("rx2.bin")).unwrap();
        assert_eq!(rx1, vec![0, 1, 2, 3, 100, 101, 102, 103]);
        assert_eq!(rx2, vec![10, 11, 12, 13, 110, 111, 112, 113]);

        let stats = sink.stats();
        assert_eq!(stats.blocks_written.load(Ordering::Relaxed), 2);
        assert_eq!(stats.bytes_written.load(Ordering::Relaxed), 16);
        assert_eq!(stats.write_errors.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_role_suffix_in_file_names() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = RawFileSink::new(dir.path(), 16).unwrap();

        sink.on_block(DeviceRole::MASTER, &block(0, 0));
        sink.on_block(DeviceRole(2), &block(0, 50));
        sink.on_block(DeviceRole(3), &block(0, 60));
        sink.finish();

        assert!(dir.path().join("rx1.bin").exists());
        assert!(dir.path().join("rx2.bin").exists());
        assert!(dir.path().join("rx1_2.bin").exists());
        assert!(dir.path().join("rx2_2.bin").exists());
        assert!(dir.path().join("rx1_3.bin").exists());
        assert_eq!(fs::read(dir.path().join("rx1_2.bin")).unwrap(), vec![50, 51, 52, 53]);
    }

    #[test]
    fn test_blocks_after_finish_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = RawFileSink::new(dir.path(), 16).unwrap();

        sink.on_block(DeviceRole::MASTER, &block(0, 0));
        sink.finish();
        sink.on_block(DeviceRole::MASTER, &block(1, 100));

        let stats = sink.stats();
        assert_eq!(stats.blocks_written.load(Ordering::Relaxed), 1);
        assert_eq!(fs::read(dir.path().join("rx1.bin")).unwrap().len(), 4);
    }

    #[test]
    fn test_output_directory_created() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("out").join("run1");
        let mut sink = RawFileSink::new(&nested, 4).unwrap();

        sink.on_block(DeviceRole::MASTER, &block(0, 7));
        sink.finish();

        assert_eq!(fs::read(nested.join("rx1.bin")).unwrap(), vec![7, 8, 9, 10]);
    }
}
