/// Размер одной комплексной выборки: I и Q по два байта, little-endian.
pub const SAMPLE_SIZE_BYTES: usize = 2 * std::mem::size_of::<i16>();

/// Отбрасываемых выборок в начале каждого канала блока. Ноль при
/// непрерывном захвате; ненулевое значение нужно только прерывистым
/// режимам, где тракт успевает расстроиться между блоками.
pub const SETTLING_SAMPLES: usize = 0;

/// Блок двухканальных IQ данных с порядковым номером.
///
/// Байты каналов готовы к записи на диск как есть: последовательность
/// пар I/Q в little-endian.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleBlock {
    /// Монотонный номер блока в рамках сессии
    pub index: u64,
    /// Выборки первого канала
    pub rx1: Vec<u8>,
    /// Выборки второго канала
    pub rx2: Vec<u8>,
}

impl SampleBlock {
    pub fn new(index: u64, rx1: Vec<u8>, rx2: Vec<u8>) -> Self {
        Self { index, rx1, rx2 }
    }

    /// Собирает блок из деинтерливленного буфера: сначала `samples_count`
    /// выборок первого канала, затем столько же второго. Первые `settling`
    /// выборок каждого канала отбрасываются.
    pub fn from_deinterleaved(
        index: u64,
        samples: &[i16],
        samples_count: usize,
        settling: usize,
    ) -> SampleBlock {
        let channel = |start: usize| -> Vec<u8> {
            samples[start + settling * 2..start + samples_count * 2]
                .iter()
                .flat_map(|sample| sample.to_le_bytes())
                .collect()
        };

        SampleBlock {
            index,
            rx1: channel(0),
            rx2: channel(samples_count * 2),
        }
    }

    /// Собирает блок из интерливленного двухканального буфера, где выборки
    /// каналов чередуются попарно: I1 Q1 I2 Q2.
    pub fn from_interleaved(
        index: u64,
        samples: &[i16],
        samples_count: usize,
        settling: usize,
    ) -> SampleBlock {
        let payload = (samples_count - settling) * SAMPLE_SIZE_BYTES;
        let mut rx1 = Vec::with_capacity(payload);
        let mut rx2 = Vec::with_capacity(payload);

        for pair in settling..samples_count {
            let base = pair * 4;
            rx1.extend_from_slice(&samples[base].to_le_bytes());
            rx1.extend_from_slice(&samples[base + 1].to_le_bytes());
            rx2.extend_from_slice(&samples[base + 2].to_le_bytes());
            rx2.extend_from_slice(&samples[base + 3].to_le_bytes());
        }

        SampleBlock { index, rx1, rx2 }
    }

    /// Блок валиден: каналы непустые и одинаковой длины.
    pub fn valid(&self) -> bool {
        !self.rx1.is_empty() && self.rx1.len() == self.rx2.len()
    }

    /// Комплексных выборок в одном канале.
    pub fn samples_count(&self) -> usize {
        self.rx1.len() / SAMPLE_SIZE_BYTES
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_length_math() {
        let samples_count = 100;
        let settling = 10;
        let raw: Vec<i16> = (0..samples_count as i16 * 4).collect();
        let block = SampleBlock::from_deinterleaved(0, &raw, samples_count, settling);

        assert_eq!(block.rx1.len(), (samples_count - settling) * SAMPLE_SIZE_BYTES);
        assert_eq!(block.rx1.len(), block.rx2.len());
        assert_eq!(block.samples_count(), samples_count - settling);
    }

    #[test]
    fn test_deinterleaved_split() {
        // Первый канал: 1 2 3 4, второй: 5 6 7 8.
        let raw: Vec<i16> = vec![1, 2, 3, 4, 5, 6, 7, 8];
        let block = SampleBlock::from_deinterleaved(7, &raw, 2, 0);

        assert_eq!(block.index, 7);
        assert_eq!(block.rx1, vec![1, 0, 2, 0, 3, 0, 4, 0]);
        assert_eq!(block.rx2, vec![5, 0, 6, 0, 7, 0, 8, 0]);
    }

    #[test]
    fn test_deinterleaved_drops_settling() {
        let raw: Vec<i16> = vec![1, 2, 3, 4, 5, 6, 7, 8];
        let block = SampleBlock::from_deinterleaved(0, &raw, 2, 1);

        assert_eq!(block.rx1, vec![3, 0, 4, 0]);
        assert_eq!(block.rx2, vec![7, 0, 8, 0]);
    }

    #[test]
    fn test_interleaved_split() {
        // Пары каналов чередуются: (1,2) каналу 1, (3,4) каналу 2.
        let raw: Vec<i16> = vec![1, 2, 3, 4, 11, 12, 13, 14];
        let block = SampleBlock::from_interleaved(0, &raw, 2, 0);

        assert_eq!(block.rx1, vec![1, 0, 2, 0, 11, 0, 12, 0]);
        assert_eq!(block.rx2, vec![3, 0, 4, 0, 13, 0, 14, 0]);
        assert!(block.valid());
    }

    #[test]
    fn test_interleaved_drops_settling() {
        let raw: Vec<i16> = vec![1, 2, 3, 4, 11, 12, 13, 14];
        let block = SampleBlock::from_interleaved(0, &raw, 2, 1);

        assert_eq!(block.rx1, vec![11, 0, 12, 0]);
        assert_eq!(block.rx2, vec![13, 0, 14, 0]);
    }

    #[test]
    fn test_empty_block_invalid() {
        let block = SampleBlock::new(0, Vec::new(), Vec::new());
        assert!(!block.valid());

        let uneven = SampleBlock::new(0, vec![1, 2, 3, 4], vec![1, 2]);
        assert!(!uneven.valid());
    }
}
