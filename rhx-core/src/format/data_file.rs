use std::{
    fs::File,
    io::{BufReader, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
};

use byteorder::{ByteOrder, LittleEndian};
use rhx_types::{ChannelDescriptor, SignalType};

/// Файл данных из равных элементов (одна выборка = `element_size` байт).
///
/// Длина перемеряется по запросу: файл может дописываться другим процессом.
#[derive(Debug)]
pub struct DataFile {
    path: PathBuf,
    reader: BufReader<File>,
    element_size: usize,
    samples: u64,
    position: u64,
    scratch: Vec<u8>,
}

impl DataFile {
    pub fn open<P: AsRef<Path>>(
        path: P,
        element_size: usize,
    ) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let element_size = element_size.max(1);

        let mut f = Self {
            path,
            reader: BufReader::new(file),
            element_size,
            samples: 0,
            position: 0,
            scratch: vec![0; element_size],
        };

        f.measure()?;
        Ok(f)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Имя файла без каталога (для сообщений).
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn element_size(&self) -> usize {
        self.element_size
    }

    /// Полных выборок на момент последнего измерения.
    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Перемеряет длину файла. Неполный хвостовой элемент не учитывается.
    pub fn measure(&mut self) -> std::io::Result<u64> {
        let len = self.reader.get_ref().metadata()?.len();
        self.samples = len / self.element_size as u64;

        Ok(self.samples)
    }

    pub fn seek_sample(
        &mut self,
        index: u64,
    ) -> std::io::Result<()> {
        if index != self.position {
            self.reader
                .seek(SeekFrom::Start(index * self.element_size as u64))?;
            self.position = index;
        }

        Ok(())
    }

    /// Читает очередной элемент, возвращает его байты.
    pub fn read_element(&mut self) -> std::io::Result<&[u8]> {
        self.reader.read_exact(&mut self.scratch)?;
        self.position += 1;

        Ok(&self.scratch)
    }

    /// Читает элемент как `N` слов `u16`.
    pub fn read_u16s(
        &mut self,
        out: &mut [u16],
    ) -> std::io::Result<()> {
        let raw = self.read_element()?;
        LittleEndian::read_u16_into(&raw[..out.len() * 2], out);

        Ok(())
    }

    pub fn read_u16(&mut self) -> std::io::Result<u16> {
        let raw = self.read_element()?;
        Ok(LittleEndian::read_u16(raw))
    }

    pub fn read_i32(&mut self) -> std::io::Result<i32> {
        let raw = self.read_element()?;
        Ok(LittleEndian::read_i32(raw))
    }

    /// Читает элемент с указанным номером, не меняя логики последовательного
    /// чтения (курсор переходит за прочитанный элемент).
    pub fn read_i32_at(
        &mut self,
        index: u64,
    ) -> std::io::Result<i32> {
        self.seek_sample(index)?;
        self.read_i32()
    }
}

/// Слот канала в плоской арене файлов.
#[derive(Debug, Clone)]
pub struct ChannelSlot {
    pub signal: SignalType,
    pub channel: ChannelDescriptor,
    /// Индекс файла в арене; `None` если файл отсутствует
    pub file: Option<usize>,
}

/// Плоская арена открытых файлов с индексом каналов.
#[derive(Debug, Default)]
pub struct FileArena {
    files: Vec<DataFile>,
    slots: Vec<ChannelSlot>,
}

impl FileArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Регистрирует канал. Файл (если есть) переходит во владение арены.
    pub fn insert(
        &mut self,
        signal: SignalType,
        channel: ChannelDescriptor,
        file: Option<DataFile>,
    ) {
        let file = file.map(|f| {
            self.files.push(f);
            self.files.len() - 1
        });

        self.slots.push(ChannelSlot {
            signal,
            channel,
            file,
        });
    }

    pub fn slots(&self) -> &[ChannelSlot] {
        &self.slots
    }

    pub fn files(&self) -> &[DataFile] {
        &self.files
    }

    pub fn files_mut(&mut self) -> &mut [DataFile] {
        &mut self.files
    }

    /// Слоты и файлы одновременно (чтение слотов, запись в файлы).
    pub fn parts_mut(&mut self) -> (&[ChannelSlot], &mut [DataFile]) {
        (&self.slots, &mut self.files)
    }

    pub fn file_mut(
        &mut self,
        index: usize,
    ) -> Option<&mut DataFile> {
        self.files.get_mut(index)
    }

    /// Самый короткий файл: `(индекс, выборок)`.
    pub fn shortest(&self) -> Option<(usize, u64)> {
        self.files
            .iter()
            .enumerate()
            .map(|(i, f)| (i, f.samples()))
            .min_by_key(|&(_, n)| n)
    }

    pub fn longest_samples(&self) -> u64 {
        self.files.iter().map(|f| f.samples()).max().unwrap_or(0)
    }

    pub fn measure_all(&mut self) -> std::io::Result<()> {
        for f in &mut self.files {
            f.measure()?;
        }

        Ok(())
    }

    pub fn seek_all(
        &mut self,
        index: u64,
    ) -> std::io::Result<()> {
        for f in &mut self.files {
            f.seek_sample(index)?;
        }

        Ok(())
    }
}
