//! Append only record files: bincode encoded values written back to back.

use bincode::config::standard;
use bincode::error::DecodeError;
use bincode::{decode_from_slice, encode_into_std_write, Decode, Encode};
use robosim_traits::{SimError, SimResult, WriteStream};
use std::fmt::{Debug, Formatter};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub struct FileStream {
    path: PathBuf,
    writer: BufWriter<File>,
    written: usize,
}

impl Debug for FileStream {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "FileStream {{ path: {}, written: {} }}",
            self.path.display(),
            self.written
        )
    }
}

impl FileStream {
    pub fn create(path: &Path) -> SimResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                SimError::io(format!("cannot open record file {}", path.display())).with_cause(e)
            })?;
        Ok(FileStream {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            written: 0,
        })
    }

    /// Bytes written through this stream.
    pub fn written(&self) -> usize {
        self.written
    }
}

impl<E: Encode> WriteStream<E> for FileStream {
    fn log(&mut self, obj: &E) -> SimResult<()> {
        let nb_bytes = encode_into_std_write(obj, &mut self.writer, standard()).map_err(|e| {
            SimError::io(format!("cannot record into {}", self.path.display())).with_cause(e)
        })?;
        self.written += nb_bytes;
        Ok(())
    }

    fn flush(&mut self) -> SimResult<()> {
        self.writer.flush().map_err(|e| {
            SimError::io(format!("cannot flush {}", self.path.display())).with_cause(e)
        })
    }
}

impl Drop for FileStream {
    fn drop(&mut self) {
        if let Err(e) = self.writer.flush() {
            log::error!("FileStream::drop: cannot flush {}: {}", self.path.display(), e);
        }
    }
}

/// Create a new stream appending bincode encoded values to `path`.
pub fn stream_file_write<E: Encode>(path: &Path) -> SimResult<impl WriteStream<E>> {
    FileStream::create(path)
}

/// Reads back every value recorded in `path`.
pub fn read_stream<E: Decode<()>>(path: &Path) -> SimResult<Vec<E>> {
    let bytes = std::fs::read(path).map_err(|e| {
        SimError::io(format!("cannot read record file {}", path.display())).with_cause(e)
    })?;
    let mut values = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        let (value, used): (E, usize) = decode_from_slice(&bytes[offset..], standard())
            .map_err(|e: DecodeError| {
                SimError::io(format!(
                    "corrupted record in {} at byte {}",
                    path.display(),
                    offset
                ))
                .with_cause(e)
            })?;
        values.push(value);
        offset += used;
    }
    Ok(values)
}
