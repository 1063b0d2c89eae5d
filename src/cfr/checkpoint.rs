//! Binary checkpoints of [`TrainingData`].
//!
//! Layout, all big-endian:
//!
//! ```text
//! u64                 iteration counter
//! f64 x players       utility sums
//! for each (round, player, chance, index) in canonical order:
//!     f64 x A         regrets
//!     f64 x A         strategy sums
//! ```
//!
//! The stream carries no shape metadata; the tree the table was built from
//! determines every length.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{ReadBytesExt, WriteBytesExt, BE};

use crate::cfr::error::PersistenceError;
use crate::cfr::storage::TrainingData;

impl TrainingData {
    /// Size in bytes of a checkpoint for this table.
    pub fn checkpoint_len(&self) -> usize {
        8 * (1 + self.players() + self.num_values())
    }

    /// Serialize counters and every entry.
    pub fn save(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.checkpoint_len());
        self.write_to(&mut bytes)
            .unwrap_or_else(|_| unreachable!("writing to a Vec cannot fail"));
        bytes
    }

    /// Stream counters and every entry to `writer`.
    pub fn write_to<W: Write>(&self, mut writer: W) -> io::Result<()> {
        let snapshot = self.snapshot();
        writer.write_u64::<BE>(snapshot.iterations)?;
        for &u in &snapshot.utility_sums {
            writer.write_f64::<BE>(u)?;
        }
        for &v in self.values() {
            writer.write_f64::<BE>(v)?;
        }
        writer.flush()
    }

    /// Replace counters and entries with a checkpoint produced by [`save`](Self::save).
    ///
    /// The table is untouched unless the whole checkpoint parses.
    pub fn load(&mut self, bytes: &[u8]) -> Result<(), PersistenceError> {
        let expected = self.checkpoint_len();
        if bytes.len() < expected {
            return Err(PersistenceError::Truncated {
                expected,
                actual: bytes.len(),
            });
        }
        if bytes.len() > expected {
            return Err(PersistenceError::TrailingBytes(bytes.len() - expected));
        }
        self.read_from(bytes)
    }

    /// Read a checkpoint from `reader`; trailing data is an error.
    pub fn read_from<R: Read>(&mut self, mut reader: R) -> Result<(), PersistenceError> {
        let expected = self.checkpoint_len();
        let truncated = |read: usize| PersistenceError::Truncated {
            expected,
            actual: read,
        };
        let mut read = 0;
        let iterations = reader.read_u64::<BE>().map_err(|_| truncated(read))?;
        read += 8;
        let mut utility = vec![0.0; self.players()];
        for u in utility.iter_mut() {
            *u = reader.read_f64::<BE>().map_err(|_| truncated(read))?;
            read += 8;
        }
        let mut values = vec![0.0; self.num_values()];
        for v in values.iter_mut() {
            *v = reader.read_f64::<BE>().map_err(|_| truncated(read))?;
            read += 8;
        }
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest)?;
        if !rest.is_empty() {
            return Err(PersistenceError::TrailingBytes(rest.len()));
        }
        self.restore(iterations, &utility, &values);
        Ok(())
    }

    /// Write a checkpoint file, replacing any previous one atomically.
    ///
    /// The data goes to a sibling temporary file that is synced and then
    /// renamed over `path`, so a failed save never leaves a partial file.
    pub fn save_to_path(&self, path: impl AsRef<Path>) -> Result<(), PersistenceError> {
        let path = path.as_ref();
        let staging = staging_path(path);
        let written = File::create(&staging).and_then(|file| {
            let mut writer = BufWriter::new(file);
            self.write_to(&mut writer)?;
            let file = writer.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()
        });
        if let Err(e) = written.and_then(|_| fs::rename(&staging, path)) {
            let _ = fs::remove_file(&staging);
            return Err(e.into());
        }
        log::info!("{:<32}{}", "saved checkpoint", path.display());
        Ok(())
    }

    /// Load a checkpoint file written by [`save_to_path`](Self::save_to_path).
    pub fn load_from_path(&mut self, path: impl AsRef<Path>) -> Result<(), PersistenceError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let actual = file.metadata()?.len() as usize;
        let expected = self.checkpoint_len();
        if actual < expected {
            return Err(PersistenceError::Truncated { expected, actual });
        }
        if actual > expected {
            return Err(PersistenceError::TrailingBytes(actual - expected));
        }
        self.read_from(BufReader::new(file))?;
        log::info!("{:<32}{}", "loaded checkpoint", path.display());
        Ok(())
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}
