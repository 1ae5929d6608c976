use crate::error::VisError;
use crate::vecmath::Vec3;
use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Particle positions of one simulation output.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Simulation time in internal units (1 unit = 0.98 Gyr).
    pub time: f64,
    /// Particle positions in kpc, one entry per particle.
    pub positions: Vec<Vec3>,
}

/// Store-wide attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreHeader {
    /// Particles per snapshot (`N`).
    pub particle_count: usize,
    /// Snapshots in the store (`NSnapshots`).
    pub snapshot_count: usize,
}

/// Read-only, randomly indexable collection of snapshots.
pub trait SnapshotStore {
    fn header(&self) -> StoreHeader;

    /// Reads snapshot `index` (0-based).
    fn read(&mut self, index: usize) -> Result<Snapshot>;
}

fn check_index(header: &StoreHeader, index: usize) -> Result<()> {
    if index >= header.snapshot_count {
        return Err(VisError::schema(format!(
            "snapshot {:04} requested but the store holds {} snapshots",
            index, header.snapshot_count
        ))
        .into());
    }
    Ok(())
}

/// Opens a store, choosing the backend from the file extension.
///
/// `.h5`, `.hdf5` and `.hdf` files are read as HDF5 (requires the `hdf5`
/// feature); everything else is read as a bincode store.
pub fn open_store<P: AsRef<Path>>(path: P) -> Result<Box<dyn SnapshotStore>> {
    let path = path.as_ref();
    if is_hdf5_path(path) {
        return open_hdf5(path);
    }
    Ok(Box::new(BincodeStore::open(path)?))
}

fn is_hdf5_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_ascii_lowercase().as_str(), "h5" | "hdf5" | "hdf"))
        .unwrap_or(false)
}

#[cfg(feature = "hdf5")]
fn open_hdf5(path: &Path) -> Result<Box<dyn SnapshotStore>> {
    Ok(Box::new(hdf5_store::Hdf5Store::open(path)?))
}

#[cfg(not(feature = "hdf5"))]
fn open_hdf5(path: &Path) -> Result<Box<dyn SnapshotStore>> {
    if !path.exists() {
        return Err(VisError::StoreNotFound(path.to_path_buf()).into());
    }
    Err(VisError::config(format!(
        "{} is an HDF5 store but this build has no HDF5 support; rebuild with `--features hdf5`",
        path.display()
    ))
    .into())
}

// --- bincode store ---------------------------------------------------------
//
// Layout: header { particle_count: u64, snapshot_count: u64 } followed by
// snapshot_count records { time: f64, positions: Vec<[f32; 3]> }, all with
// bincode's default fixed-width little-endian encoding. Every record holds
// exactly particle_count positions, so records have a fixed size and can be
// read by seeking.

#[derive(Serialize, Deserialize)]
struct HeaderRecord {
    particle_count: u64,
    snapshot_count: u64,
}

#[derive(Serialize, Deserialize)]
struct SnapshotRecord {
    time: f64,
    positions: Vec<[f32; 3]>,
}

const HEADER_LEN: u64 = 16;

/// Record size in bytes, or `None` if it does not fit in a `u64`.
fn record_len(particle_count: u64) -> Option<u64> {
    // time + vec length prefix + xyz per particle
    particle_count.checked_mul(12)?.checked_add(8 + 8)
}

/// Snapshot store backed by a single bincode file.
pub struct BincodeStore {
    path: PathBuf,
    reader: BufReader<File>,
    header: StoreHeader,
    record_len: u64,
}

impl BincodeStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(VisError::StoreNotFound(path).into());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to open snapshot store {}", path.display()));
            }
        };
        let file_len = file
            .metadata()
            .with_context(|| format!("Failed to stat snapshot store {}", path.display()))?
            .len();
        let mut reader = BufReader::new(file);

        let raw: HeaderRecord = bincode::deserialize_from(&mut reader)
            .map_err(|e| VisError::schema(format!("{}: cannot read header: {}", path.display(), e)))?;
        let sizes = record_len(raw.particle_count).and_then(|record_len| {
            let expected = record_len.checked_mul(raw.snapshot_count)?.checked_add(HEADER_LEN)?;
            Some((record_len, expected))
        });
        let (Some((record_len, expected)), Ok(particle_count), Ok(snapshot_count)) = (
            sizes,
            usize::try_from(raw.particle_count),
            usize::try_from(raw.snapshot_count),
        ) else {
            return Err(VisError::schema(format!(
                "{}: header declares {} snapshots of {} particles, which overflows the store size",
                path.display(),
                raw.snapshot_count,
                raw.particle_count
            ))
            .into());
        };
        let header = StoreHeader { particle_count, snapshot_count };
        if file_len < expected {
            return Err(VisError::schema(format!(
                "{}: header declares {} snapshots of {} particles ({} bytes) but the file has {} bytes",
                path.display(),
                header.snapshot_count,
                header.particle_count,
                expected,
                file_len
            ))
            .into());
        }

        debug!(
            "Opened bincode store {} (N={}, NSnapshots={})",
            path.display(),
            header.particle_count,
            header.snapshot_count
        );
        Ok(BincodeStore { path, reader, header, record_len })
    }
}

impl SnapshotStore for BincodeStore {
    fn header(&self) -> StoreHeader {
        self.header
    }

    fn read(&mut self, index: usize) -> Result<Snapshot> {
        check_index(&self.header, index)?;
        let offset = HEADER_LEN + self.record_len * index as u64;
        self.reader
            .seek(SeekFrom::Start(offset))
            .with_context(|| format!("Failed to seek to snapshot {:04}", index))?;

        let mut buf = vec![0u8; self.record_len as usize];
        self.reader
            .read_exact(&mut buf)
            .with_context(|| format!("Failed to read snapshot {:04} from {}", index, self.path.display()))?;
        let record: SnapshotRecord = bincode::deserialize(&buf)
            .map_err(|e| VisError::schema(format!("snapshot {:04}: {}", index, e)))?;

        if record.positions.len() != self.header.particle_count {
            return Err(VisError::schema(format!(
                "snapshot {:04} has {} positions, header says N={}",
                index,
                record.positions.len(),
                self.header.particle_count
            ))
            .into());
        }

        Ok(Snapshot {
            time: record.time,
            positions: record.positions.into_iter().map(Vec3::from).collect(),
        })
    }
}

/// Writes a bincode store snapshot by snapshot.
pub struct BincodeStoreWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    header: StoreHeader,
    written: usize,
}

impl BincodeStoreWriter {
    pub fn create<P: AsRef<Path>>(path: P, particle_count: usize, snapshot_count: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)
            .with_context(|| format!("Failed to create snapshot store {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        let raw = HeaderRecord {
            particle_count: particle_count as u64,
            snapshot_count: snapshot_count as u64,
        };
        bincode::serialize_into(&mut writer, &raw).context("Failed to write store header")?;
        Ok(BincodeStoreWriter {
            path,
            writer,
            header: StoreHeader { particle_count, snapshot_count },
            written: 0,
        })
    }

    pub fn append(&mut self, time: f64, positions: &[Vec3]) -> Result<()> {
        if self.written >= self.header.snapshot_count {
            return Err(VisError::schema(format!(
                "store was declared with {} snapshots",
                self.header.snapshot_count
            ))
            .into());
        }
        if positions.len() != self.header.particle_count {
            return Err(VisError::schema(format!(
                "snapshot has {} positions, store was declared with N={}",
                positions.len(),
                self.header.particle_count
            ))
            .into());
        }
        let record = SnapshotRecord {
            time,
            positions: positions.iter().map(|p| p.to_array()).collect(),
        };
        bincode::serialize_into(&mut self.writer, &record)
            .with_context(|| format!("Failed to write snapshot {:04}", self.written))?;
        self.written += 1;
        Ok(())
    }

    /// Flushes the file; fails if fewer snapshots were written than declared.
    pub fn finish(mut self) -> Result<()> {
        if self.written != self.header.snapshot_count {
            return Err(VisError::schema(format!(
                "{} snapshots written, {} declared",
                self.written, self.header.snapshot_count
            ))
            .into());
        }
        self.writer
            .flush()
            .with_context(|| format!("Failed to flush {}", self.path.display()))?;
        info!(
            "Wrote {} snapshots of {} particles to {}",
            self.written,
            self.header.particle_count,
            self.path.display()
        );
        Ok(())
    }
}

/// Writes `snapshots` as a bincode store. All snapshots must have the same particle count.
pub fn write_bincode_store<P: AsRef<Path>>(path: P, snapshots: &[Snapshot]) -> Result<()> {
    let particle_count = snapshots.first().map_or(0, |s| s.positions.len());
    let mut writer = BincodeStoreWriter::create(path, particle_count, snapshots.len())?;
    for snapshot in snapshots {
        writer.append(snapshot.time, &snapshot.positions)?;
    }
    writer.finish()
}

// --- in-memory store -------------------------------------------------------

/// Snapshots held in memory.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    header: StoreHeader,
    snapshots: Vec<Snapshot>,
}

impl MemoryStore {
    pub fn new(snapshots: Vec<Snapshot>) -> Result<Self> {
        let particle_count = snapshots.first().map_or(0, |s| s.positions.len());
        if let Some((i, s)) = snapshots
            .iter()
            .enumerate()
            .find(|(_, s)| s.positions.len() != particle_count)
        {
            return Err(VisError::schema(format!(
                "snapshot {:04} has {} positions, expected {}",
                i,
                s.positions.len(),
                particle_count
            ))
            .into());
        }
        Ok(MemoryStore {
            header: StoreHeader { particle_count, snapshot_count: snapshots.len() },
            snapshots,
        })
    }
}

impl SnapshotStore for MemoryStore {
    fn header(&self) -> StoreHeader {
        self.header
    }

    fn read(&mut self, index: usize) -> Result<Snapshot> {
        check_index(&self.header, index)?;
        Ok(self.snapshots[index].clone())
    }
}

// --- HDF5 store ------------------------------------------------------------

#[cfg(feature = "hdf5")]
pub use hdf5_store::Hdf5Store;

#[cfg(feature = "hdf5")]
mod hdf5_store {
    use super::{check_index, Snapshot, SnapshotStore, StoreHeader};
    use crate::error::VisError;
    use crate::vecmath::Vec3;
    use anyhow::Result;
    use log::debug;
    use std::path::Path;

    /// `Header` group with attributes `N` and `NSnapshots`; one group per
    /// snapshot named `0000`, `0001`, ... with attribute `Time` and an
    /// (N, 3) dataset `Positions`.
    pub struct Hdf5Store {
        file: hdf5::File,
        header: StoreHeader,
    }

    fn schema_err(what: String, e: hdf5::Error) -> anyhow::Error {
        VisError::schema(format!("{}: {}", what, e)).into()
    }

    fn read_count(group: &hdf5::Group, name: &str) -> Result<usize> {
        let value: i64 = group
            .attr(name)
            .and_then(|a| a.read_scalar::<i64>())
            .map_err(|e| schema_err(format!("Header attribute {}", name), e))?;
        usize::try_from(value)
            .map_err(|_| VisError::schema(format!("Header attribute {} is negative ({})", name, value)).into())
    }

    impl Hdf5Store {
        pub fn open(path: &Path) -> Result<Self> {
            if !path.exists() {
                return Err(VisError::StoreNotFound(path.to_path_buf()).into());
            }
            let file = hdf5::File::open(path).map_err(|e| schema_err(path.display().to_string(), e))?;
            let group = file
                .group("Header")
                .map_err(|e| schema_err("Header group".to_string(), e))?;
            let header = StoreHeader {
                particle_count: read_count(&group, "N")?,
                snapshot_count: read_count(&group, "NSnapshots")?,
            };
            debug!(
                "Opened HDF5 store {} (N={}, NSnapshots={})",
                path.display(),
                header.particle_count,
                header.snapshot_count
            );
            Ok(Hdf5Store { file, header })
        }
    }

    impl SnapshotStore for Hdf5Store {
        fn header(&self) -> StoreHeader {
            self.header
        }

        fn read(&mut self, index: usize) -> Result<Snapshot> {
            check_index(&self.header, index)?;
            let name = format!("{:04}", index);
            let group = self.file.group(&name).map_err(|e| schema_err(format!("group {}", name), e))?;
            let time: f64 = group
                .attr("Time")
                .and_then(|a| a.read_scalar::<f64>())
                .map_err(|e| schema_err(format!("{}/Time", name), e))?;
            let dataset = group
                .dataset("Positions")
                .map_err(|e| schema_err(format!("{}/Positions", name), e))?;
            let shape = dataset.shape();
            if shape != [self.header.particle_count, 3] {
                return Err(VisError::schema(format!(
                    "{}/Positions has shape {:?}, expected [{}, 3]",
                    name, shape, self.header.particle_count
                ))
                .into());
            }
            let raw: Vec<f32> = dataset
                .read_raw::<f32>()
                .map_err(|e| schema_err(format!("{}/Positions", name), e))?;
            let positions = raw.chunks_exact(3).map(|c| Vec3::new(c[0], c[1], c[2])).collect();
            Ok(Snapshot { time, positions })
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn reads_header_and_snapshots() {
            let path = std::env::temp_dir().join(format!("nbody-common-hdf5-{}.h5", std::process::id()));
            {
                let file = hdf5::File::create(&path).unwrap();
                let header = file.create_group("Header").unwrap();
                header.new_attr::<i64>().create("N").unwrap().write_scalar(&2i64).unwrap();
                header.new_attr::<i64>().create("NSnapshots").unwrap().write_scalar(&1i64).unwrap();
                let snap = file.create_group("0000").unwrap();
                snap.new_attr::<f64>().create("Time").unwrap().write_scalar(&0.5f64).unwrap();
                let flat: Vec<f32> = vec![1.0, 2.0, 3.0, -1.0, -2.0, -3.0];
                snap.new_dataset::<f32>()
                    .shape((2, 3))
                    .create("Positions")
                    .unwrap()
                    .write_raw(flat.as_slice())
                    .unwrap();
            }
            let mut store = Hdf5Store::open(&path).unwrap();
            assert_eq!(store.header(), StoreHeader { particle_count: 2, snapshot_count: 1 });
            let snap = store.read(0).unwrap();
            assert_eq!(snap.time, 0.5);
            assert_eq!(snap.positions[1], Vec3::new(-1.0, -2.0, -3.0));
            std::fs::remove_file(&path).ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("nbody-common-{}-{}", std::process::id(), name))
    }

    fn sample(n: usize, m: usize) -> Vec<Snapshot> {
        (0..m)
            .map(|i| Snapshot {
                time: i as f64 * 0.25,
                positions: (0..n)
                    .map(|j| Vec3::new(j as f32, i as f32, -(j as f32)))
                    .collect(),
            })
            .collect()
    }

    fn kind(err: &anyhow::Error) -> Option<&VisError> {
        err.downcast_ref::<VisError>()
    }

    #[test]
    fn bincode_store_random_access() {
        let path = scratch("random.bin");
        let snapshots = sample(4, 3);
        write_bincode_store(&path, &snapshots).unwrap();

        let mut store = open_store(&path).unwrap();
        assert_eq!(store.header(), StoreHeader { particle_count: 4, snapshot_count: 3 });
        // out of order on purpose
        assert_eq!(store.read(2).unwrap(), snapshots[2]);
        assert_eq!(store.read(0).unwrap(), snapshots[0]);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn index_past_the_end_is_a_schema_error() {
        let path = scratch("past-end.bin");
        write_bincode_store(&path, &sample(2, 1)).unwrap();
        let mut store = BincodeStore::open(&path).unwrap();
        let err = store.read(1).unwrap_err();
        assert!(matches!(kind(&err), Some(VisError::Schema(_))));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_store_is_not_found() {
        let err = open_store(scratch("does-not-exist.bin")).err().unwrap();
        assert!(matches!(kind(&err), Some(VisError::StoreNotFound(_))));
    }

    #[test]
    fn truncated_store_is_a_schema_error() {
        let path = scratch("truncated.bin");
        write_bincode_store(&path, &sample(5, 2)).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 7]).unwrap();
        let err = BincodeStore::open(&path).err().unwrap();
        assert!(matches!(kind(&err), Some(VisError::Schema(_))));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn oversized_header_is_a_schema_error() {
        let path = scratch("oversized.bin");
        let mut bytes = (u64::MAX / 8).to_le_bytes().to_vec();
        bytes.extend_from_slice(&4u64.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();
        let err = BincodeStore::open(&path).err().unwrap();
        assert!(matches!(kind(&err), Some(VisError::Schema(msg)) if msg.contains("overflows")));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn garbage_header_is_a_schema_error() {
        let path = scratch("garbage.bin");
        std::fs::write(&path, b"abc").unwrap();
        let err = BincodeStore::open(&path).err().unwrap();
        assert!(matches!(kind(&err), Some(VisError::Schema(_))));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn writer_rejects_wrong_particle_count() {
        let path = scratch("wrong-n.bin");
        let mut writer = BincodeStoreWriter::create(&path, 3, 1).unwrap();
        let err = writer.append(0.0, &[Vec3::new(0.0, 0.0, 0.0)]).unwrap_err();
        assert!(matches!(kind(&err), Some(VisError::Schema(_))));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn memory_store_requires_uniform_particle_count() {
        let mut snapshots = sample(3, 2);
        snapshots[1].positions.pop();
        assert!(MemoryStore::new(snapshots).is_err());

        let mut store = MemoryStore::new(sample(3, 2)).unwrap();
        assert_eq!(store.header().snapshot_count, 2);
        assert_eq!(store.read(1).unwrap().time, 0.25);
    }

    #[cfg(not(feature = "hdf5"))]
    #[test]
    fn hdf5_without_feature_is_rejected() {
        let path = scratch("store.h5");
        std::fs::write(&path, b"\x89HDF\r\n\x1a\n").unwrap();
        let err = open_store(&path).err().unwrap();
        assert!(matches!(kind(&err), Some(VisError::InvalidConfig(msg)) if msg.contains("--features hdf5")));
        std::fs::remove_file(&path).ok();
    }
}
