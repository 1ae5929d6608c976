pub mod config;
pub mod error;
pub mod snapshot;
pub mod vecmath;

// Re-export key types for easier use by dependent crates
pub use config::{AxisLimits, FigureConfig, FramesConfig, RenderConfig, VideoConfig};
pub use error::{ErrorKind, VisError};
pub use snapshot::{
    open_store, write_bincode_store, BincodeStore, BincodeStoreWriter, MemoryStore, Snapshot, SnapshotStore,
    StoreHeader,
};
#[cfg(feature = "hdf5")]
pub use snapshot::Hdf5Store;
pub use vecmath::{project_all, Plane, Vec3};
