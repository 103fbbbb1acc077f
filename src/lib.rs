//! Temporal interval store: records how numbered attributes change value over
//! time and answers point, full-state and two-dimensional queries.
//!
//! ```rust
//! use stratum::{BackendBuilder, StateValue};
//!
//! let mut history = BackendBuilder::new("kernel").start_time(0).build()?;
//! history.insert_past_state(0, 10, 0, StateValue::from("A"))?;
//! history.insert_past_state(11, 20, 0, StateValue::from("B"))?;
//! history.finished_building(20)?;
//!
//! let interval = history.do_singular_query(15, 0)?;
//! assert_eq!(interval.value().unbox_str()?, "B");
//! # Ok::<(), stratum::StratumError>(())
//! ```

pub mod backend;
pub mod builder;
pub mod condition;
pub mod config;
pub mod error;
pub mod segment;

pub use backend::factory::{
    new_history_tree_backend, new_in_memory_backend, new_null_backend,
    new_threaded_history_tree_backend, open_history_tree_backend,
};
pub use backend::{
    HistoryTreeBackend, InMemoryBackend, NullBackend, StateHistoryBackend,
    ThreadedHistoryTreeBackend,
};
pub use builder::BackendBuilder;
pub use condition::{QuarkRange, TimeRange};
pub use config::{BackendKind, Config, SegmentStoreKind};
pub use error::{Result, StratumError};
pub use segment::{
    ArrayListStore, DiskSegment, HistoryTreeSegmentStore, LazyArrayListStore, SegmentOrder,
    SegmentStore, SnapshotIter, create_on_disk_segment_store, create_segment_store,
    open_on_disk_segment_store,
};

pub use stratum_types::{
    BasicSegment, NULL_STRING, NULL_VALUE, Quark, Segment, StateInterval, StateValue,
    StateValueType, StateValueTypeError,
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports
pub mod prelude {

    pub use crate::{BackendBuilder, Config, Result, StratumError};

    pub use crate::{BackendKind, SegmentStoreKind};

    pub use crate::{QuarkRange, StateHistoryBackend, TimeRange};

    pub use crate::{SegmentStore, create_segment_store};

    pub use stratum_types::{BasicSegment, Quark, Segment, StateInterval, StateValue};
}
