//! # stratum-types
//!
//! Core data types for the Stratum temporal interval store.
//!
//! - **Values**: [`StateValue`], a tagged null/int/long/double/string payload
//! - **Intervals**: [`StateInterval`], the value of one attribute over one time span
//! - **Segments**: the [`Segment`] trait, [`BasicSegment`] and segment orderings
//!
//! All types are serializable with Serde.
//!
//! ## Examples
//!
//! ```rust
//! use stratum_types::{StateInterval, StateValue};
//!
//! let interval = StateInterval::new(100, 200, 0, StateValue::from(1));
//! assert_eq!(interval.value().unbox_int().unwrap(), 1);
//! ```

pub mod interval;
pub mod segment;
pub mod value;

pub use interval::{Quark, StateInterval};
pub use segment::{BasicSegment, Segment};
pub use value::{NULL_STRING, NULL_VALUE, StateValue, StateValueType, StateValueTypeError};
