//! # Econ Index Workspace
//!
//! Umbrella crate for the monthly index pipeline.
//!
//! ```
//! use econ_index_workspace::math::Month;
//!
//! let anchor: Month = "2024M12".parse().unwrap();
//! assert_eq!(anchor.succ().to_string(), "2025-01");
//! ```

pub use index_forecast as forecast;
pub use index_jobs as jobs;
pub use index_math as math;
