//! Undertow Sim - In-process transfer engine for development and testing
//!
//! Implements the engine traits from `undertow-core` over an in-memory
//! catalog. Content can be registered by hand or scanned from a local
//! media directory, so the full HTTP surface can be exercised without
//! touching the network.

pub mod content;
pub mod engine;
pub mod library;

pub use content::{ContentBehavior, FileSource, SimulatedContent, SimulatedFile, StreamFault};
pub use engine::{EngineCounters, SimulatedEngine, SimulatedTransfer};
pub use library::{identifier_for_path, scan_library};
