//! Catalog entries describing content the simulated swarm can deliver.

use std::io;
use std::path::PathBuf;

use bytes::Bytes;
use undertow_core::ContentId;

/// Where a simulated file's bytes come from.
#[derive(Debug, Clone)]
pub enum FileSource {
    /// Bytes held in memory
    Memory(Bytes),
    /// A file on local disk with a known length
    Disk { path: PathBuf, length: u64 },
}

impl FileSource {
    /// Total length of the file in bytes.
    pub fn length(&self) -> u64 {
        match self {
            FileSource::Memory(data) => data.len() as u64,
            FileSource::Disk { length, .. } => *length,
        }
    }
}

/// Error injected into a file's streams after a number of chunks.
#[derive(Debug, Clone, Copy)]
pub struct StreamFault {
    /// Chunks delivered successfully before the error
    pub after_chunks: usize,
    /// Kind of the injected error
    pub kind: io::ErrorKind,
}

/// One file inside simulated content.
#[derive(Debug, Clone)]
pub struct SimulatedFile {
    pub relative_path: PathBuf,
    pub source: FileSource,
    pub fault: Option<StreamFault>,
}

impl SimulatedFile {
    /// File served from memory.
    pub fn in_memory(relative_path: impl Into<PathBuf>, data: impl Into<Bytes>) -> Self {
        Self {
            relative_path: relative_path.into(),
            source: FileSource::Memory(data.into()),
            fault: None,
        }
    }

    /// File served from local disk.
    pub fn on_disk(relative_path: impl Into<PathBuf>, path: PathBuf, length: u64) -> Self {
        Self {
            relative_path: relative_path.into(),
            source: FileSource::Disk { path, length },
            fault: None,
        }
    }

    /// Makes every stream over this file fail after `after_chunks` chunks.
    pub fn with_fault(mut self, after_chunks: usize, kind: io::ErrorKind) -> Self {
        self.fault = Some(StreamFault { after_chunks, kind });
        self
    }
}

/// How a transfer for this content behaves once acquired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentBehavior {
    /// Metadata arrives after the configured delay
    Available,
    /// Metadata never arrives (no seeds)
    Stalled,
    /// The transfer fails with the given reason after the configured delay
    Fails(String),
    /// Readiness is settled by the caller through the engine
    Manual,
}

/// Content known to the simulated swarm.
#[derive(Debug, Clone)]
pub struct SimulatedContent {
    pub identifier: ContentId,
    pub name: String,
    pub files: Vec<SimulatedFile>,
    pub behavior: ContentBehavior,
}

impl SimulatedContent {
    /// Content that becomes ready after the configured metadata delay.
    pub fn new(identifier: ContentId, name: impl Into<String>, files: Vec<SimulatedFile>) -> Self {
        Self {
            identifier,
            name: name.into(),
            files,
            behavior: ContentBehavior::Available,
        }
    }

    /// Overrides the acquisition behavior.
    pub fn with_behavior(mut self, behavior: ContentBehavior) -> Self {
        self.behavior = behavior;
        self
    }
}
