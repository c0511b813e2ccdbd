//! Meter sources: adapters, extraction, registry, aggregation and discovery.

/// Source adapters and their configuration.
pub mod adapter;
/// Per-call consumption aggregation tree.
pub mod aggregator;
/// Background discovery loop.
pub mod discovery;
/// Reading extractors.
pub mod extraction;
/// In-memory source registry.
pub mod registry;

pub use adapter::{FilesystemAdapter, SourceAdapter, SourceConfig, SourceHandle, SourceKind, RECOGNIZED_EXTENSIONS};
pub use aggregator::{Consumption, ConsumptionComponent, SourceLeaf, UserAggregate};
pub use discovery::{scan_once, DiscoveryConfig, DiscoveryLoop, DiscoveryOutcome, SourceRegistrar};
pub use extraction::{ContentExtractor, FilenameExtractor, ReadingExtractor};
pub use registry::{Registration, SourceRegistry};
