pub mod acquisition;
pub mod classifier;
pub mod config;
pub mod engine;
pub mod enrichment;
pub mod item;
pub mod manifest;
pub mod metrics;
pub mod progress;
pub mod retry;
pub mod testing;
pub mod transfer;

pub use acquisition::{
    file_name_from_url, FetchError, FetchRequest, FetchedArtifact, Fetcher, HttpFetcher,
    HttpFetcherConfig,
};
pub use classifier::{
    Classifier, ClassifierConfig, QualityBand, QualityTier, RawCandidate, Rejection,
};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, DatabaseConfig,
    DirectoryLayout, ServerConfig, TargetConfig,
};
pub use engine::{
    ConnectionCheck, Engine, EngineConfig, EngineError, EngineStatus, TargetStatus, TickReport,
};
pub use enrichment::{
    EnrichedMetadata, EnrichmentConfig, EnrichmentError, MetadataEnricher, MetadataQuery,
    TmdbConfig, TmdbEnricher,
};
pub use item::{
    ContentCategory, Item, ItemError, ItemFilter, ItemProgress, ItemState, ItemStore, LastError,
    Phase, Priority, SqliteItemStore,
};
pub use manifest::{ingest, ingest_source, IngestReport, M3uManifest, ManifestSource};
pub use progress::{Interrupt, ProgressSink, ProgressSnapshot, Signal};
pub use retry::{ErrorKind, Failure, RetryConfig, RetryPolicy};
pub use transfer::{
    ClientConfig, LocalMountStrategy, ProtocolKind, RsyncStrategy, SftpStrategy, SmbStrategy,
    StrategySet, TransferOutcome, TransferStrategy,
};
