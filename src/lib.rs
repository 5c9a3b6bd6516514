// DFP Bank Benchmark - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod error;
pub mod statement;
pub mod config;
pub mod loader;     // Source Table Loader
pub mod resolver;   // Metric Resolver
pub mod unmapped;   // Unmapped Line Collector
pub mod aggregator; // Metric Aggregator
pub mod derived;    // Derived Metrics Calculator
pub mod export;     // CSV artifacts
pub mod db;         // SQLite persistence
pub mod dashboard;  // View model shared by TUI and API
pub mod discovery;  // Candidate label discovery

// Re-export commonly used types
pub use error::{PipelineError, Result};
pub use statement::{FilingRow, Period, StatementTable, StatementType};
pub use config::{BenchmarkConfig, MetricDefinition};
pub use loader::{
    load_statement, read_source, DirectorySource, LoadedStatement, SourceFingerprint,
    StatementSource,
};
pub use resolver::{ExtractedMetric, MetricResolver, Resolution};
pub use unmapped::{collect_shadowed, collect_unmapped, ShadowedLine, UnmappedLine};
pub use aggregator::{
    melt, reshape, run_pipeline, MappingStatus, MappingUsage, MetricAggregator,
    PipelineOutput, ReconciledRecord, YearFailure,
};
pub use derived::{DerivedMetrics, DerivedMetricsCalculator};
pub use export::write_artifacts;
pub use db::{
    get_latest_run, get_mapping_usage, get_records, get_shadowed_lines, get_unmapped_lines,
    get_year_failures,
    replace_run, setup_database, RunSummary,
};
pub use dashboard::{apply_filter, format_brl, format_pct, ranking, DashboardMetric, Filter};
pub use discovery::{discover_candidates, DiscoveryReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
