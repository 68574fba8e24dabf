pub mod adapter;
pub mod engine;
pub mod registry;
pub mod report;
pub mod runner;

pub use adapter::{
    AdapterHealth, AdapterSettings, AnalysisRequest, ModelAdapter, Provider, ProviderCategory,
    ReportedFinding,
};
pub use engine::{
    store::ScanStore, ConsensusFinding, Finding, FindingValidationError, ModelFindingSet,
    ScanError, ScanResult, ScanStatus, ScanSummary, Severity,
};
pub use registry::{ModelEntry, ModelRegistry, RegistryConfig, RegistryError};
pub use report::{render_result, OutputFormat};
pub use runner::{RunnerConfig, ScanRunner, SourceSet};
