pub mod config;
pub mod connector;
pub mod evaluator;
pub mod persona;
pub mod processor;
pub mod run;
pub mod runner;
pub mod scenario;
pub mod store;
pub mod transcript;

pub use config::{ConfigError, EngineConfig, ProcessorSettings};
pub use connector::{
    AgentBackend, Connector, ConnectorClient, ConnectorConfig, ConnectorError, ConnectorResponse,
    ConnectorResult,
};
pub use evaluator::{
    Evaluator, EvaluatorError, EvaluatorKind, EvaluatorRegistry, EvaluatorResult,
    EvaluatorResultEntry, TokenUsageEvaluator,
};
pub use persona::{Persona, PersonaReply, PersonaSimulator};
pub use processor::{
    ProcessorConfig, ProcessorError, ProcessorResult, RunObserver, RunProcessor,
    RunProcessorBuilder,
};
pub use run::{Run, RunOutput, RunResult, RunStatus};
pub use runner::{ConversationOutcome, Disposition, ScenarioRunner};
pub use scenario::{EvaluatorSpec, FailureCriteriaMode, Scenario};
pub use store::{Catalog, MemoryCatalog, MemoryRunStore, RunStore, StoreError, StoreResult};
pub use transcript::{Transcript, TranscriptError};
