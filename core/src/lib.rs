pub mod ai;
pub mod archive;
pub mod backup;
pub mod cache;
pub mod config;
pub mod dictionary;
pub mod export;
pub mod formats;
pub mod mission;
pub mod protector;
pub mod segment;
pub mod translate;

pub use ai::{CompletionBackend, LlmClient, LlmError, PromptFormat, TransportMode};
pub use archive::{extract, is_mission_archive, repack, replace_dictionary, ArchiveError};
pub use backup::{backup_archive, BackupError};
pub use cache::{default_global_cache_path, CacheError, TranslationCache};
pub use config::{ConfigError, KeysFile, LlmOptions, PreparedConfig, TranslatorConfig};
pub use dictionary::{DictionaryParser, KeyFilter};
pub use mission::{
    MissionError, MissionMode, MissionPlan, MissionReport, MissionRunner, MissionStatus,
};
pub use protector::{ProtectedTerms, Protector};
pub use segment::{Resolution, Segment};
pub use translate::{
    CancelFlag, DictionaryReport, DictionaryTranslator, OutputLayout, TranslateError,
    TranslatedDictionary,
};
