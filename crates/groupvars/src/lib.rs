pub mod config;
pub mod discovery;
pub mod error;
pub mod inventory;
pub mod merge;
pub mod secrets;
pub mod telemetry;
pub mod values;

pub use config::{load_settings, EjsonSettings, Settings};
pub use discovery::{discover, Discovery, DiscoveryEvent, FragmentDiscovery, SubdirectoryOrder};
pub use error::{ConfigError, GroupVarsError, Result, ValuesError};
pub use inventory::{
    match_limits, valid_groups, ClusterInventorySource, Entry, Inventory, InventoryError,
    LimitError, LimitSet,
};
pub use merge::{Document, MergeError, MergeEvaluator, OperatorEvaluator};
pub use secrets::{
    encrypt_document, resolve_secret, resolve_secret_optional, EjsonCipher, EjsonEncrypter,
    KeyDirDecryptor, SecretDecryptor, SecretError,
};
pub use telemetry::init_logging;
pub use values::{Resolver, Values};
