pub mod client;
pub mod dispatcher;
pub mod error;
pub mod key_pool;

pub use client::{GeminiClient, GenerationRequest, GenerativeModel, RawModelResponse};
pub use dispatcher::{
    degrade_prompt, CallPath, DispatchSettings, Dispatched, Dispatcher, KNOWLEDGE_DIRECTIVE,
    SEARCH_DIRECTIVE_PREFIX,
};
pub use error::{classify, DispatchError, FailureClass, ProviderError, ProviderResult};
pub use key_pool::{Credential, CredentialReport, CredentialStatus, KeyPool, KeyPoolSettings, QuotaWindow};
