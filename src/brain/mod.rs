//! Text generation: providers, stream decoding and the fallback chain.

pub mod chain;
pub mod provider;
pub mod stream;

pub use chain::{Brain, ThinkOptions, ThinkResponse};
pub use provider::{
    build_provider, http_client, AnthropicProvider, ByteStream, ChatCompletionsProvider,
    CompletionRequest, ProviderError, TextProvider,
};
pub use stream::{parse_event, LineDecoder, StreamEvent};
