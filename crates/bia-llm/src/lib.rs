pub mod assembly;
pub mod provider_openai;
pub mod sse;
pub mod traits;

pub use assembly::llm_request;
pub use provider_openai::OpenAiCompatProvider;
pub use traits::{BoxStream, ChatRequest, ChatResponse, LlmProvider, LlmSettings, StreamEvent, ToolChoice, ToolDefinition, Usage, UserInfo};
