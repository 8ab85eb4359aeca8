pub mod parser;
pub mod reconstructor;
pub mod state;

pub use parser::{SseDecoder, SseEvent};
pub use reconstructor::{CompletionRecord, StreamEvent, StreamReconstructor, reconstruct_stream};
pub use state::{StreamState, TEXT_BLOCK_INDEX, ToolBlock};
