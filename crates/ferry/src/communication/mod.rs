mod completion;
mod handle;

pub use completion::{Completion, CompletionSink};
pub use handle::CompletionHandle;

pub(crate) use completion::completion_channel;
