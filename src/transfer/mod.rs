// Transfer Engine
//
// Session-pooled, queue-scheduled file transfers with retry, resumable
// pause, cancellation cleanup, and chunked parallel moves for large files.

pub mod chunked;
pub mod history;
pub mod progress;
pub mod queue;
pub mod task;
pub mod types;

pub use chunked::{sha256_file, ChunkedRequest, ChunkedTransferManager};
pub use history::{HistorySink, TransferRecord};
pub use progress::{ProgressSink, ProgressUpdate, SpeedTracker};
pub use queue::{QueueEvent, QueueObserver, TransferQueue};
pub use types::{
    ChunkState, ChunkStatus, QueueStats, TaskId, TaskPriority, TaskStatus, TransferDirection,
    TransferTask,
};
