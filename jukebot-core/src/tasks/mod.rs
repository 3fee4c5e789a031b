pub mod session_cleanup;

pub use session_cleanup::{run_session_cleanup, spawn_session_cleanup_task, CleanupStats};
