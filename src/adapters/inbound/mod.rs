mod stats_server;

pub use stats_server::{router, StatsServer, StatsState};

// Re-export for external use (e.g., integration tests)
#[allow(unused_imports)]
pub use stats_server::{HealthResponse, InvalidateRequest};
