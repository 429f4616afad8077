pub mod context;
pub mod dispatcher;
pub mod registry;
pub mod session;

pub use context::AnalysisContext;
pub use dispatcher::{PendingQuery, QueryBridge};
pub use registry::{PendingInfo, PendingRecord, PendingRegistry};
pub use session::{SessionContext, SessionInfo, SessionManager};
