//! Request/response log records: building, diffing, the rolling file sink,
//! the asynchronous writer and retrieval.

pub mod diff;
pub mod query;
pub mod record;
pub mod sink;
pub mod writer;

pub use diff::{diff, diff_bodies, Change, ChangeOp};
pub use query::{get_log, search_logs, LogFilter, LogQuery};
pub use record::{
    header_map, truncate_body, LogRecord, LoggedRequest, LoggedResponse, CLIENT_CLOSED_REQUEST,
    MAX_LOGGED_BODY,
};
pub use sink::RollingFileSink;
pub use writer::{log_index_for, LogWriter};
