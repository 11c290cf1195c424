//! Execution: the driver seam, the bounded connection pool, and the
//! governor that admits and supervises every statement.

pub mod driver;
pub mod governor;
pub mod pool;

pub use driver::{Connection, ConnectionFactory, RowBatch};
pub use governor::{ExecutionGovernor, ExportStream, OperationClass, PreviewPage};
pub use pool::{AcquireError, ConnectionPool, PooledConnection};
