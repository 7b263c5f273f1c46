//! Mirror Store and Audit Log persistence (SQLite)

pub mod audit;
pub mod init;
pub mod tasks;

pub use audit::{AuditListFilter, AuditLog};
pub use init::init_database;
pub use tasks::{
    DistinctColumn, GroupTotal, SortOrder, TaskListFilter, TaskSort, TaskStore, TotalsGroup,
    TotalsSummary,
};
