//! Domain types and models

pub mod activity;
pub mod client;
pub mod operation;
pub mod provider;
pub mod query;

pub use activity::{Activity, ActivityType, AddActivityRequest};
pub use client::{AddClientRequest, Client, ClientStatus, UpdateClientRequest};
pub use operation::{DataRequest, OperationKind, ReplayOperation};
pub use provider::{HealthReport, HealthStatus, ProviderKind};
pub use query::{generate_id, Query, QueryOp, QueryResponse, Record};
