pub mod approvals;
pub mod authz;
pub mod health;
pub mod notifications;
