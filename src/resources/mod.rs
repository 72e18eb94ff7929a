pub mod common;
pub mod instance;
pub mod patroni;
pub mod pgbackrest;
pub mod pgbouncer;
pub mod service;

pub use common::{API_VERSION, FIELD_MANAGER, KIND, owner_reference, standard_labels};
