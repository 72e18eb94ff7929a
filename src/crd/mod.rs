mod defaults;
mod postgres_cluster;

pub use defaults::*;
pub use postgres_cluster::*;
