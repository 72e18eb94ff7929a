//! Test fixtures and builders for PostgresCluster resources
//!
//! # Quick Start
//!
//! For simple unit tests, use the convenience functions:
//! ```rust,ignore
//! let cluster = create_test_cluster("my-cluster", "default");
//! ```
//!
//! For more complex configurations, use the builder pattern:
//! ```rust,ignore
//! let cluster = PostgresClusterBuilder::new("my-cluster", "default")
//!     .with_instance_set("", None)
//!     .with_repo("repo1")
//!     .with_repo_host("pgbackrest:latest")
//!     .with_pgbouncer()
//!     .build();
//! ```

use std::sync::Arc;

use kube::core::ObjectMeta;
use pgcluster_operator::config::OperatorConfig;
use pgcluster_operator::controller::Context;
use pgcluster_operator::crd::{
    Archive, PGBackRestArchive, PgBouncerPodSpec, PostgresCluster, PostgresClusterSpec,
    PostgresInstanceSetSpec, PostgresProxySpec, RepoHost, RepoVolume, VolumeClaimSpec,
};
use pgcluster_operator::store::MemoryStore;

/// UID given to clusters built with [`create_test_cluster`]
pub const TEST_UID: &str = "test-uid-12345";

/// Namespace used by the convenience functions
pub const TEST_NAMESPACE: &str = "default";

// =============================================================================
// Convenience Functions for Simple Test Cases
// =============================================================================

/// The smallest valid declaration: one unnamed instance set, `repo1`, no
/// repository host and no proxy
pub fn create_test_cluster(name: &str, namespace: &str) -> PostgresCluster {
    PostgresClusterBuilder::new(name, namespace)
        .with_uid(TEST_UID)
        .with_instance_set("", None)
        .with_repo("repo1")
        .build()
}

/// Same as [`create_test_cluster`] with a PgBouncer proxy
pub fn create_test_cluster_with_pgbouncer(name: &str, namespace: &str) -> PostgresCluster {
    PostgresClusterBuilder::new(name, namespace)
        .with_uid(TEST_UID)
        .with_instance_set("", None)
        .with_repo("repo1")
        .with_pgbouncer()
        .build()
}

/// Reconciler context over an in-memory store
pub fn test_context(store: MemoryStore) -> Arc<Context<MemoryStore>> {
    Arc::new(Context::new(store, None, OperatorConfig::default()))
}

/// Store `cluster` and return its normalized form, as a pass would see it
pub fn seed(store: &MemoryStore, cluster: &PostgresCluster) -> PostgresCluster {
    store.insert(cluster).expect("seed cluster");
    let mut normalized = cluster.clone();
    normalized.spec.normalize();
    normalized
}

/// Current stored state of a cluster
pub fn stored(store: &MemoryStore, name: &str) -> PostgresCluster {
    store
        .peek::<PostgresCluster>(TEST_NAMESPACE, name)
        .expect("cluster is stored")
}

/// Claim declaration of the given size
pub fn claim(size: &str) -> VolumeClaimSpec {
    VolumeClaimSpec {
        size: size.to_string(),
        ..Default::default()
    }
}

// =============================================================================
// PostgresCluster Builder
// =============================================================================

/// Builder for PostgresCluster test fixtures
///
/// Provides a fluent API for creating PostgresCluster resources with various
/// configurations. Use this for complex test scenarios.
#[allow(dead_code)]
pub struct PostgresClusterBuilder {
    name: String,
    namespace: String,
    uid: Option<String>,
    generation: Option<i64>,
    finalizers: Vec<String>,
    image: String,
    postgres_version: i32,
    port: Option<i32>,
    instance_sets: Vec<PostgresInstanceSetSpec>,
    repos: Vec<RepoVolume>,
    repo_host: Option<RepoHost>,
    pgbouncer: Option<PgBouncerPodSpec>,
}

#[allow(dead_code)]
impl PostgresClusterBuilder {
    /// Create a new builder with default values
    ///
    /// No instance sets and no repositories are declared until added.
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            uid: None,
            generation: Some(1),
            finalizers: Vec::new(),
            image: "registry.example.com/crunchy-postgres:centos8-13.2".to_string(),
            postgres_version: 13,
            port: None,
            instance_sets: Vec::new(),
            repos: Vec::new(),
            repo_host: None,
            pgbouncer: None,
        }
    }

    /// Set the resource UID (for owner references)
    pub fn with_uid(mut self, uid: &str) -> Self {
        self.uid = Some(uid.to_string());
        self
    }

    /// Set the resource generation
    pub fn with_generation(mut self, generation: i64) -> Self {
        self.generation = Some(generation);
        self
    }

    pub fn with_finalizer(mut self, finalizer: &str) -> Self {
        self.finalizers.push(finalizer.to_string());
        self
    }

    /// Set the PostgreSQL major version
    pub fn with_version(mut self, version: i32) -> Self {
        self.postgres_version = version;
        self
    }

    pub fn with_image(mut self, image: &str) -> Self {
        self.image = image.to_string();
        self
    }

    pub fn with_port(mut self, port: i32) -> Self {
        self.port = Some(port);
        self
    }

    /// Add an instance set; an empty name is defaulted from its position
    pub fn with_instance_set(mut self, name: &str, replicas: Option<i32>) -> Self {
        self.instance_sets.push(PostgresInstanceSetSpec {
            name: name.to_string(),
            replicas,
            resources: None,
            volume_claim_spec: claim("1Gi"),
        });
        self
    }

    /// Add a repository volume
    pub fn with_repo(mut self, name: &str) -> Self {
        self.repos.push(RepoVolume {
            name: name.to_string(),
            volume_claim_spec: claim("1Gi"),
        });
        self
    }

    /// Declare a dedicated repository host
    pub fn with_repo_host(mut self, image: &str) -> Self {
        self.repo_host = Some(RepoHost {
            image: image.to_string(),
            ..Default::default()
        });
        self
    }

    /// Declare a PgBouncer proxy with default settings
    pub fn with_pgbouncer(mut self) -> Self {
        self.pgbouncer = Some(PgBouncerPodSpec::default());
        self
    }

    /// Declare a PgBouncer proxy with a replica count
    pub fn with_pgbouncer_replicas(mut self, replicas: i32) -> Self {
        self.pgbouncer = Some(PgBouncerPodSpec {
            replicas: Some(replicas),
            ..Default::default()
        });
        self
    }

    /// Build the PostgresCluster
    pub fn build(self) -> PostgresCluster {
        PostgresCluster {
            metadata: ObjectMeta {
                name: Some(self.name),
                namespace: Some(self.namespace),
                uid: self.uid,
                generation: self.generation,
                finalizers: (!self.finalizers.is_empty()).then_some(self.finalizers),
                ..Default::default()
            },
            spec: PostgresClusterSpec {
                archive: Archive {
                    pgbackrest: PGBackRestArchive {
                        configuration: Vec::new(),
                        repos: self.repos,
                        repo_host: self.repo_host,
                    },
                },
                custom_tls_secret: None,
                image: self.image,
                instance_sets: self.instance_sets,
                openshift: None,
                patroni: None,
                port: self.port,
                postgres_version: self.postgres_version,
                proxy: self.pgbouncer.map(|pg_bouncer| PostgresProxySpec {
                    pg_bouncer: Some(pg_bouncer),
                }),
            },
            status: None,
        }
    }
}
