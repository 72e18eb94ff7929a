//! Unit tests for child resource generators

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::ResourceExt;
use pgcluster_operator::resources::common::{
    LABEL_CLUSTER, LABEL_INSTANCE_SET, LABEL_PGBACKREST_REPO, LABEL_ROLE,
};
use pgcluster_operator::resources::instance::generate_instance_set;
use pgcluster_operator::resources::pgbackrest::{
    generate_repo_host, generate_repo_volume, render_config,
};
use pgcluster_operator::resources::pgbouncer::{
    generate_pgbouncer_deployment, generate_pgbouncer_service,
};
use pgcluster_operator::resources::service::{
    ROLE_PRIMARY, ROLE_REPLICA, generate_primary_service, generate_replicas_service,
};

use crate::common::*;

mod instance_set {
    use super::*;

    #[test]
    fn test_statefulset_shape() {
        let cluster = {
            let mut c = create_test_cluster("db", "default");
            c.spec.normalize();
            c
        };
        let sts = generate_instance_set(&cluster, &cluster.spec.instance_sets[0]);

        assert_eq!(sts.name_any(), "db-00");
        let spec = sts.spec.as_ref().unwrap();
        assert_eq!(spec.replicas, Some(1));
        assert_eq!(spec.service_name.as_deref(), Some("db-pods"));
        assert_eq!(
            sts.labels().get(LABEL_INSTANCE_SET).map(String::as_str),
            Some("00")
        );

        let owner = &sts.owner_references()[0];
        assert_eq!(owner.uid, TEST_UID);
        assert_eq!(owner.controller, Some(true));
    }

    #[test]
    fn test_data_volume_template() {
        let mut cluster = PostgresClusterBuilder::new("db", "default")
            .with_uid(TEST_UID)
            .build();
        let mut set = cluster_set("a");
        set.volume_claim_spec = claim("5Gi");
        cluster.spec.instance_sets.push(set);

        let sts = generate_instance_set(&cluster, &cluster.spec.instance_sets[0]);
        let spec = sts.spec.unwrap();
        let vct = &spec.volume_claim_templates.unwrap()[0];
        let requests = vct
            .spec
            .as_ref()
            .and_then(|s| s.resources.as_ref())
            .and_then(|r| r.requests.as_ref())
            .unwrap();
        assert_eq!(requests.get("storage"), Some(&Quantity("5Gi".to_string())));

        let retention = spec.persistent_volume_claim_retention_policy.unwrap();
        assert_eq!(retention.when_deleted.as_deref(), Some("Delete"));
        assert_eq!(retention.when_scaled.as_deref(), Some("Retain"));
    }

    fn cluster_set(name: &str) -> pgcluster_operator::crd::PostgresInstanceSetSpec {
        pgcluster_operator::crd::PostgresInstanceSetSpec {
            name: name.to_string(),
            replicas: Some(2),
            resources: None,
            volume_claim_spec: claim("1Gi"),
        }
    }
}

mod pgbackrest {
    use super::*;

    #[test]
    fn test_config_without_repo_host() {
        let cluster = create_test_cluster("db", "default");
        let config = render_config(&cluster, false);
        assert!(config.contains("repo1-path=/pgbackrest/repo1"));
        assert!(!config.contains("repo1-host="));
        assert!(config.contains("pg1-port=5432"));
    }

    #[test]
    fn test_config_with_observed_repo_host() {
        let cluster = PostgresClusterBuilder::new("db", "default")
            .with_instance_set("", None)
            .with_repo("repo1")
            .with_repo("repo2")
            .with_repo_host("pgbackrest:latest")
            .build();
        let config = render_config(&cluster, true);
        assert!(config.contains("repo1-host=db-repo-host-0."));
        assert!(config.contains("repo2-host=db-repo-host-0."));
        assert!(config.contains("repo2-host-user=postgres"));
    }

    #[test]
    fn test_repo_volume_labels() {
        let cluster = create_test_cluster("db", "default");
        let pvc = generate_repo_volume(&cluster, &cluster.spec.archive.pgbackrest.repos[0]);

        assert_eq!(pvc.name_any(), "db-pgbackrest-repo1");
        let labels = pvc.labels();
        assert_eq!(labels.get(LABEL_CLUSTER).map(String::as_str), Some("db"));
        assert_eq!(
            labels.get(LABEL_PGBACKREST_REPO).map(String::as_str),
            Some("repo1")
        );
        assert_eq!(
            labels.get("app.kubernetes.io/component").map(String::as_str),
            Some("pgbackrest")
        );
    }

    #[test]
    fn test_repo_host_is_single_replica() {
        let cluster = PostgresClusterBuilder::new("db", "default")
            .with_repo("repo1")
            .with_repo("repo2")
            .with_repo_host("pgbackrest:latest")
            .build();
        let host = cluster.spec.archive.pgbackrest.repo_host.clone().unwrap();
        let sts = generate_repo_host(&cluster, &host);

        assert_eq!(sts.name_any(), "db-repo-host");
        let spec = sts.spec.unwrap();
        assert_eq!(spec.replicas, Some(1));

        let pod = spec.template.spec.unwrap();
        let claims: Vec<String> = pod
            .volumes
            .unwrap_or_default()
            .into_iter()
            .filter_map(|v| v.persistent_volume_claim.map(|p| p.claim_name))
            .collect();
        assert_eq!(claims, vec!["db-pgbackrest-repo1", "db-pgbackrest-repo2"]);
    }
}

mod services {
    use super::*;

    #[test]
    fn test_role_services_select_by_patroni_role() {
        let cluster = create_test_cluster("db", "default");

        let primary = generate_primary_service(&cluster);
        assert_eq!(primary.name_any(), "db-primary");
        let selector = primary.spec.unwrap().selector.unwrap();
        assert_eq!(selector.get(LABEL_ROLE).map(String::as_str), Some(ROLE_PRIMARY));

        let replicas = generate_replicas_service(&cluster);
        assert_eq!(replicas.name_any(), "db-replicas");
        let selector = replicas.spec.unwrap().selector.unwrap();
        assert_eq!(selector.get(LABEL_ROLE).map(String::as_str), Some(ROLE_REPLICA));
    }
}

mod pgbouncer {
    use super::*;

    #[test]
    fn test_deployment_and_service() {
        let cluster = PostgresClusterBuilder::new("db", "default")
            .with_uid(TEST_UID)
            .with_instance_set("", None)
            .with_repo("repo1")
            .with_pgbouncer_replicas(3)
            .build();
        let mut spec = cluster.spec.clone();
        spec.normalize();
        let pgbouncer = spec.proxy.unwrap().pg_bouncer.unwrap();

        let deployment = generate_pgbouncer_deployment(&cluster, &pgbouncer);
        assert_eq!(deployment.name_any(), "db-pgbouncer");
        assert_eq!(deployment.spec.unwrap().replicas, Some(3));

        let service = generate_pgbouncer_service(&cluster, &pgbouncer);
        assert_eq!(service.name_any(), "db-pgbouncer");
        assert_eq!(service.spec.unwrap().ports.unwrap()[0].port, 5432);
    }
}
