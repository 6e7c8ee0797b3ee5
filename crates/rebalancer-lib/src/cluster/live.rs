//! Kubernetes-backed cluster provider

use super::{BoundsPatcher, ClusterState, ClusterStateProvider, EvictionOutcome, Permission};
use crate::config::RebalanceConfig;
use crate::error::ClusterError;
use crate::models::{Node, NodeClass, Pod};
use crate::quantity::ResourceAmount;
use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::authorization::v1::{
    ResourceAttributes, SelfSubjectAccessReview, SelfSubjectAccessReviewSpec,
};
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::{Node as K8sNode, Pod as K8sPod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::{Api, EvictParams, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Labels used to classify nodes and pods
#[derive(Debug, Clone)]
struct Labels {
    spot: String,
    spot_value: String,
    pool: String,
    critical: String,
}

/// Read/evict/patch view over the Kubernetes API
///
/// `commit` is a no-op: evicted pods are rescheduled by the cluster scheduler.
#[derive(Clone)]
pub struct KubeClusterProvider {
    client: Client,
    labels: Labels,
}

impl KubeClusterProvider {
    pub fn new(client: Client, config: &RebalanceConfig) -> Self {
        Self {
            client,
            labels: Labels {
                spot: config.spot_label.clone(),
                spot_value: config.spot_label_value.clone(),
                pool: config.pool_label.clone(),
                critical: config.critical_label.clone(),
            },
        }
    }

    /// Connect using in-cluster config or the local kubeconfig
    pub async fn try_default(config: &RebalanceConfig) -> Result<Self, ClusterError> {
        let client = Client::try_default().await?;
        Ok(Self::new(client, config))
    }

    fn node_class(&self, labels: Option<&BTreeMap<String, String>>) -> NodeClass {
        let Some(labels) = labels else {
            return NodeClass::Durable;
        };
        let spot = labels
            .get(&self.labels.spot)
            .is_some_and(|v| v.eq_ignore_ascii_case(&self.labels.spot_value))
            || labels.get("spot").is_some_and(|v| v == "true");

        if spot {
            NodeClass::Preemptible
        } else {
            NodeClass::Durable
        }
    }

    fn convert_node(&self, node: &K8sNode) -> Result<Node, ClusterError> {
        let name = node.metadata.name.clone().unwrap_or_default();
        let allocatable = node
            .status
            .as_ref()
            .and_then(|s| s.allocatable.as_ref());

        let cpu = quantity(allocatable, "cpu");
        let memory = quantity(allocatable, "memory");
        let allocatable = ResourceAmount::parse(cpu, memory).map_err(|source| {
            ClusterError::Quantity {
                object: format!("node/{name}"),
                source,
            }
        })?;

        let labels = node.metadata.labels.as_ref();
        let mut converted = Node::new(name, self.node_class(labels), allocatable);
        if let Some(pool) = labels.and_then(|l| l.get(&self.labels.pool)) {
            converted = converted.with_pool(pool.clone());
        }
        Ok(converted)
    }

    /// Convert a running pod, returning the node it is bound to
    fn convert_pod(&self, pod: &K8sPod) -> Result<Option<(String, Pod)>, ClusterError> {
        let Some(node_name) = pod.spec.as_ref().and_then(|s| s.node_name.clone()) else {
            return Ok(None);
        };
        let name = pod.metadata.name.clone().unwrap_or_default();
        let namespace = pod
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());

        let mut requests = ResourceAmount::zero();
        for container in pod.spec.iter().flat_map(|s| s.containers.iter()) {
            let container_requests = container.resources.as_ref().and_then(|r| r.requests.as_ref());
            requests += ResourceAmount::parse(
                quantity(container_requests, "cpu"),
                quantity(container_requests, "memory"),
            )
            .map_err(|source| ClusterError::Quantity {
                object: format!("pod/{namespace}/{name}"),
                source,
            })?;
        }

        let labelled_critical = pod
            .metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(&self.labels.critical))
            .is_some_and(|v| v == "true");
        // DaemonSet pods are pinned to their node
        let daemon = pod
            .metadata
            .owner_references
            .iter()
            .flatten()
            .any(|o| o.kind == "DaemonSet");

        let created_at = pod
            .metadata
            .creation_timestamp
            .as_ref()
            .map(|t| t.0)
            .unwrap_or_else(Utc::now);

        Ok(Some((
            node_name,
            Pod::new(name, namespace, requests, labelled_critical || daemon, created_at),
        )))
    }
}

/// Quantity string for `key`, or "0" when absent
fn quantity<'a>(map: Option<&'a BTreeMap<String, Quantity>>, key: &str) -> &'a str {
    map.and_then(|m| m.get(key))
        .map(|q| q.0.as_str())
        .unwrap_or("0")
}

#[async_trait]
impl ClusterStateProvider for KubeClusterProvider {
    fn name(&self) -> &'static str {
        "kubernetes"
    }

    async fn observe(&self) -> Result<ClusterState, ClusterError> {
        let nodes: Api<K8sNode> = Api::all(self.client.clone());
        let pods: Api<K8sPod> = Api::all(self.client.clone());

        let node_list = nodes.list(&ListParams::default()).await?;
        let pod_list = pods
            .list(&ListParams::default().fields("status.phase=Running"))
            .await?;

        let mut state = ClusterState::new(
            node_list
                .items
                .iter()
                .map(|n| self.convert_node(n))
                .collect::<Result<Vec<_>, _>>()?,
        );

        for pod in &pod_list.items {
            if let Some((node_name, pod)) = self.convert_pod(pod)? {
                match state.node_mut(&node_name) {
                    Some(node) => node.pods.push(pod),
                    None => debug!(pod = %pod.key(), node = %node_name, "Pod bound to unknown node"),
                }
            }
        }
        state.recompute_usage();

        debug!(
            nodes = state.nodes.len(),
            pods = state.total_pods(),
            "Observed cluster state"
        );
        Ok(state)
    }

    async fn evict(&self, pod: &Pod) -> Result<EvictionOutcome, ClusterError> {
        let api: Api<K8sPod> = Api::namespaced(self.client.clone(), &pod.namespace);

        match api.evict(&pod.name, &EvictParams::default()).await {
            Ok(_) => {
                info!(pod = %pod.key(), "Pod evicted");
                Ok(EvictionOutcome::Evicted)
            }
            Err(kube::Error::Api(resp)) if resp.code == 429 => {
                if resp.message.contains("disruption budget") {
                    Ok(EvictionOutcome::Denied(resp.message))
                } else {
                    Ok(EvictionOutcome::RateLimited)
                }
            }
            Err(kube::Error::Api(resp)) if resp.code == 404 => {
                Ok(EvictionOutcome::Denied("pod not found".to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn commit(&self, _state: &ClusterState) -> Result<(), ClusterError> {
        Ok(())
    }

    async fn has_permissions(&self, required: &[Permission]) -> Result<bool, ClusterError> {
        let api: Api<SelfSubjectAccessReview> = Api::all(self.client.clone());

        for permission in required {
            let review = SelfSubjectAccessReview {
                spec: SelfSubjectAccessReviewSpec {
                    resource_attributes: Some(ResourceAttributes {
                        group: Some(permission.group.to_string()),
                        resource: Some(permission.resource.to_string()),
                        subresource: permission.subresource.map(str::to_string),
                        verb: Some(permission.verb.to_string()),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                ..Default::default()
            };

            let response = api.create(&PostParams::default(), &review).await?;
            let allowed = response.status.map(|s| s.allowed).unwrap_or(false);
            if !allowed {
                warn!(permission = %permission, "Missing required permission");
                return Ok(false);
            }
        }

        Ok(true)
    }
}

#[async_trait]
impl BoundsPatcher for KubeClusterProvider {
    async fn patch_bounds(
        &self,
        namespace: &str,
        name: &str,
        min_replicas: Option<u32>,
        max_replicas: u32,
    ) -> Result<(), ClusterError> {
        let api: Api<HorizontalPodAutoscaler> = Api::namespaced(self.client.clone(), namespace);

        let mut spec = serde_json::Map::new();
        spec.insert("maxReplicas".to_string(), max_replicas.into());
        if let Some(min) = min_replicas {
            spec.insert("minReplicas".to_string(), min.into());
        }
        let patch = serde_json::json!({ "spec": spec });

        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        info!(namespace, hpa = name, min_replicas = ?min_replicas, max_replicas, "Patched HPA bounds");
        Ok(())
    }
}
