use k8s_openapi::api::apps::v1::Deployment;
use kube::ResourceExt;

/// Aggregated availability of the `Deployment`s installed by the manifest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeploymentAvailability {
    Available,
    NotReady { unavailable: Vec<String> },
}

impl DeploymentAvailability {
    /// Every observed deployment must be available. Observing no deployments at all counts
    /// as available.
    pub fn from_deployments<'a>(deployments: impl IntoIterator<Item = &'a Deployment>) -> Self {
        let mut unavailable: Vec<String> = deployments
            .into_iter()
            .filter(|deployment| !deployment_available(deployment))
            .map(|deployment| deployment.name_any())
            .collect();

        if unavailable.is_empty() {
            Self::Available
        } else {
            // Keep the list stable, the informer order is random.
            unavailable.sort();
            Self::NotReady { unavailable }
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available)
    }
}

/// A deployment is available when it reports the `Available` condition as `True`.
///
/// Deployments without any conditions (e.g. freshly created ones) fall back to comparing
/// the requested with the available replicas. In addition, there needs to be at least one
/// replica requested.
fn deployment_available(deployment: &Deployment) -> bool {
    let status = deployment.status.as_ref();

    if let Some(conditions) = status.and_then(|status| status.conditions.as_ref())
        && !conditions.is_empty()
    {
        return conditions
            .iter()
            .any(|condition| condition.type_ == "Available" && condition.status == "True");
    }

    let requested_replicas = deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.replicas)
        .unwrap_or_default();
    let available_replicas = status
        .and_then(|status| status.available_replicas)
        .unwrap_or_default();

    requested_replicas == available_replicas && requested_replicas != 0
}
