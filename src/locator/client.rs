//! Management-cluster client trait and kube-backed implementation

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::certificates::v1::CertificateSigningRequest;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::crd::{CertificateSigningRequestApproval, HostedCluster, HostedControlPlane};
use crate::{Error, Result};

use super::TargetReference;

/// Trait abstracting the management-cluster API surface the broker needs.
///
/// One implementation wraps a real kube client; tests mock it. Gets
/// return `None` on 404 so callers can distinguish absence from
/// transport failure. Creates tolerate an already-existing object and
/// deletes tolerate an already-missing one, so every write here is safe
/// to repeat.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ControlPlaneApi: Send + Sync {
    /// List HostedControlPlanes in a namespace
    async fn list_hosted_control_planes(
        &self,
        namespace: &str,
    ) -> Result<Vec<HostedControlPlane>>;

    /// Get a HostedCluster, or None if it does not exist
    async fn get_hosted_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<HostedCluster>>;

    /// Get a cluster-scoped CertificateSigningRequest, or None if absent
    async fn get_csr(&self, name: &str) -> Result<Option<CertificateSigningRequest>>;

    /// Create a CertificateSigningRequest
    async fn create_csr(&self, csr: &CertificateSigningRequest) -> Result<()>;

    /// Delete a CertificateSigningRequest
    async fn delete_csr(&self, name: &str) -> Result<()>;

    /// Get an approval record, or None if absent
    async fn get_csr_approval(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<CertificateSigningRequestApproval>>;

    /// Create an approval record in the given namespace
    async fn create_csr_approval(
        &self,
        namespace: &str,
        approval: &CertificateSigningRequestApproval,
    ) -> Result<()>;

    /// Delete an approval record
    async fn delete_csr_approval(&self, namespace: &str, name: &str) -> Result<()>;
}

/// Opaque credential source for management clusters.
///
/// The hosting environment decides how a target maps to a REST
/// configuration (cloud-local lookup, delegated tokens, kubeconfig
/// files). The broker only ever sees the resulting `kube::Config`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Produce a REST configuration for the management cluster that
    /// hosts the target
    async fn rest_config(&self, target: &TargetReference) -> Result<kube::Config>;
}

/// Construction seam for management-cluster clients.
///
/// A single method so callers can wrap implementations (caching,
/// instrumentation) without the broker knowing. There is no global
/// registry; whoever builds the broker injects the factory.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ControlPlaneApiFactory: Send + Sync {
    /// Build a client for the management cluster hosting `target`
    async fn connect(&self, target: &TargetReference) -> Result<Arc<dyn ControlPlaneApi>>;
}

/// Factory producing kube-backed clients from a credential provider.
pub struct KubeApiFactory {
    credentials: Arc<dyn CredentialProvider>,
}

impl KubeApiFactory {
    /// Create a factory over the given credential provider
    pub fn new(credentials: Arc<dyn CredentialProvider>) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl ControlPlaneApiFactory for KubeApiFactory {
    async fn connect(&self, target: &TargetReference) -> Result<Arc<dyn ControlPlaneApi>> {
        let config = self.credentials.rest_config(target).await?;
        let client = Client::try_from(config)?;
        debug!(target = %target, "connected to management cluster");
        Ok(Arc::new(KubeControlPlaneApi::new(client)))
    }
}

/// Real implementation of [`ControlPlaneApi`] over a kube client.
pub struct KubeControlPlaneApi {
    client: Client,
}

impl KubeControlPlaneApi {
    /// Create a new client wrapper
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ControlPlaneApi for KubeControlPlaneApi {
    async fn list_hosted_control_planes(
        &self,
        namespace: &str,
    ) -> Result<Vec<HostedControlPlane>> {
        let api: Api<HostedControlPlane> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&ListParams::default()).await?;
        Ok(list.items)
    }

    async fn get_hosted_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<HostedCluster>> {
        let api: Api<HostedCluster> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(cluster) => Ok(Some(cluster)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(Error::Kube(e)),
        }
    }

    async fn get_csr(&self, name: &str) -> Result<Option<CertificateSigningRequest>> {
        let api: Api<CertificateSigningRequest> = Api::all(self.client.clone());
        match api.get(name).await {
            Ok(csr) => Ok(Some(csr)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(Error::Kube(e)),
        }
    }

    async fn create_csr(&self, csr: &CertificateSigningRequest) -> Result<()> {
        let api: Api<CertificateSigningRequest> = Api::all(self.client.clone());
        match api.create(&PostParams::default(), csr).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
            Err(e) => Err(Error::Kube(e)),
        }
    }

    async fn delete_csr(&self, name: &str) -> Result<()> {
        let api: Api<CertificateSigningRequest> = Api::all(self.client.clone());
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(Error::Kube(e)),
        }
    }

    async fn get_csr_approval(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<CertificateSigningRequestApproval>> {
        let api: Api<CertificateSigningRequestApproval> =
            Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(approval) => Ok(Some(approval)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(Error::Kube(e)),
        }
    }

    async fn create_csr_approval(
        &self,
        namespace: &str,
        approval: &CertificateSigningRequestApproval,
    ) -> Result<()> {
        let api: Api<CertificateSigningRequestApproval> =
            Api::namespaced(self.client.clone(), namespace);
        match api.create(&PostParams::default(), approval).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
            Err(e) => Err(Error::Kube(e)),
        }
    }

    async fn delete_csr_approval(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<CertificateSigningRequestApproval> =
            Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(Error::Kube(e)),
        }
    }
}
