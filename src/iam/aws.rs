//! AWS SDK binding for the [`IamApi`] trait
//!
//! A thin adapter: every method is one SDK call plus error-code mapping into
//! the local taxonomy. No retries, no policy decisions, no state. GetRole
//! responses carry URL-encoded policy documents; they are decoded here so
//! everything above this layer sees plain JSON.

use std::collections::BTreeMap;

use async_trait::async_trait;
use aws_sdk_iam::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_iam::types::Tag;
use aws_sdk_iam::Client;

use super::{CreateRoleInput, IamApi, IamApiError, LiveRole, RoleIdentity};

/// IAM client over the official AWS SDK
pub struct AwsIamClient {
    client: Client,
}

impl AwsIamClient {
    /// Create a client from the ambient AWS configuration
    /// (environment, shared config file, or pod identity)
    pub async fn new() -> Self {
        let config = aws_config::from_env().load().await;
        Self {
            client: Client::new(&config),
        }
    }
}

fn map_sdk_err<E, R>(err: SdkError<E, R>) -> IamApiError
where
    E: ProvideErrorMetadata + std::fmt::Debug,
    R: std::fmt::Debug,
{
    match &err {
        SdkError::ServiceError(ctx) => {
            let service_err = ctx.err();
            let code = service_err.code().unwrap_or("Unknown");
            let message = service_err.message().unwrap_or(code).to_string();
            IamApiError::from_code(code, message)
        }
        // Dispatch, timeout, and construction failures are all transient
        // from the orchestrator's perspective.
        _ => IamApiError::ServiceUnavailable(format!("{err:?}")),
    }
}

fn decode_document(raw: &str) -> Result<String, IamApiError> {
    urlencoding::decode(raw)
        .map(|doc| doc.into_owned())
        .map_err(|e| IamApiError::Other(format!("undecodable policy document: {e}")))
}

fn build_tags(tags: &BTreeMap<String, String>) -> Result<Vec<Tag>, IamApiError> {
    tags.iter()
        .map(|(k, v)| {
            Tag::builder()
                .key(k)
                .value(v)
                .build()
                .map_err(|e| IamApiError::Other(e.to_string()))
        })
        .collect()
}

#[async_trait]
impl IamApi for AwsIamClient {
    async fn create_role(&self, input: CreateRoleInput) -> Result<RoleIdentity, IamApiError> {
        let mut req = self
            .client
            .create_role()
            .role_name(&input.role_name)
            .assume_role_policy_document(&input.trust_policy_json)
            .description(&input.description)
            .max_session_duration(input.session_duration_secs);
        if !input.permission_boundary_arn.is_empty() {
            req = req.permissions_boundary(&input.permission_boundary_arn);
        }

        let out = req.send().await.map_err(map_sdk_err)?;
        let role = out
            .role()
            .ok_or_else(|| IamApiError::Other("create-role response carried no role".into()))?;

        Ok(RoleIdentity {
            arn: role.arn().to_string(),
            role_id: role.role_id().to_string(),
        })
    }

    async fn get_role(&self, role_name: &str) -> Result<LiveRole, IamApiError> {
        let out = self
            .client
            .get_role()
            .role_name(role_name)
            .send()
            .await
            .map_err(map_sdk_err)?;
        let role = out
            .role()
            .ok_or_else(|| IamApiError::Other("get-role response carried no role".into()))?;

        let trust_policy_json = match role.assume_role_policy_document() {
            Some(raw) => Some(decode_document(raw)?),
            None => None,
        };

        Ok(LiveRole {
            identity: RoleIdentity {
                arn: role.arn().to_string(),
                role_id: role.role_id().to_string(),
            },
            trust_policy_json,
            permissions_boundary_arn: role
                .permissions_boundary()
                .and_then(|b| b.permissions_boundary_arn())
                .map(String::from),
            tags: role
                .tags()
                .iter()
                .map(|t| (t.key().to_string(), t.value().to_string()))
                .collect(),
        })
    }

    async fn update_assume_role_policy(
        &self,
        role_name: &str,
        trust_policy_json: &str,
    ) -> Result<(), IamApiError> {
        self.client
            .update_assume_role_policy()
            .role_name(role_name)
            .policy_document(trust_policy_json)
            .send()
            .await
            .map_err(map_sdk_err)?;
        Ok(())
    }

    async fn tag_role(
        &self,
        role_name: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), IamApiError> {
        self.client
            .tag_role()
            .role_name(role_name)
            .set_tags(Some(build_tags(tags)?))
            .send()
            .await
            .map_err(map_sdk_err)?;
        Ok(())
    }

    async fn put_permissions_boundary(
        &self,
        role_name: &str,
        boundary_arn: &str,
    ) -> Result<(), IamApiError> {
        self.client
            .put_role_permissions_boundary()
            .role_name(role_name)
            .permissions_boundary(boundary_arn)
            .send()
            .await
            .map_err(map_sdk_err)?;
        Ok(())
    }

    async fn delete_permissions_boundary(&self, role_name: &str) -> Result<(), IamApiError> {
        self.client
            .delete_role_permissions_boundary()
            .role_name(role_name)
            .send()
            .await
            .map_err(map_sdk_err)?;
        Ok(())
    }

    async fn attach_role_policy(
        &self,
        role_name: &str,
        policy_arn: &str,
    ) -> Result<(), IamApiError> {
        self.client
            .attach_role_policy()
            .role_name(role_name)
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(map_sdk_err)?;
        Ok(())
    }

    async fn detach_role_policy(
        &self,
        role_name: &str,
        policy_arn: &str,
    ) -> Result<(), IamApiError> {
        self.client
            .detach_role_policy()
            .role_name(role_name)
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(map_sdk_err)?;
        Ok(())
    }

    async fn put_role_policy(
        &self,
        role_name: &str,
        policy_name: &str,
        policy_json: &str,
    ) -> Result<(), IamApiError> {
        self.client
            .put_role_policy()
            .role_name(role_name)
            .policy_name(policy_name)
            .policy_document(policy_json)
            .send()
            .await
            .map_err(map_sdk_err)?;
        Ok(())
    }

    async fn get_role_policy(
        &self,
        role_name: &str,
        policy_name: &str,
    ) -> Result<String, IamApiError> {
        let out = self
            .client
            .get_role_policy()
            .role_name(role_name)
            .policy_name(policy_name)
            .send()
            .await
            .map_err(map_sdk_err)?;
        decode_document(out.policy_document())
    }

    async fn delete_role_policy(
        &self,
        role_name: &str,
        policy_name: &str,
    ) -> Result<(), IamApiError> {
        self.client
            .delete_role_policy()
            .role_name(role_name)
            .policy_name(policy_name)
            .send()
            .await
            .map_err(map_sdk_err)?;
        Ok(())
    }

    async fn delete_role(&self, role_name: &str) -> Result<(), IamApiError> {
        self.client
            .delete_role()
            .role_name(role_name)
            .send()
            .await
            .map_err(map_sdk_err)?;
        Ok(())
    }
}
