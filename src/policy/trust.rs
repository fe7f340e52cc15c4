//! Trust policy document types and builder
//!
//! The trust policy answers "who may assume this role". Tenants may override
//! the principals; otherwise the configured cluster defaults apply. The
//! builder always emits exactly one statement with a pinned policy-language
//! version, serialized with stable field order so drift comparison is
//! structural rather than textual.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::document::{Effect, StringOrList, DEFAULT_POLICY_VERSION};
use crate::config::ValidationConfig;
use crate::crd::TrustPolicyOverride;
use crate::{Error, Result};

/// Domain suffix every service principal must carry
pub const SERVICE_PRINCIPAL_SUFFIX: &str = ".amazonaws.com";

const ASSUME_ROLE_ACTION: &str = "sts:AssumeRole";
const ASSUME_WEB_IDENTITY_ACTION: &str = "sts:AssumeRoleWithWebIdentity";

/// The principal of a trust statement
///
/// Polymorphic over which kind is populated: an AWS/Service form or a
/// federated-OIDC form, never both in one statement.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Principal {
    /// IAM principal ARNs allowed to assume the role
    #[serde(rename = "AWS", default, skip_serializing_if = "StringOrList::is_empty")]
    pub aws: StringOrList,

    /// AWS service principal (e.g. "ec2.amazonaws.com")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,

    /// Federated OIDC provider ARN
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub federated: Option<String>,
}

/// One trust policy statement
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct TrustStatement {
    /// Allow or Deny (always Allow for built documents)
    pub effect: Effect,

    /// The assume-role action, a single string
    pub action: String,

    /// Who may assume the role
    pub principal: Principal,

    /// Optional condition map, keyed by operator then condition key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<BTreeMap<String, BTreeMap<String, String>>>,
}

/// The trust ("assume role") policy document
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct TrustPolicyDocument {
    /// Policy language version, pinned to [`DEFAULT_POLICY_VERSION`]
    pub version: String,

    /// Statement list (built documents hold exactly one)
    pub statement: Vec<TrustStatement>,
}

impl TrustPolicyDocument {
    /// Parse a trust document from its JSON wire form
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::serialization(e.to_string()))
    }

    /// Serialize to canonical JSON (stable field order via struct fields)
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::serialization(e.to_string()))
    }
}

/// Build the trust policy for a declaration
///
/// Resolution order:
/// 1. A federated OIDC override wins and produces the web-identity form.
/// 2. Tenant-supplied AWS principal ARNs and/or a service principal.
/// 3. The configured default principal ARNs.
///
/// Fails with [`Error::Configuration`] when neither the tenant nor the
/// configuration supplies a principal, and with [`Error::Validation`] when a
/// service principal lies outside [`SERVICE_PRINCIPAL_SUFFIX`].
pub fn build_trust_policy(
    overrides: Option<&TrustPolicyOverride>,
    cfg: &ValidationConfig,
) -> Result<TrustPolicyDocument> {
    let statement = match overrides {
        Some(ov) if ov.oidc_provider_arn.is_some() => federated_statement(ov),
        other => assume_role_statement(other, cfg)?,
    };

    Ok(TrustPolicyDocument {
        version: DEFAULT_POLICY_VERSION.to_string(),
        statement: vec![statement],
    })
}

fn federated_statement(ov: &TrustPolicyOverride) -> TrustStatement {
    // Caller guarantees the provider ARN is present.
    let provider_arn = ov.oidc_provider_arn.clone().unwrap_or_default();

    let condition = ov.oidc_subject.as_ref().map(|subject| {
        // arn:aws:iam::<acct>:oidc-provider/<issuer> -> <issuer>:sub
        let issuer = provider_arn
            .rsplit_once(":oidc-provider/")
            .map(|(_, issuer)| issuer)
            .unwrap_or(provider_arn.as_str());
        let mut keys = BTreeMap::new();
        keys.insert(format!("{issuer}:sub"), subject.clone());
        let mut cond = BTreeMap::new();
        cond.insert("StringEquals".to_string(), keys);
        cond
    });

    TrustStatement {
        effect: Effect::Allow,
        action: ASSUME_WEB_IDENTITY_ACTION.to_string(),
        principal: Principal {
            federated: Some(provider_arn),
            ..Default::default()
        },
        condition,
    }
}

fn assume_role_statement(
    overrides: Option<&TrustPolicyOverride>,
    cfg: &ValidationConfig,
) -> Result<TrustStatement> {
    let aws_arns = overrides
        .and_then(|ov| ov.aws_principal_arns.clone())
        .unwrap_or_default();
    let service = overrides.and_then(|ov| ov.service_principal.clone());

    if let Some(ref service) = service {
        if !service.ends_with(SERVICE_PRINCIPAL_SUFFIX) {
            return Err(Error::validation(format!(
                "service principal {service} must end with {SERVICE_PRINCIPAL_SUFFIX}"
            )));
        }
    }

    let aws = if aws_arns.is_empty() && service.is_none() {
        if cfg.default_trust_principal_arns.is_empty() {
            return Err(Error::configuration(
                "no trust principals supplied and no default trust principal ARNs configured",
            ));
        }
        StringOrList::from(cfg.default_trust_principal_arns.clone())
    } else {
        StringOrList::from(aws_arns)
    };

    Ok(TrustStatement {
        effect: Effect::Allow,
        action: ASSUME_ROLE_ACTION.to_string(),
        principal: Principal {
            aws,
            service,
            ..Default::default()
        },
        condition: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config_with_defaults(arns: &[&str]) -> ValidationConfig {
        ValidationConfig {
            default_trust_principal_arns: arns.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Story: a tenant that supplies nothing gets the cluster defaults
    #[test]
    fn story_defaults_apply_when_tenant_supplies_no_principal() {
        let cfg = config_with_defaults(&["arn:aws:iam::123456789012:role/node"]);
        let doc = build_trust_policy(None, &cfg).unwrap();

        assert_eq!(doc.version, DEFAULT_POLICY_VERSION);
        assert_eq!(doc.statement.len(), 1);
        assert_eq!(doc.statement[0].action, "sts:AssumeRole");
        assert_eq!(
            doc.statement[0].principal.aws.as_slice(),
            &["arn:aws:iam::123456789012:role/node".to_string()]
        );
    }

    /// Story: no tenant principal and no configured default is a
    /// configuration error, not a silently-open trust policy
    #[test]
    fn story_missing_defaults_fail_with_configuration_error() {
        let cfg = config_with_defaults(&[]);
        let err = build_trust_policy(None, &cfg).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn tenant_aws_principals_override_defaults() {
        let cfg = config_with_defaults(&["arn:aws:iam::123456789012:role/node"]);
        let ov = TrustPolicyOverride {
            aws_principal_arns: Some(vec!["arn:aws:iam::123456789012:role/ci".to_string()]),
            ..Default::default()
        };

        let doc = build_trust_policy(Some(&ov), &cfg).unwrap();
        assert_eq!(
            doc.statement[0].principal.aws.as_slice(),
            &["arn:aws:iam::123456789012:role/ci".to_string()]
        );
    }

    #[test]
    fn service_principal_must_end_with_provider_domain() {
        let cfg = config_with_defaults(&[]);
        let ov = TrustPolicyOverride {
            service_principal: Some("ec2.amazonaws.com".to_string()),
            ..Default::default()
        };
        let doc = build_trust_policy(Some(&ov), &cfg).unwrap();
        assert_eq!(
            doc.statement[0].principal.service.as_deref(),
            Some("ec2.amazonaws.com")
        );

        let bad = TrustPolicyOverride {
            service_principal: Some("ec2.evil.example.com".to_string()),
            ..Default::default()
        };
        let err = build_trust_policy(Some(&bad), &cfg).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    /// Story: a federated override builds the web-identity form with a
    /// subject condition derived from the provider's issuer
    #[test]
    fn story_federated_override_builds_web_identity_statement() {
        let cfg = config_with_defaults(&[]);
        let ov = TrustPolicyOverride {
            oidc_provider_arn: Some(
                "arn:aws:iam::123456789012:oidc-provider/oidc.eks.us-west-2.amazonaws.com/id/ABCD"
                    .to_string(),
            ),
            oidc_subject: Some("system:serviceaccount:team-a:app".to_string()),
            ..Default::default()
        };

        let doc = build_trust_policy(Some(&ov), &cfg).unwrap();
        let stmt = &doc.statement[0];
        assert_eq!(stmt.action, "sts:AssumeRoleWithWebIdentity");
        assert!(stmt.principal.federated.as_deref().unwrap().contains("oidc-provider"));

        let cond = stmt.condition.as_ref().unwrap();
        let equals = cond.get("StringEquals").unwrap();
        assert_eq!(
            equals.get("oidc.eks.us-west-2.amazonaws.com/id/ABCD:sub"),
            Some(&"system:serviceaccount:team-a:app".to_string())
        );
    }

    /// Canonical serialization: field order is fixed by the struct, so two
    /// builds of the same inputs produce byte-identical JSON
    #[test]
    fn serialization_is_canonical() {
        let cfg = config_with_defaults(&["arn:aws:iam::123456789012:role/node"]);
        let a = build_trust_policy(None, &cfg).unwrap().to_json().unwrap();
        let b = build_trust_policy(None, &cfg).unwrap().to_json().unwrap();
        assert_eq!(a, b);

        let value: serde_json::Value = serde_json::from_str(&a).unwrap();
        assert_eq!(value["Statement"][0]["Effect"], json!("Allow"));
        // Single default principal re-emits in the bare-string form
        assert_eq!(
            value["Statement"][0]["Principal"]["AWS"],
            json!("arn:aws:iam::123456789012:role/node")
        );
    }

    #[test]
    fn trust_document_round_trips() {
        let cfg = config_with_defaults(&["arn:aws:iam::123456789012:role/node"]);
        let doc = build_trust_policy(None, &cfg).unwrap();
        let parsed = TrustPolicyDocument::from_json(&doc.to_json().unwrap()).unwrap();
        assert_eq!(doc, parsed);
    }
}
