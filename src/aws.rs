//! AWS session construction: region pinning and cross-account role assumption.

use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_s3::config::{Credentials, SharedCredentialsProvider};
use snafu::prelude::*;
use tracing::debug;

use crate::error::{AssumeRoleSnafu, MfaTokenSnafu, NoCredentialsSnafu, StorageError};

/// Home region used to bootstrap bucket location lookups and as the
/// fallback for buckets whose location constraint is empty.
pub const DEFAULT_REGION: &str = "us-east-1";

const SESSION_NAME: &str = "curvert";

/// A cross-account role to assume for one side of a transfer.
#[derive(Debug, Clone)]
pub struct RoleSpec {
    pub role_arn: String,
    pub external_id: Option<String>,
    pub mfa_serial: Option<String>,
}

impl RoleSpec {
    /// Build a spec from optional CLI inputs; `None` when no role is given.
    pub fn from_options(
        role_arn: Option<String>,
        external_id: Option<String>,
        mfa_serial: Option<String>,
    ) -> Option<Self> {
        role_arn.map(|role_arn| RoleSpec {
            role_arn,
            external_id,
            mfa_serial,
        })
    }
}

/// Load the ambient AWS configuration pinned to a region.
pub async fn base_config(region: &str) -> SdkConfig {
    aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .load()
        .await
}

/// Derive a session from `base` by assuming `role`.
///
/// External ID and MFA serial pass through unchanged; an MFA serial
/// triggers a token prompt on stdin.
pub async fn assumed_config(base: &SdkConfig, role: &RoleSpec) -> Result<SdkConfig, StorageError> {
    let sts = aws_sdk_sts::Client::new(base);
    let mut request = sts
        .assume_role()
        .role_arn(&role.role_arn)
        .role_session_name(SESSION_NAME);
    if let Some(external_id) = &role.external_id {
        request = request.external_id(external_id);
    }
    if let Some(serial) = &role.mfa_serial {
        request = request
            .serial_number(serial)
            .token_code(read_mfa_token(serial)?);
    }

    let output = request.send().await.context(AssumeRoleSnafu {
        role_arn: role.role_arn.clone(),
    })?;
    let granted = output.credentials().context(NoCredentialsSnafu {
        role_arn: role.role_arn.clone(),
    })?;
    debug!(role_arn = %role.role_arn, "assumed role");

    let credentials = Credentials::new(
        granted.access_key_id(),
        granted.secret_access_key(),
        Some(granted.session_token().to_string()),
        None,
        "curvert-assume-role",
    );
    Ok(base
        .to_builder()
        .credentials_provider(SharedCredentialsProvider::new(credentials))
        .build())
}

/// Load a session for `region`, assuming `role` first when one is given.
pub async fn session_config(
    region: &str,
    role: Option<&RoleSpec>,
) -> Result<SdkConfig, StorageError> {
    let base = base_config(region).await;
    match role {
        Some(role) => assumed_config(&base, role).await,
        None => Ok(base),
    }
}

fn read_mfa_token(serial: &str) -> Result<String, StorageError> {
    eprint!("MFA token code for {serial}: ");
    let mut code = String::new();
    std::io::stdin()
        .read_line(&mut code)
        .context(MfaTokenSnafu)?;
    Ok(code.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_spec_requires_arn() {
        assert!(RoleSpec::from_options(None, Some("id".into()), None).is_none());

        let spec = RoleSpec::from_options(
            Some("arn:aws:iam::123456789012:role/cur".into()),
            Some("id".into()),
            None,
        )
        .unwrap();
        assert_eq!(spec.role_arn, "arn:aws:iam::123456789012:role/cur");
        assert_eq!(spec.external_id.as_deref(), Some("id"));
        assert!(spec.mfa_serial.is_none());
    }
}
