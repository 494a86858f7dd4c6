//! The attested secret service.
//!
//! Authenticates the bootstrap agent through a token review, binds the
//! caller identity to the pod it claims to run as, validates the command
//! signature written at admission time, fetches the secret payload and
//! returns only non-reserved environment entries.

pub mod aws;

use crate::config::{
    self, AWS_REGION, AWS_SECRET_NAME, AWS_SSM_PARAMETER_PATH, PIGGY_DEFAULT_SECRET_NAME_PREFIX,
    PIGGY_DEFAULT_SECRET_NAME_SUFFIX, PIGGY_ENFORCE_INTEGRITY, PIGGY_ENFORCE_SERVICE_ACCOUNT,
    PIGGY_SECRET_VERSION_STAGE,
};
use crate::mutate::{SignatureManifest, manifest_annotation};
use crate::service::aws::{ParameterStore, SecretsStore};
use actix_web::http::StatusCode;
use k8s_openapi::api::authentication::v1::{TokenReview, TokenReviewSpec};
use k8s_openapi::api::core::v1::Pod;
use kube::api::PostParams;
use kube::{Api, Client};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Environment variable names reserved for piggy's internal wiring. They are
/// never returned by the server and never kept by the agent.
pub const RESERVED_ENV_NAMES: [&str; 15] = [
    "PIGGY_AWS_SECRET_NAME",
    "PIGGY_AWS_SSM_PARAMETER_PATH",
    "PIGGY_AWS_REGION",
    "PIGGY_POD_NAME",
    "PIGGY_DEBUG",
    "PIGGY_STANDALONE",
    "PIGGY_ADDRESS",
    "PIGGY_ALLOWED_SA",
    "PIGGY_SKIP_VERIFY_TLS",
    "PIGGY_IGNORE_NO_ENV",
    "PIGGY_DEFAULT_SECRET_NAME_PREFIX",
    "PIGGY_DEFAULT_SECRET_NAME_SUFFIX",
    "PIGGY_DNS_RESOLVER",
    "PIGGY_INITIAL_DELAY",
    "PIGGY_NUMBER_OF_RETRY",
];

const ALLOWED_SA_KEY: &str = "PIGGY_ALLOWED_SA";
const SERVICE_ACCOUNT_USERNAME_PREFIX: &str = "system:serviceaccount:";
const DEFAULT_VERSION_STAGE: &str = "AWSCURRENT";

/// The request body of `POST /secret`. The identity token travels in the
/// `X-Token` header, never in the body.
#[derive(Debug, Default, Deserialize)]
pub struct GetSecretPayload {
    #[serde(default)]
    pub resources: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub signature: String,
}

/// Environment entries cleared for return to the agent. Reserved names are
/// rejected at insertion.
#[derive(Debug, Default, Serialize, PartialEq)]
#[serde(transparent)]
pub struct SanitizedEnv(BTreeMap<String, String>);

impl SanitizedEnv {
    pub fn append(&mut self, name: &str, value: &str) {
        if !RESERVED_ENV_NAMES.contains(&name) {
            self.0.insert(name.to_string(), value.to_string());
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SecretServiceError {
    #[error("unsupported resources `{0}`, only pods is supported")]
    UnsupportedResource(String),

    #[error("token is not authenticated")]
    TokenUnauthenticated,

    #[error("token subject is not a service account")]
    InvalidTokenSubject,

    #[error("pod {name} not found in {namespace} namespace")]
    PodNotFound { name: String, namespace: String },

    #[error("invalid service account found {found}, expected {expected}")]
    ServiceAccountMismatch { found: String, expected: String },

    #[error("{0} invalid signature")]
    InvalidSignature(String),

    #[error("{0} invalid uid")]
    InvalidUid(String),

    #[error("access denied")]
    AccessDenied,

    #[error("secret payload is not a JSON object of strings: {0}")]
    MalformedSecret(String),

    #[error("the kube client returned an error: `{0}`")]
    Kube(#[from] kube::Error),

    #[error(transparent)]
    Store(#[from] aws::StoreError),
}

impl SecretServiceError {
    /// Maps the error kind to an HTTP status: authorization failures are
    /// 403, transport failures 5xx, everything else 400.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::AccessDenied => StatusCode::FORBIDDEN,
            Self::Kube(_) | Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// The pipeline of one secret request, after token review and pod lookup.
struct RequestConfig {
    secret_name: String,
    ssm_parameter_path: String,
    region: String,
    version_stage: String,
    enforce_integrity: bool,
    enforce_service_account: bool,
}

pub struct SecretService {
    client: Client,
    secrets: Arc<dyn SecretsStore>,
    parameters: Arc<dyn ParameterStore>,
}

impl SecretService {
    pub fn new(
        client: Client,
        secrets: Arc<dyn SecretsStore>,
        parameters: Arc<dyn ParameterStore>,
    ) -> Self {
        Self {
            client,
            secrets,
            parameters,
        }
    }

    /// Validates the caller identity and binding, fetches the secret payload
    /// and returns the sanitized environment.
    pub async fn get_secret(
        &self,
        token: &str,
        payload: &GetSecretPayload,
    ) -> Result<SanitizedEnv, SecretServiceError> {
        if payload.resources != "pods" {
            return Err(SecretServiceError::UnsupportedResource(
                payload.resources.clone(),
            ));
        }

        let (namespace, service_account) = self.review_token(token).await?;
        debug!(service_account = %format!("{namespace}:{service_account}"), pod = %payload.name, "request authenticated");

        let pod = self.lookup_pod(&namespace, &payload.name).await?;
        let pod_service_account = pod
            .spec
            .as_ref()
            .and_then(|spec| spec.service_account_name.clone())
            .unwrap_or_else(|| "default".to_string());
        if pod_service_account != service_account {
            return Err(SecretServiceError::ServiceAccountMismatch {
                found: format!("{namespace}:{pod_service_account}"),
                expected: format!("{namespace}:{service_account}"),
            });
        }

        let annotations = pod.metadata.annotations.clone().unwrap_or_default();
        let request_config = request_config(&annotations, &namespace, &service_account);
        self.verify_signature(&annotations, payload, request_config.enforce_integrity)?;

        let secrets = if !request_config.ssm_parameter_path.is_empty() {
            debug!(path = %request_config.ssm_parameter_path, "reading parameter store");
            self.parameters
                .get_parameters_by_path(&request_config.region, &request_config.ssm_parameter_path)
                .await?
        } else {
            debug!(secret = %request_config.secret_name, "reading secrets manager");
            match self
                .secrets
                .get_secret_value(
                    &request_config.region,
                    &request_config.secret_name,
                    &request_config.version_stage,
                )
                .await?
            {
                Some(body) => serde_json::from_str::<BTreeMap<String, String>>(&body)
                    .map_err(|err| SecretServiceError::MalformedSecret(err.to_string()))?,
                None => {
                    info!("a binary secret is not supported");
                    BTreeMap::new()
                }
            }
        };

        process_secret(
            &secrets,
            &format!("{namespace}:{service_account}"),
            request_config.enforce_service_account,
        )
    }

    /// Submits the token to the cluster's authentication review API and
    /// parses the authenticated username as a service account.
    async fn review_token(&self, token: &str) -> Result<(String, String), SecretServiceError> {
        let review = TokenReview {
            spec: TokenReviewSpec {
                token: Some(token.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let api: Api<TokenReview> = Api::all(self.client.clone());
        let reviewed = api.create(&PostParams::default(), &review).await?;
        let status = reviewed.status.unwrap_or_default();
        if !status.authenticated.unwrap_or(false) {
            return Err(SecretServiceError::TokenUnauthenticated);
        }
        let username = status.user.unwrap_or_default().username.unwrap_or_default();
        let subject = username
            .strip_prefix(SERVICE_ACCOUNT_USERNAME_PREFIX)
            .ok_or(SecretServiceError::InvalidTokenSubject)?;
        let (namespace, service_account) = subject
            .split_once(':')
            .ok_or(SecretServiceError::InvalidTokenSubject)?;
        if namespace.is_empty() || service_account.is_empty() {
            return Err(SecretServiceError::InvalidTokenSubject);
        }
        Ok((namespace.to_string(), service_account.to_string()))
    }

    async fn lookup_pod(&self, namespace: &str, name: &str) -> Result<Pod, SecretServiceError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(pod) => Ok(pod),
            Err(kube::Error::Api(response)) if response.code == 404 => {
                Err(SecretServiceError::PodNotFound {
                    name: name.to_string(),
                    namespace: namespace.to_string(),
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Validates the payload against the manifest written at admission time.
    /// With integrity enforcement the signature must match exactly; without
    /// it the uid must at least exist.
    fn verify_signature(
        &self,
        annotations: &BTreeMap<String, String>,
        payload: &GetSecretPayload,
        enforce_integrity: bool,
    ) -> Result<(), SecretServiceError> {
        let manifest: SignatureManifest = annotations
            .get(&manifest_annotation())
            .and_then(|raw| {
                serde_json::from_str(raw)
                    .inspect_err(|err| error!(pod = %payload.name, %err, "cannot parse signature manifest"))
                    .ok()
            })
            .unwrap_or_default();
        if enforce_integrity {
            if manifest.get(&payload.uid) != Some(&payload.signature) {
                return Err(SecretServiceError::InvalidSignature(payload.name.clone()));
            }
        } else if manifest.get(&payload.uid).is_none_or(|signature| signature.is_empty()) {
            return Err(SecretServiceError::InvalidUid(payload.name.clone()));
        }
        Ok(())
    }
}

/// Resolves the per-request configuration from the target pod's annotations.
/// `piggy-enforce-service-account` deliberately ignores pod annotations; a
/// pod must not be able to relax enforcement for itself.
fn request_config(
    annotations: &BTreeMap<String, String>,
    namespace: &str,
    service_account: &str,
) -> RequestConfig {
    let prefix = config::get_string(annotations, PIGGY_DEFAULT_SECRET_NAME_PREFIX, "");
    let suffix = config::get_string(annotations, PIGGY_DEFAULT_SECRET_NAME_SUFFIX, "");
    let default_secret_name = format!("{prefix}{namespace}/{service_account}{suffix}");
    RequestConfig {
        secret_name: config::get_string(annotations, AWS_SECRET_NAME, &default_secret_name),
        ssm_parameter_path: config::get_string(annotations, AWS_SSM_PARAMETER_PATH, ""),
        region: config::get_string(annotations, AWS_REGION, ""),
        version_stage: config::get_string(
            annotations,
            PIGGY_SECRET_VERSION_STAGE,
            DEFAULT_VERSION_STAGE,
        ),
        enforce_integrity: config::get_bool(annotations, PIGGY_ENFORCE_INTEGRITY, true),
        enforce_service_account: config::get_bool(
            &BTreeMap::new(),
            PIGGY_ENFORCE_SERVICE_ACCOUNT,
            false,
        ),
    }
}

/// Applies the allow-list and strips reserved names from the payload.
fn process_secret(
    secrets: &BTreeMap<String, String>,
    caller: &str,
    enforce_service_account: bool,
) -> Result<SanitizedEnv, SecretServiceError> {
    let allowed = match secrets.get(ALLOWED_SA_KEY) {
        Some(allow_list) => {
            debug!(%caller, "matching caller against allow-list");
            allow_list.split(',').any(|entry| entry.trim() == caller)
        }
        None => !enforce_service_account,
    };
    if !allowed {
        return Err(SecretServiceError::AccessDenied);
    }
    let mut env = SanitizedEnv::default();
    for (name, value) in secrets {
        env.append(name, value);
    }
    Ok(env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::aws::{MockParameterStore, MockSecretsStore};
    use assert_matches::assert_matches;
    use kube::client::Body;
    use tower_test::mock::{self, Handle};

    fn token_review_response(authenticated: bool, username: &str) -> serde_json::Value {
        serde_json::json!({
            "apiVersion": "authentication.k8s.io/v1",
            "kind": "TokenReview",
            "status": {
                "authenticated": authenticated,
                "user": {"username": username}
            }
        })
    }

    fn pod_response(
        name: &str,
        namespace: &str,
        service_account: &str,
        annotations: serde_json::Value,
    ) -> serde_json::Value {
        serde_json::json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": name, "namespace": namespace, "annotations": annotations},
            "spec": {"serviceAccountName": service_account, "containers": []}
        })
    }

    /// Replays the API server conversation of one secret request: a token
    /// review create followed by a pod get.
    fn mocked_client(token_review: serde_json::Value, pod: Option<serde_json::Value>) -> Client {
        let (service, mut handle) =
            mock::pair::<http::Request<Body>, http::Response<Body>>();
        tokio::spawn(async move {
            respond(&mut handle, 201, token_review).await;
            match pod {
                Some(pod) => respond(&mut handle, 200, pod).await,
                None => {
                    respond(
                        &mut handle,
                        404,
                        serde_json::json!({
                            "kind": "Status",
                            "apiVersion": "v1",
                            "status": "Failure",
                            "message": "pods not found",
                            "reason": "NotFound",
                            "code": 404
                        }),
                    )
                    .await
                }
            }
        });
        Client::new(service, "default")
    }

    async fn respond(
        handle: &mut Handle<http::Request<Body>, http::Response<Body>>,
        status: u16,
        body: serde_json::Value,
    ) {
        let Some((_request, send)) = handle.next_request().await else {
            return;
        };
        send.send_response(
            http::Response::builder()
                .status(status)
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        );
    }

    fn payload(name: &str, uid: &str, signature: &str) -> GetSecretPayload {
        GetSecretPayload {
            resources: "pods".to_string(),
            name: name.to_string(),
            uid: uid.to_string(),
            signature: signature.to_string(),
        }
    }

    fn manifest_annotations(uid: &str, signature: &str) -> serde_json::Value {
        serde_json::json!({
            "piggysec.com/aws-secret-name": "myapp",
            "piggysec.com/piggy-uid": format!("{{\"{uid}\":\"{signature}\"}}")
        })
    }

    fn service_with(
        client: Client,
        secrets: MockSecretsStore,
        parameters: MockParameterStore,
    ) -> SecretService {
        SecretService::new(client, Arc::new(secrets), Arc::new(parameters))
    }

    fn secrets_returning(body: serde_json::Value) -> MockSecretsStore {
        let mut secrets = MockSecretsStore::new();
        secrets
            .expect_get_secret_value()
            .returning(move |_, _, _| Ok(Some(body.to_string())));
        secrets
    }

    #[tokio::test]
    async fn returns_sanitized_secrets() {
        let client = mocked_client(
            token_review_response(true, "system:serviceaccount:ns-a:sa-x"),
            Some(pod_response("p1", "ns-a", "sa-x", manifest_annotations("aaaa", "s1"))),
        );
        let secrets = secrets_returning(serde_json::json!({
            "DB": "p@ss",
            "PIGGY_AWS_REGION": "should-be-stripped"
        }));
        let service = service_with(client, secrets, MockParameterStore::new());

        let env = service
            .get_secret("token", &payload("p1", "aaaa", "s1"))
            .await
            .unwrap();
        assert_eq!(env.get("DB"), Some("p@ss"));
        assert_eq!(env.len(), 1);
    }

    #[tokio::test]
    async fn rejects_non_pod_resources() {
        let client = mocked_client(token_review_response(true, "x"), None);
        let service = service_with(client, MockSecretsStore::new(), MockParameterStore::new());
        let mut bad = payload("p1", "aaaa", "s1");
        bad.resources = "deployments".to_string();
        let err = service.get_secret("token", &bad).await.unwrap_err();
        assert_matches!(err, SecretServiceError::UnsupportedResource(_));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn rejects_unauthenticated_token() {
        let client = mocked_client(token_review_response(false, ""), None);
        let service = service_with(client, MockSecretsStore::new(), MockParameterStore::new());
        let err = service
            .get_secret("token", &payload("p1", "aaaa", "s1"))
            .await
            .unwrap_err();
        assert_matches!(err, SecretServiceError::TokenUnauthenticated);
    }

    #[tokio::test]
    async fn rejects_non_service_account_subject() {
        let client = mocked_client(token_review_response(true, "system:node:worker-1"), None);
        let service = service_with(client, MockSecretsStore::new(), MockParameterStore::new());
        let err = service
            .get_secret("token", &payload("p1", "aaaa", "s1"))
            .await
            .unwrap_err();
        assert_matches!(err, SecretServiceError::InvalidTokenSubject);
    }

    #[tokio::test]
    async fn rejects_missing_pod() {
        let client = mocked_client(
            token_review_response(true, "system:serviceaccount:ns-a:sa-x"),
            None,
        );
        let service = service_with(client, MockSecretsStore::new(), MockParameterStore::new());
        let err = service
            .get_secret("token", &payload("p1", "aaaa", "s1"))
            .await
            .unwrap_err();
        assert_matches!(err, SecretServiceError::PodNotFound { .. });
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn rejects_service_account_mismatch() {
        let client = mocked_client(
            token_review_response(true, "system:serviceaccount:ns-a:sa-x"),
            Some(pod_response("p1", "ns-a", "sa-y", manifest_annotations("aaaa", "s1"))),
        );
        let service = service_with(client, MockSecretsStore::new(), MockParameterStore::new());
        let err = service
            .get_secret("token", &payload("p1", "aaaa", "s1"))
            .await
            .unwrap_err();
        assert_matches!(err, SecretServiceError::ServiceAccountMismatch { .. });
    }

    #[tokio::test]
    async fn rejects_signature_mismatch() {
        let client = mocked_client(
            token_review_response(true, "system:serviceaccount:ns-a:sa-x"),
            Some(pod_response("p1", "ns-a", "sa-x", manifest_annotations("aaaa", "s1"))),
        );
        let service = service_with(client, MockSecretsStore::new(), MockParameterStore::new());
        let err = service
            .get_secret("token", &payload("p1", "aaaa", "s2"))
            .await
            .unwrap_err();
        assert_matches!(err, SecretServiceError::InvalidSignature(_));
    }

    #[tokio::test]
    async fn missing_uid_without_enforcement_is_invalid() {
        let annotations = serde_json::json!({
            "piggysec.com/aws-secret-name": "myapp",
            "piggysec.com/piggy-enforce-integrity": "false",
            "piggysec.com/piggy-uid": "{\"bbbb\":\"s1\"}"
        });
        let client = mocked_client(
            token_review_response(true, "system:serviceaccount:ns-a:sa-x"),
            Some(pod_response("p1", "ns-a", "sa-x", annotations)),
        );
        let service = service_with(client, MockSecretsStore::new(), MockParameterStore::new());
        let err = service
            .get_secret("token", &payload("p1", "aaaa", "whatever"))
            .await
            .unwrap_err();
        assert_matches!(err, SecretServiceError::InvalidUid(_));
    }

    #[tokio::test]
    async fn known_uid_without_enforcement_skips_signature() {
        let annotations = serde_json::json!({
            "piggysec.com/aws-secret-name": "myapp",
            "piggysec.com/piggy-enforce-integrity": "false",
            "piggysec.com/piggy-uid": "{\"aaaa\":\"s1\"}"
        });
        let client = mocked_client(
            token_review_response(true, "system:serviceaccount:ns-a:sa-x"),
            Some(pod_response("p1", "ns-a", "sa-x", annotations)),
        );
        let secrets = secrets_returning(serde_json::json!({"DB": "p@ss"}));
        let service = service_with(client, secrets, MockParameterStore::new());
        let env = service
            .get_secret("token", &payload("p1", "aaaa", "not-the-signature"))
            .await
            .unwrap();
        assert_eq!(env.get("DB"), Some("p@ss"));
    }

    #[tokio::test]
    async fn allow_list_admits_listed_caller() {
        let client = mocked_client(
            token_review_response(true, "system:serviceaccount:ns-a:sa-x"),
            Some(pod_response("p1", "ns-a", "sa-x", manifest_annotations("aaaa", "s1"))),
        );
        let secrets = secrets_returning(serde_json::json!({
            "PIGGY_ALLOWED_SA": "ns-a:sa-x,ns-b:sa-y",
            "DB": "p@ss"
        }));
        let service = service_with(client, secrets, MockParameterStore::new());
        let env = service
            .get_secret("token", &payload("p1", "aaaa", "s1"))
            .await
            .unwrap();
        assert_eq!(env.get("DB"), Some("p@ss"));
        assert!(env.get("PIGGY_ALLOWED_SA").is_none());
    }

    #[tokio::test]
    async fn allow_list_rejects_unlisted_caller() {
        let client = mocked_client(
            token_review_response(true, "system:serviceaccount:ns-a:sa-x"),
            Some(pod_response("p1", "ns-a", "sa-x", manifest_annotations("aaaa", "s1"))),
        );
        let secrets = secrets_returning(serde_json::json!({
            "PIGGY_ALLOWED_SA": "ns-b:sa-y",
            "DB": "p@ss"
        }));
        let service = service_with(client, secrets, MockParameterStore::new());
        let err = service
            .get_secret("token", &payload("p1", "aaaa", "s1"))
            .await
            .unwrap_err();
        assert_matches!(err, SecretServiceError::AccessDenied);
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn parameter_path_reads_parameter_store() {
        let annotations = serde_json::json!({
            "piggysec.com/aws-ssm-parameter-path": "/exp/sample",
            "piggysec.com/piggy-uid": "{\"aaaa\":\"s1\"}"
        });
        let client = mocked_client(
            token_review_response(true, "system:serviceaccount:ns-a:sa-x"),
            Some(pod_response("p1", "ns-a", "sa-x", annotations)),
        );
        let mut parameters = MockParameterStore::new();
        parameters
            .expect_get_parameters_by_path()
            .withf(|_, path| path == "/exp/sample")
            .returning(|_, _| {
                Ok(BTreeMap::from([("DB".to_string(), "p@ss".to_string())]))
            });
        let service = service_with(client, MockSecretsStore::new(), parameters);
        let env = service
            .get_secret("token", &payload("p1", "aaaa", "s1"))
            .await
            .unwrap();
        assert_eq!(env.get("DB"), Some("p@ss"));
    }

    #[tokio::test]
    async fn binary_secret_yields_empty_env() {
        let client = mocked_client(
            token_review_response(true, "system:serviceaccount:ns-a:sa-x"),
            Some(pod_response("p1", "ns-a", "sa-x", manifest_annotations("aaaa", "s1"))),
        );
        let mut secrets = MockSecretsStore::new();
        secrets
            .expect_get_secret_value()
            .returning(|_, _, _| Ok(None));
        let service = service_with(client, secrets, MockParameterStore::new());
        let env = service
            .get_secret("token", &payload("p1", "aaaa", "s1"))
            .await
            .unwrap();
        assert!(env.is_empty());
    }

    #[test]
    fn default_secret_name_uses_prefix_and_suffix() {
        let annotations: BTreeMap<String, String> = BTreeMap::from([
            (
                "piggysec.com/piggy-default-secret-name-prefix".to_string(),
                "exp/".to_string(),
            ),
            (
                "piggysec.com/piggy-default-secret-name-suffix".to_string(),
                "/env".to_string(),
            ),
        ]);
        let resolved = request_config(&annotations, "ns-a", "sa-x");
        assert_eq!(resolved.secret_name, "exp/ns-a/sa-x/env");
        assert_eq!(resolved.version_stage, "AWSCURRENT");
        assert!(resolved.enforce_integrity);
    }

    #[test]
    fn reserved_names_never_survive() {
        let mut env = SanitizedEnv::default();
        for name in RESERVED_ENV_NAMES {
            env.append(name, "value");
        }
        env.append("APP", "hello");
        assert_eq!(env.len(), 1);
        assert_eq!(env.get("APP"), Some("hello"));
    }

    #[test]
    fn enforcement_without_allow_list_denies() {
        let secrets = BTreeMap::from([("DB".to_string(), "p@ss".to_string())]);
        let err = process_secret(&secrets, "ns-a:sa-x", true).unwrap_err();
        assert_matches!(err, SecretServiceError::AccessDenied);
        let env = process_secret(&secrets, "ns-a:sa-x", false).unwrap();
        assert_eq!(env.get("DB"), Some("p@ss"));
    }
}
