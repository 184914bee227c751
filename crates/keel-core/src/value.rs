// Keel Core - Value sources and parameters
//
// A ValueSource is the tagged union used wherever a resource field can be a
// literal or a reference into an external store (ConfigMap key, Secret key,
// Service). Parameters extend the union with queryParameterRef so agent and
// evaluator parameters can pull values out of the enclosing query.
//
// Exactly one variant must be set; unknown options fail validation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::client::ClusterClient;
use crate::error::{KeelError, KeelResult};
use crate::resources::{ConfigMap, Secret};

/// Literal value or reference to an external store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ValueSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_from: Option<ValueFrom>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ValueFrom {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_map_key_ref: Option<KeySelector>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_key_ref: Option<KeySelector>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_ref: Option<ServiceRef>,
}

/// Reference to one key of a ConfigMap or Secret
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct KeySelector {
    pub name: String,
    pub key: String,
    /// Optional references that resolve to a missing object yield ""
    #[serde(default)]
    pub optional: bool,
}

/// Reference to a cluster Service; resolves to a service-DNS URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ServiceRef {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ValueSource {
    pub fn literal(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            value_from: None,
        }
    }
}

/// Resolve a value source within `namespace`.
pub async fn resolve_value(
    cluster: &ClusterClient,
    namespace: &str,
    source: &ValueSource,
) -> KeelResult<String> {
    match (&source.value, &source.value_from) {
        (Some(value), None) => Ok(value.clone()),
        (None, Some(from)) => resolve_value_from(cluster, namespace, from).await,
        (Some(_), Some(_)) => Err(KeelError::validation(
            "value and valueFrom are mutually exclusive",
        )),
        (None, None) => Err(KeelError::Unsupported("empty value source".to_string())),
    }
}

async fn resolve_value_from(
    cluster: &ClusterClient,
    namespace: &str,
    from: &ValueFrom,
) -> KeelResult<String> {
    let set = [
        from.config_map_key_ref.is_some(),
        from.secret_key_ref.is_some(),
        from.service_ref.is_some(),
    ]
    .iter()
    .filter(|s| **s)
    .count();
    if set != 1 {
        return Err(KeelError::validation(
            "valueFrom must set exactly one of configMapKeyRef, secretKeyRef, serviceRef",
        ));
    }

    if let Some(selector) = &from.config_map_key_ref {
        let config_map: Option<ConfigMap> = cluster.get(namespace, &selector.name).await?;
        return lookup_key(config_map.map(|c| c.data), "ConfigMap", selector);
    }

    if let Some(selector) = &from.secret_key_ref {
        let secret: Option<Secret> = cluster.get(namespace, &selector.name).await?;
        return lookup_key(secret.map(|s| s.data), "Secret", selector);
    }

    let service = from.service_ref.as_ref().unwrap();
    let ns = service.namespace.as_deref().unwrap_or(namespace);
    let port = service
        .port
        .map(|p| format!(":{}", p))
        .unwrap_or_default();
    let path = service.path.as_deref().unwrap_or("");
    Ok(format!(
        "http://{}.{}.svc.cluster.local{}{}",
        service.name, ns, port, path
    ))
}

fn lookup_key(
    data: Option<HashMap<String, String>>,
    kind: &str,
    selector: &KeySelector,
) -> KeelResult<String> {
    match data {
        None if selector.optional => Ok(String::new()),
        None => Err(KeelError::not_found(kind, &selector.name)),
        Some(data) => data
            .get(&selector.key)
            .cloned()
            .ok_or_else(|| KeelError::key_missing(kind, &selector.name, &selector.key)),
    }
}

/// Named parameter: literal, store-backed, or pulled from query parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Parameter {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_from: Option<ParameterFrom>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ParameterFrom {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_map_key_ref: Option<KeySelector>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_key_ref: Option<KeySelector>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_parameter_ref: Option<QueryParameterRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct QueryParameterRef {
    pub name: String,
}

impl Parameter {
    pub fn literal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            value_from: None,
        }
    }
}

/// Resolve a parameter list into a name → value map.
///
/// `query_parameters` feeds queryParameterRef entries; missing query
/// parameters are a resolution failure.
pub async fn resolve_parameters(
    cluster: &ClusterClient,
    namespace: &str,
    parameters: &[Parameter],
    query_parameters: &HashMap<String, String>,
) -> KeelResult<HashMap<String, String>> {
    let mut resolved = HashMap::new();
    for parameter in parameters {
        let value = match (&parameter.value, &parameter.value_from) {
            (Some(value), None) => value.clone(),
            (None, Some(from)) => {
                resolve_parameter_from(cluster, namespace, &parameter.name, from, query_parameters)
                    .await?
            }
            (Some(_), Some(_)) => {
                return Err(KeelError::validation(format!(
                    "parameter {} sets both value and valueFrom",
                    parameter.name
                )))
            }
            (None, None) => {
                return Err(KeelError::validation(format!(
                    "parameter {} has no value",
                    parameter.name
                )))
            }
        };
        resolved.insert(parameter.name.clone(), value);
    }
    Ok(resolved)
}

async fn resolve_parameter_from(
    cluster: &ClusterClient,
    namespace: &str,
    name: &str,
    from: &ParameterFrom,
    query_parameters: &HashMap<String, String>,
) -> KeelResult<String> {
    if let Some(query_ref) = &from.query_parameter_ref {
        return query_parameters
            .get(&query_ref.name)
            .cloned()
            .ok_or_else(|| {
                KeelError::resolution(format!(
                    "parameter {} references missing query parameter {}",
                    name, query_ref.name
                ))
            });
    }

    let source = ValueSource {
        value: None,
        value_from: Some(ValueFrom {
            config_map_key_ref: from.config_map_key_ref.clone(),
            secret_key_ref: from.secret_key_ref.clone(),
            service_ref: None,
        }),
    };
    resolve_value(cluster, namespace, &source).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::InMemoryCluster;
    use crate::meta::ObjectMeta;
    use std::sync::Arc;

    async fn cluster_with_stores() -> ClusterClient {
        let cluster = ClusterClient::new(Arc::new(InMemoryCluster::new()));

        let mut config_map = ConfigMap {
            api_version: "v1".to_string(),
            kind: "ConfigMap".to_string(),
            metadata: ObjectMeta::named("settings", "default"),
            data: HashMap::new(),
        };
        config_map
            .data
            .insert("endpoint".to_string(), "http://inner".to_string());
        cluster.create(&config_map).await.unwrap();

        let mut secret = Secret {
            api_version: "v1".to_string(),
            kind: "Secret".to_string(),
            metadata: ObjectMeta::named("keys", "default"),
            data: HashMap::new(),
        };
        secret.data.insert("token".to_string(), "s3cr3t".to_string());
        cluster.create(&secret).await.unwrap();

        cluster
    }

    #[tokio::test]
    async fn test_literal_value() {
        let cluster = ClusterClient::new(Arc::new(InMemoryCluster::new()));
        let value = resolve_value(&cluster, "default", &ValueSource::literal("x"))
            .await
            .unwrap();
        assert_eq!(value, "x");
    }

    #[tokio::test]
    async fn test_config_map_and_secret_refs() {
        let cluster = cluster_with_stores().await;

        let source: ValueSource = serde_json::from_str(
            r#"{"valueFrom": {"configMapKeyRef": {"name": "settings", "key": "endpoint"}}}"#,
        )
        .unwrap();
        assert_eq!(
            resolve_value(&cluster, "default", &source).await.unwrap(),
            "http://inner"
        );

        let source: ValueSource = serde_json::from_str(
            r#"{"valueFrom": {"secretKeyRef": {"name": "keys", "key": "token"}}}"#,
        )
        .unwrap();
        assert_eq!(
            resolve_value(&cluster, "default", &source).await.unwrap(),
            "s3cr3t"
        );
    }

    #[tokio::test]
    async fn test_optional_missing_config_map_yields_empty() {
        let cluster = ClusterClient::new(Arc::new(InMemoryCluster::new()));
        let source: ValueSource = serde_json::from_str(
            r#"{"valueFrom": {"configMapKeyRef": {"name": "nope", "key": "k", "optional": true}}}"#,
        )
        .unwrap();
        assert_eq!(resolve_value(&cluster, "default", &source).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_missing_key_is_an_error_even_when_optional_object_exists() {
        let cluster = cluster_with_stores().await;
        let source: ValueSource = serde_json::from_str(
            r#"{"valueFrom": {"configMapKeyRef": {"name": "settings", "key": "absent"}}}"#,
        )
        .unwrap();
        let err = resolve_value(&cluster, "default", &source).await.unwrap_err();
        assert!(matches!(err, KeelError::KeyMissing { .. }));
    }

    #[tokio::test]
    async fn test_service_ref_builds_dns_url() {
        let cluster = ClusterClient::new(Arc::new(InMemoryCluster::new()));
        let source: ValueSource = serde_json::from_str(
            r#"{"valueFrom": {"serviceRef": {"name": "memory", "port": 8080, "path": "/v1"}}}"#,
        )
        .unwrap();
        assert_eq!(
            resolve_value(&cluster, "team-a", &source).await.unwrap(),
            "http://memory.team-a.svc.cluster.local:8080/v1"
        );
    }

    #[tokio::test]
    async fn test_unknown_parameter_option_rejected() {
        let result: Result<Parameter, _> =
            serde_json::from_str(r#"{"name": "p", "valueFrom": {"podFieldRef": {"name": "x"}}}"#);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_query_parameter_ref() {
        let cluster = ClusterClient::new(Arc::new(InMemoryCluster::new()));
        let parameters = vec![
            Parameter::literal("a", "1"),
            serde_json::from_str(
                r#"{"name": "b", "valueFrom": {"queryParameterRef": {"name": "user_input"}}}"#,
            )
            .unwrap(),
        ];
        let mut query_parameters = HashMap::new();
        query_parameters.insert("user_input".to_string(), "hi".to_string());

        let resolved = resolve_parameters(&cluster, "default", &parameters, &query_parameters)
            .await
            .unwrap();
        assert_eq!(resolved["a"], "1");
        assert_eq!(resolved["b"], "hi");
    }
}
