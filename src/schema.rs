use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::connector::Connector;

/// Where a resolved field list came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldSource {
    Api,
    Fallback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedSchema {
    pub fields: Vec<String>,
    pub source: FieldSource,
}

/// Resolves the field list for an object type, preferring the connector's
/// schema endpoint and degrading to a static per-object-type default so
/// mapping setup keeps working when the upstream is unreachable.
pub struct SchemaResolver;

impl SchemaResolver {
    pub async fn resolve(connector: &dyn Connector, object_type: &str) -> Result<ResolvedSchema> {
        let described = connector.describe_fields(object_type).await;
        match described {
            Ok(fields) if !fields.is_empty() => Ok(ResolvedSchema {
                fields,
                source: FieldSource::Api,
            }),
            other => {
                if let Some(fallback) = fallback_fields(object_type) {
                    warn!(
                        object_type,
                        "schema endpoint unavailable, using fallback field list"
                    );
                    return Ok(ResolvedSchema {
                        fields: fallback.iter().map(|f| f.to_string()).collect(),
                        source: FieldSource::Fallback,
                    });
                }
                match other {
                    Ok(_) => bail!("schema endpoint returned no fields for '{object_type}'"),
                    Err(e) => {
                        bail!("cannot resolve schema for unknown object type '{object_type}': {e}")
                    }
                }
            }
        }
    }
}

/// Default field lists for common CRM object types.
fn fallback_fields(object_type: &str) -> Option<&'static [&'static str]> {
    let normalized = object_type.trim().to_lowercase();
    match normalized.as_str() {
        "contact" | "contacts" => Some(&[
            "first_name",
            "last_name",
            "email",
            "phone",
            "title",
            "account_name",
            "created_date",
        ]),
        "account" | "accounts" | "company" | "companies" => Some(&[
            "name",
            "website",
            "industry",
            "phone",
            "billing_city",
            "owner",
            "created_date",
        ]),
        "deal" | "deals" | "opportunity" | "opportunities" => Some(&[
            "name",
            "amount",
            "stage",
            "close_date",
            "account_name",
            "owner",
            "probability",
        ]),
        "lead" | "leads" => Some(&[
            "first_name",
            "last_name",
            "email",
            "company",
            "status",
            "lead_source",
            "created_date",
        ]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::InMemoryConnector;

    #[tokio::test]
    async fn prefers_api_fields() {
        let connector = InMemoryConnector::new();
        connector.set_schema("contact", vec!["email".into(), "custom_field".into()]);

        let schema = SchemaResolver::resolve(&connector, "contact").await.unwrap();
        assert_eq!(schema.source, FieldSource::Api);
        assert_eq!(schema.fields, vec!["email", "custom_field"]);
    }

    #[tokio::test]
    async fn falls_back_on_upstream_failure() {
        let connector = InMemoryConnector::new();
        connector.fail_describe_fields(true);

        let schema = SchemaResolver::resolve(&connector, "Contact").await.unwrap();
        assert_eq!(schema.source, FieldSource::Fallback);
        assert!(schema.fields.contains(&"email".to_string()));
    }

    #[tokio::test]
    async fn unknown_object_type_is_a_hard_error() {
        let connector = InMemoryConnector::new();
        connector.fail_describe_fields(true);

        assert!(SchemaResolver::resolve(&connector, "widget").await.is_err());
    }
}
