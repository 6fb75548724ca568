//! Dependency health reporting for `ans health` and `GET /health`.
//!
//! Each backing service is probed independently and concurrently; one
//! unreachable service never hides the status of the others.

use anyhow::Result;
use serde::Serialize;

use crate::config::Config;
use crate::services::Services;

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub name: String,
    /// `"ok"`, `"down"`, or `"disabled"`.
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ServiceStatus {
    /// `probe` is `None` for a service the config disables.
    fn from_probe(name: &str, probe: Option<Result<()>>) -> Self {
        let (status, detail) = match probe {
            None => ("disabled", None),
            Some(Ok(())) => ("ok", None),
            Some(Err(e)) => ("down", Some(format!("{:#}", e))),
        };
        Self {
            name: name.to_string(),
            status: status.to_string(),
            detail,
        }
    }

    pub fn is_down(&self) -> bool {
        self.status == "down"
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// `"ok"` when nothing is down, `"degraded"` otherwise.
    pub status: String,
    pub version: String,
    pub services: Vec<ServiceStatus>,
}

/// Probe every service the config enables. Disabled providers are
/// reported as such and never contacted.
pub async fn check_health(config: &Config, services: &Services) -> HealthReport {
    let embedding_enabled = config.embedding.is_enabled();
    let completion_enabled = config.completion.is_enabled();
    let (store, embedding, completion) = futures::join!(
        services.store.ping(),
        async {
            if embedding_enabled {
                Some(services.embedder.ping().await)
            } else {
                None
            }
        },
        async {
            if completion_enabled {
                Some(services.completer.ping().await)
            } else {
                None
            }
        },
    );

    let statuses = vec![
        ServiceStatus::from_probe("store", Some(store)),
        ServiceStatus::from_probe("embedding", embedding),
        ServiceStatus::from_probe("completion", completion),
    ];
    let status = if statuses.iter().any(|s| s.is_down()) {
        "degraded"
    } else {
        "ok"
    };

    HealthReport {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        services: statuses,
    }
}

pub async fn run_health(config: &Config, services: &Services) -> Result<()> {
    let report = check_health(config, services).await;

    println!("{:<12} {:<10} DETAIL", "SERVICE", "STATUS");
    for s in &report.services {
        println!(
            "{:<12} {:<10} {}",
            s.name,
            s.status,
            s.detail.as_deref().unwrap_or("")
        );
    }
    println!();
    println!("overall: {}", report.status);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::DisabledCompleter;
    use crate::embedding::DisabledEmbedder;
    use crate::config::parse_config;
    use answer_harness_core::completion::{Completer, FragmentStream};
    use answer_harness_core::embedding::HashingEmbedder;
    use answer_harness_core::store::memory::InMemoryStore;
    use async_trait::async_trait;
    use std::sync::Arc;

    fn config(extra: &str) -> Config {
        parse_config(&format!("{}\n[server]\nbind = \"127.0.0.1:0\"\n", extra)).unwrap()
    }

    /// A completer whose model happens to be called "disabled" and whose
    /// backend is unreachable.
    struct UnreachableCompleter;

    #[async_trait]
    impl Completer for UnreachableCompleter {
        fn model_name(&self) -> &str {
            "disabled"
        }

        async fn stream(&self, _prompt: &str) -> Result<FragmentStream> {
            anyhow::bail!("unreachable")
        }

        async fn ping(&self) -> Result<()> {
            anyhow::bail!("connection refused")
        }
    }

    #[tokio::test]
    async fn test_disabled_services_are_not_down() {
        let services = Services {
            store: Arc::new(InMemoryStore::new(Vec::new())),
            embedder: Arc::new(DisabledEmbedder),
            completer: Arc::new(DisabledCompleter),
        };
        let report = check_health(&config(""), &services).await;
        assert_eq!(report.status, "ok");
        assert_eq!(report.services[0].status, "ok");
        assert_eq!(report.services[1].status, "disabled");
        assert_eq!(report.services[2].status, "disabled");
    }

    #[tokio::test]
    async fn test_down_service_degrades_report() {
        let store = crate::es_store::ElasticsearchStore::new(&crate::config::StoreConfig {
            url: "http://127.0.0.1:1".to_string(),
            timeout_secs: 2,
            ..crate::config::StoreConfig::default()
        })
        .unwrap();
        let services = Services {
            store: Arc::new(store),
            embedder: Arc::new(HashingEmbedder::new(8)),
            completer: Arc::new(DisabledCompleter),
        };
        let cfg = config("[embedding]\nprovider = \"hash\"\ndims = 8");
        let report = check_health(&cfg, &services).await;
        assert_eq!(report.status, "degraded");
        assert!(report.services[0].is_down());
        assert!(report.services[0].detail.is_some());
        assert_eq!(report.services[1].status, "ok");
    }

    #[tokio::test]
    async fn test_enabled_provider_is_probed_regardless_of_model_name() {
        let services = Services {
            store: Arc::new(InMemoryStore::new(Vec::new())),
            embedder: Arc::new(HashingEmbedder::new(8)),
            completer: Arc::new(UnreachableCompleter),
        };
        let cfg = config("[completion]\nprovider = \"ollama\"\nmodel = \"disabled\"");
        let report = check_health(&cfg, &services).await;
        assert_eq!(report.services[2].status, "down");
        assert_eq!(report.status, "degraded");
    }
}
