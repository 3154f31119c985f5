//! snapcycle - periodic VolumeSnapshots for annotated PVCs

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use kube::Client;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use snapcycle_common::{DEFAULT_WEBHOOK_PORT, FIELD_MANAGER, MUTATE_PATH};
use snapcycle_operator::controller;
use snapcycle_operator::events::{EventPublisher, KubeEventPublisher};
use snapcycle_operator::registry::BackupRegistry;
use snapcycle_operator::scheduler::Scheduler;
use snapcycle_operator::store::KubeSnapshotStore;
use snapcycle_operator::webhook::{self, RestoreMode, WebhookState};

/// snapcycle - annotation-driven snapshot scheduling for PVCs
#[derive(Parser, Debug)]
#[command(name = "snapcycle", version, about, long_about = None)]
struct Cli {
    /// Port the admission webhook listens on (TLS terminates upstream)
    #[arg(long, default_value_t = DEFAULT_WEBHOOK_PORT)]
    webhook_port: u16,

    /// How the restore annotation on incoming PVCs is interpreted
    #[arg(long, value_enum, default_value = "latest")]
    restore_mode: RestoreMode,

    /// PEM CA bundle for the webhook configuration. When set, the
    /// MutatingWebhookConfiguration is installed on startup.
    #[arg(long)]
    webhook_ca_bundle: Option<std::path::PathBuf>,

    /// Service exposing the webhook inside the cluster
    #[arg(long, default_value = "snapcycle-webhook")]
    webhook_service_name: String,

    /// Namespace of the webhook service
    #[arg(long, default_value = "snapcycle-system")]
    webhook_service_namespace: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    tracing::info!("snapcycle starting...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    if let Some(ref ca_path) = cli.webhook_ca_bundle {
        ensure_webhook_config(&client, ca_path, &cli).await?;
    }

    let registry = Arc::new(BackupRegistry::new());
    let events: Arc<dyn EventPublisher> =
        Arc::new(KubeEventPublisher::new(client.clone(), FIELD_MANAGER));
    let scheduler = Arc::new(Scheduler::new(
        Arc::new(KubeSnapshotStore::new(client.clone())),
        events.clone(),
    ));

    let ctx = Arc::new(controller::Context::new(
        registry.clone(),
        scheduler.clone(),
        events,
    ));

    tracing::info!("Starting snapcycle controllers...");
    let controllers = controller::build_backup_controllers(client, ctx);

    let state = Arc::new(WebhookState {
        mode: cli.restore_mode,
        registry,
        scheduler,
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], cli.webhook_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind webhook listener on {}: {}", addr, e))?;
    tracing::info!(%addr, path = MUTATE_PATH, "admission webhook listening");

    let server = axum::serve(listener, webhook::router(state));
    tokio::select! {
        _ = futures::future::join_all(controllers) => {
            tracing::info!("Controllers completed");
        }
        result = server.into_future() => {
            result.map_err(|e| anyhow::anyhow!("Webhook server failed: {}", e))?;
        }
    }

    tracing::info!("snapcycle shutting down");
    Ok(())
}

/// Install/update the MutatingWebhookConfiguration for PVC creation.
///
/// Intercepts CREATE on persistentvolumeclaims with failurePolicy Fail and
/// points the API server at the webhook service. Server-side apply keeps
/// the configuration in step with the operator version.
async fn ensure_webhook_config(
    client: &Client,
    ca_path: &std::path::Path,
    cli: &Cli,
) -> anyhow::Result<()> {
    use k8s_openapi::api::admissionregistration::v1::{
        MutatingWebhook, MutatingWebhookConfiguration, RuleWithOperations, ServiceReference,
        WebhookClientConfig,
    };
    use kube::api::{Api, ObjectMeta, Patch, PatchParams};

    let ca_bundle = std::fs::read(ca_path)
        .map_err(|e| anyhow::anyhow!("Failed to read CA bundle {}: {}", ca_path.display(), e))?;

    let webhook_config = MutatingWebhookConfiguration {
        metadata: ObjectMeta {
            name: Some("snapcycle-pvc-mutator".to_string()),
            ..Default::default()
        },
        webhooks: Some(vec![MutatingWebhook {
            name: "pvc.snapcycle.dev".to_string(),
            admission_review_versions: vec!["v1".to_string()],
            side_effects: "None".to_string(),
            failure_policy: Some("Fail".to_string()),
            match_policy: Some("Equivalent".to_string()),
            rules: Some(vec![RuleWithOperations {
                operations: Some(vec!["CREATE".to_string()]),
                api_groups: Some(vec!["".to_string()]),
                api_versions: Some(vec!["v1".to_string()]),
                resources: Some(vec!["persistentvolumeclaims".to_string()]),
                scope: Some("Namespaced".to_string()),
            }]),
            client_config: WebhookClientConfig {
                service: Some(ServiceReference {
                    name: cli.webhook_service_name.clone(),
                    namespace: cli.webhook_service_namespace.clone(),
                    path: Some(MUTATE_PATH.to_string()),
                    port: Some(443),
                }),
                ca_bundle: Some(k8s_openapi::ByteString(ca_bundle)),
                ..Default::default()
            },
            ..Default::default()
        }]),
    };

    let webhooks: Api<MutatingWebhookConfiguration> = Api::all(client.clone());
    webhooks
        .patch(
            "snapcycle-pvc-mutator",
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&webhook_config),
        )
        .await
        .map_err(|e| anyhow::anyhow!("Failed to install MutatingWebhookConfiguration: {}", e))?;

    tracing::info!("Webhook configuration installed");
    Ok(())
}
